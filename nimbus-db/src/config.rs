use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::blob::{
    LifecyclePolicy, lifecycle::MAX_LIFECYCLE_DAYS, lifecycle::MIN_LIFECYCLE_DAYS,
    validate_bucket_name,
};

pub const ENV_PREFIX: &str = "NIMBUS";
pub const DEFAULT_CONFIG_PATH: &str = ".config.yml";

pub const DEFAULT_SHARD_COUNT: u16 = 16;
pub const MIN_SHARD_COUNT: u16 = 1;
pub const MAX_SHARD_COUNT: u16 = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration parsing error: {0}")]
    Parse(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Fs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub shard_count: u16,
    pub health_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub bus: BusConfig,
    pub blob: BlobConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub subject_prefix: String,
    /// Capacity of each shard's inbound queue.
    pub queue_capacity: usize,
    pub drain_timeout_ms: u64,
    pub grace_period_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub backend: BackendKind,
    pub data_dir: Option<PathBuf>,
    pub operation_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub delete_marker_cleanup_delay_days: u32,
    pub non_current_version_cleanup_delay_days: u32,
    pub sweep_interval_secs: u64,
    pub bootstrap_buckets: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            health_port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            bus: BusConfig::default(),
            blob: BlobConfig::default(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "nimbus".to_string(),
            queue_capacity: 128,
            drain_timeout_ms: 30_000,
            grace_period_ms: 100,
        }
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_dir: None,
            operation_timeout_ms: 30_000,
            probe_timeout_ms: 10_000,
            delete_marker_cleanup_delay_days: 1,
            non_current_version_cleanup_delay_days: 1,
            sweep_interval_secs: 3_600,
            bootstrap_buckets: vec![],
        }
    }
}

impl BusConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl BlobConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn lifecycle_policy(&self) -> Result<LifecyclePolicy, ConfigError> {
        LifecyclePolicy::new(
            self.delete_marker_cleanup_delay_days,
            self.non_current_version_cleanup_delay_days,
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

impl NodeConfig {
    /// Load from an optional YAML file at `path`, then overlay
    /// `NIMBUS_`-prefixed environment variables (`__` separates nesting,
    /// e.g. `NIMBUS_BUS__SUBJECT_PREFIX`). The result is validated.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(path, config::FileFormat::Yaml).required(false),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("blob.bootstrap_buckets"),
        );
        let conf: NodeConfig = builder.build()?.try_deserialize()?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SHARD_COUNT..=MAX_SHARD_COUNT).contains(&self.shard_count) {
            return Err(ConfigError::Invalid(format!(
                "shard_count must be between {} and {}, got {}",
                MIN_SHARD_COUNT, MAX_SHARD_COUNT, self.shard_count
            )));
        }
        if self.health_port == 0 {
            return Err(ConfigError::Invalid("health_port must be non-zero".into()));
        }
        validate_subject_prefix(&self.bus.subject_prefix)?;
        if self.bus.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bus.queue_capacity must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("bus.drain_timeout_ms", self.bus.drain_timeout_ms),
            ("blob.operation_timeout_ms", self.blob.operation_timeout_ms),
            ("blob.probe_timeout_ms", self.blob.probe_timeout_ms),
            ("blob.sweep_interval_secs", self.blob.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        for (name, days) in [
            (
                "blob.delete_marker_cleanup_delay_days",
                self.blob.delete_marker_cleanup_delay_days,
            ),
            (
                "blob.non_current_version_cleanup_delay_days",
                self.blob.non_current_version_cleanup_delay_days,
            ),
        ] {
            if !(MIN_LIFECYCLE_DAYS..=MAX_LIFECYCLE_DAYS).contains(&days) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between {} and {}, got {}",
                    name, MIN_LIFECYCLE_DAYS, MAX_LIFECYCLE_DAYS, days
                )));
            }
        }
        if self.blob.backend == BackendKind::Fs && self.blob.data_dir.is_none() {
            return Err(ConfigError::Invalid(
                "blob.data_dir is required for the fs backend".into(),
            ));
        }
        for bucket in &self.blob.bootstrap_buckets {
            validate_bucket_name(bucket).map_err(|e| {
                ConfigError::Invalid(format!("blob.bootstrap_buckets: {}", e))
            })?;
        }
        Ok(())
    }

    pub fn shard_subject(&self, shard_id: u16) -> String {
        format!("{}.shards.{}.op", self.bus.subject_prefix, shard_id)
    }

    pub fn shard_count_subject(&self) -> String {
        format!("{}.config.getShardCount", self.bus.subject_prefix)
    }
}

/// Tokens separated by `.`, each made of alphanumerics, `_`, `-` or `:`.
pub fn validate_subject_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() {
        return Err(ConfigError::Invalid("bus.subject_prefix must not be empty".into()));
    }
    let token_ok = |t: &str| {
        !t.is_empty()
            && t.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':'))
    };
    if !prefix.split('.').all(token_ok) {
        return Err(ConfigError::Invalid(format!(
            "bus.subject_prefix has an invalid format: {}",
            prefix
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{BackendKind, LogFormat, NodeConfig, validate_subject_prefix};

    #[test]
    fn defaults_are_valid() {
        let conf = NodeConfig::default();
        conf.validate().unwrap();
        assert_eq!(conf.shard_count, 16);
        assert_eq!(conf.shard_subject(3), "nimbus.shards.3.op");
        assert_eq!(conf.shard_count_subject(), "nimbus.config.getShardCount");
        assert_eq!(conf.bus.grace_period().as_millis(), 100);
    }

    #[test]
    fn shard_count_bounds() {
        let mut conf = NodeConfig::default();
        conf.shard_count = 0;
        assert!(conf.validate().is_err());
        conf.shard_count = 257;
        assert!(conf.validate().is_err());
        conf.shard_count = 256;
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn lifecycle_days_bounds() {
        let mut conf = NodeConfig::default();
        conf.blob.non_current_version_cleanup_delay_days = 366;
        assert!(conf.validate().is_err());
        conf.blob.non_current_version_cleanup_delay_days = 365;
        conf.blob.delete_marker_cleanup_delay_days = 0;
        assert!(conf.validate().is_err());
    }

    #[test]
    fn subject_prefix_rules() {
        for ok in ["nimbus", "a.b", "x_y-z:1"] {
            assert!(validate_subject_prefix(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "a..b", ".a", "a.", "a b", "a*", "a>"] {
            assert!(validate_subject_prefix(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn fs_backend_needs_data_dir() {
        let mut conf = NodeConfig::default();
        conf.blob.backend = BackendKind::Fs;
        assert!(conf.validate().is_err());
        conf.blob.data_dir = Some("/tmp/nimbus".into());
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        write!(
            file,
            "shard_count: 4\n\
             log_format: json\n\
             bus:\n  subject_prefix: test.db\n\
             blob:\n  bootstrap_buckets: [gk-test]\n"
        )
        .unwrap();
        let conf = NodeConfig::load(file.path().to_str()).unwrap();
        assert_eq!(conf.shard_count, 4);
        assert_eq!(conf.log_format, LogFormat::Json);
        assert_eq!(conf.bus.subject_prefix, "test.db");
        assert_eq!(conf.bus.queue_capacity, 128);
        assert_eq!(conf.blob.bootstrap_buckets, vec!["gk-test".to_string()]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let conf = NodeConfig::load(Some("/definitely/not/here.yml")).unwrap();
        assert_eq!(conf.health_port, 8080);
    }

    #[test]
    fn bad_bootstrap_bucket_is_rejected() {
        let mut conf = NodeConfig::default();
        conf.blob.bootstrap_buckets = vec!["a..b".into()];
        assert!(conf.validate().is_err());
    }
}

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{BlobClient, BlobError};

pub const DELETE_MARKER_RULE: &str = "CleanDeleteMarkers";
pub const NONCURRENT_VERSION_RULE: &str = "CleanOldVersions";

pub const MIN_LIFECYCLE_DAYS: u32 = 1;
pub const MAX_LIFECYCLE_DAYS: u32 = 365;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Expiration rules attached to a bucket when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    pub delete_marker_days: u32,
    pub noncurrent_version_days: u32,
}

impl LifecyclePolicy {
    pub fn new(
        delete_marker_days: u32,
        noncurrent_version_days: u32,
    ) -> Result<Self, BlobError> {
        check_days("delete marker cleanup delay", delete_marker_days)?;
        check_days("non-current version cleanup delay", noncurrent_version_days)?;
        Ok(Self {
            delete_marker_days,
            noncurrent_version_days,
        })
    }

    pub fn delete_marker_delay(&self) -> Duration {
        DAY * self.delete_marker_days
    }

    pub fn noncurrent_version_delay(&self) -> Duration {
        DAY * self.noncurrent_version_days
    }

    /// Rule ids in the order they are evaluated.
    pub fn rule_ids(&self) -> [&'static str; 2] {
        [DELETE_MARKER_RULE, NONCURRENT_VERSION_RULE]
    }
}

fn check_days(what: &str, days: u32) -> Result<(), BlobError> {
    if !(MIN_LIFECYCLE_DAYS..=MAX_LIFECYCLE_DAYS).contains(&days) {
        return Err(BlobError::Validation(format!(
            "{} must be between {} and {} days, got {}",
            what, MIN_LIFECYCLE_DAYS, MAX_LIFECYCLE_DAYS, days
        )));
    }
    Ok(())
}

/// Outcome of one lifecycle pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub buckets: usize,
    pub purged_versions: usize,
    pub purged_delete_markers: usize,
    pub purged_keys: usize,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.buckets += other.buckets;
        self.purged_versions += other.purged_versions;
        self.purged_delete_markers += other.purged_delete_markers;
        self.purged_keys += other.purged_keys;
    }

    pub fn is_empty(&self) -> bool {
        self.purged_versions == 0
            && self.purged_delete_markers == 0
            && self.purged_keys == 0
    }
}

/// Runs [`BlobClient::run_lifecycle`] every `interval` until `token` is
/// cancelled. The first pass happens one interval after spawning.
pub fn spawn_sweeper(
    client: BlobClient,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match client.run_lifecycle(SystemTime::now()).await {
                        Ok(report) if report.is_empty() => {
                            tracing::debug!("lifecycle sweep: nothing to purge");
                        }
                        Ok(report) => tracing::info!(
                            buckets = report.buckets,
                            versions = report.purged_versions,
                            delete_markers = report.purged_delete_markers,
                            keys = report.purged_keys,
                            "lifecycle sweep done"
                        ),
                        Err(e) => tracing::warn!("lifecycle sweep failed: {}", e),
                    }
                }
                _ = token.cancelled() => break,
            }
        }
        tracing::info!("lifecycle sweeper stopped");
    })
}

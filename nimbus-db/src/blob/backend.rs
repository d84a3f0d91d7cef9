use std::time::SystemTime;

use bytes::Bytes;

use super::{LifecyclePolicy, SweepReport};

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("bucket does not exist: {0}")]
    NoSuchBucket(String),
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),
    #[error("bucket already exists: {0}")]
    BucketExists(String),
    #[error("object does not exist: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },
    #[error("version {version} of {bucket}/{key} does not exist")]
    NoSuchVersion {
        bucket: String,
        key: String,
        version: String,
    },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt metadata: {0}")]
    Corrupt(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackendError::NoSuchBucket(_)
                | BackendError::NoSuchKey { .. }
                | BackendError::NoSuchVersion { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutInfo {
    /// `None` for buckets without versioning.
    pub version_id: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
    pub size: u64,
    pub last_modified: SystemTime,
}

/// Storage seam of the blob client. Implementations own bucket metadata,
/// object versions and the evaluation of lifecycle rules.
#[async_trait::async_trait]
pub trait BlobBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn list_buckets(&self) -> Result<Vec<String>, BackendError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError>;

    async fn make_bucket(&self, bucket: &str) -> Result<(), BackendError>;

    async fn enable_versioning(&self, bucket: &str) -> Result<(), BackendError>;

    async fn is_versioned(&self, bucket: &str) -> Result<bool, BackendError>;

    async fn set_lifecycle(
        &self,
        bucket: &str,
        policy: LifecyclePolicy,
    ) -> Result<(), BackendError>;

    async fn lifecycle(
        &self,
        bucket: &str,
    ) -> Result<Option<LifecyclePolicy>, BackendError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutInfo, BackendError>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Bytes, BackendError>;

    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectInfo, BackendError>;

    /// Versioned buckets get a delete marker whose id is returned.
    /// Unversioned buckets drop the object.
    async fn remove_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<String>, BackendError>;

    /// Evaluate the bucket's lifecycle rules once. Buckets without rules
    /// are left alone.
    async fn apply_lifecycle(
        &self,
        bucket: &str,
        now: SystemTime,
    ) -> Result<SweepReport, BackendError>;
}

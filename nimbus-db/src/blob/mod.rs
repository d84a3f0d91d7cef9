//! Versioned blob store client.
//!
//! [`BlobClient`] validates arguments, maps backend failures to
//! [`BlobError`] and applies lifecycle rules to new buckets. The storage
//! itself sits behind [`BlobBackend`].

mod backend;
mod error;
pub mod fs;
pub mod lifecycle;
pub mod memory;
pub mod naming;
pub mod version;

use std::{sync::Arc, time::Duration, time::SystemTime};

pub use backend::{BackendError, BlobBackend, ObjectInfo, PutInfo};
use bytes::Bytes;
pub use error::BlobError;
pub use fs::FsBackend;
pub use lifecycle::{LifecyclePolicy, SweepReport, spawn_sweeper};
pub use memory::MemoryBackend;
pub use naming::validate_bucket_name;

#[derive(Clone)]
pub struct BlobClient {
    backend: Arc<dyn BlobBackend>,
    policy: Option<LifecyclePolicy>,
}

impl std::fmt::Debug for BlobClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobClient")
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .finish()
    }
}

fn require(value: &str, what: &str) -> Result<(), BlobError> {
    if value.is_empty() {
        return Err(BlobError::InvalidArgument(format!("{} cannot be empty", what)));
    }
    Ok(())
}

impl BlobClient {
    /// Wrap `backend` without probing it. `policy` may be `None`, in which
    /// case [`BlobClient::create_bucket`] fails with
    /// [`BlobError::ConfigMissing`].
    pub fn new(backend: Arc<dyn BlobBackend>, policy: Option<LifecyclePolicy>) -> Self {
        Self { backend, policy }
    }

    /// Build a client after checking that the backend answers a bucket
    /// listing within `probe_timeout`.
    pub async fn connect(
        backend: Arc<dyn BlobBackend>,
        policy: Option<LifecyclePolicy>,
        probe_timeout: Duration,
    ) -> Result<Self, BlobError> {
        match tokio::time::timeout(probe_timeout, backend.list_buckets()).await {
            Ok(Ok(buckets)) => {
                tracing::info!(
                    backend = backend.name(),
                    buckets = buckets.len(),
                    "connected to blob backend"
                );
                Ok(Self::new(backend, policy))
            }
            Ok(Err(e)) => Err(BlobError::StorageUnavailable(format!(
                "failed to connect to {} backend: {}",
                backend.name(),
                e
            ))),
            Err(_) => Err(BlobError::StorageUnavailable(format!(
                "failed to connect to {} backend: no answer within {:?}",
                backend.name(),
                probe_timeout
            ))),
        }
    }

    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }

    pub fn policy(&self) -> Option<&LifecyclePolicy> {
        self.policy.as_ref()
    }

    pub async fn list_buckets(&self) -> Result<Vec<String>, BlobError> {
        self.backend
            .list_buckets()
            .await
            .map_err(|e| BlobError::backend("failed to list buckets", e))
    }

    /// Create `bucket` if it does not exist yet, enable versioning and
    /// apply the lifecycle policy. Safe to call repeatedly.
    pub async fn create_bucket(&self, bucket: &str) -> Result<(), BlobError> {
        validate_bucket_name(bucket)?;

        let exists = self
            .backend
            .bucket_exists(bucket)
            .await
            .map_err(|e| BlobError::backend("failed to check if bucket exists", e))?;
        if !exists {
            match self.backend.make_bucket(bucket).await {
                Ok(()) | Err(BackendError::BucketExists(_)) => {}
                Err(e) => {
                    return Err(BlobError::backend(
                        format!("failed to create bucket {}", bucket),
                        e,
                    ));
                }
            }
            tracing::info!(bucket, "bucket created");
        }

        self.backend.enable_versioning(bucket).await.map_err(|e| {
            BlobError::backend(format!("failed to enable versioning on bucket {}", bucket), e)
        })?;

        let policy = self.policy.ok_or_else(|| {
            BlobError::ConfigMissing(format!(
                "config is required to apply lifecycle rules to bucket {}",
                bucket
            ))
        })?;
        self.backend.set_lifecycle(bucket, policy).await.map_err(|e| {
            BlobError::backend(
                format!("failed to apply lifecycle rules to bucket {}", bucket),
                e,
            )
        })?;
        tracing::debug!(
            bucket,
            delete_marker_days = policy.delete_marker_days,
            noncurrent_version_days = policy.noncurrent_version_days,
            "lifecycle rules applied"
        );
        Ok(())
    }

    /// Store `data` under `key`. `None` is rejected; an empty body is a
    /// valid zero-length object. Returns the new version id, or `None` for
    /// buckets without versioning.
    pub async fn write_file(
        &self,
        bucket: &str,
        key: &str,
        data: Option<Bytes>,
    ) -> Result<Option<String>, BlobError> {
        require(bucket, "bucket name")?;
        require(key, "file name")?;
        let data = data.ok_or_else(|| BlobError::InvalidArgument("data cannot be nil".into()))?;
        let info = self
            .backend
            .put_object(bucket, key, data)
            .await
            .map_err(|e| BlobError::backend(format!("failed to put object {}", key), e))?;
        Ok(info.version_id)
    }

    /// Read `key` at `version_id`, or the current version when `None`.
    pub async fn read_file(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Bytes, BlobError> {
        require(bucket, "bucket name")?;
        require(key, "file name")?;
        let version_id = version_id.filter(|v| !v.is_empty());
        self.backend
            .get_object(bucket, key, version_id)
            .await
            .map_err(|e| BlobError::backend(format!("failed to get object {}", key), e))
    }

    pub async fn file_exists(&self, bucket: &str, key: &str) -> Result<bool, BlobError> {
        require(bucket, "bucket name")?;
        require(key, "file name")?;
        match self.backend.stat_object(bucket, key, None).await {
            Ok(_) => Ok(true),
            Err(BackendError::NoSuchKey { .. }) => Ok(false),
            Err(e) => Err(BlobError::backend(format!("failed to stat object {}", key), e)),
        }
    }

    pub async fn stat_file(&self, bucket: &str, key: &str) -> Result<ObjectInfo, BlobError> {
        require(bucket, "bucket name")?;
        require(key, "file name")?;
        self.backend
            .stat_object(bucket, key, None)
            .await
            .map_err(|e| BlobError::backend(format!("failed to stat object {}", key), e))
    }

    /// Returns the delete marker's version id on versioned buckets.
    pub async fn delete_file(&self, bucket: &str, key: &str) -> Result<Option<String>, BlobError> {
        require(bucket, "bucket name")?;
        require(key, "file name")?;
        self.backend
            .remove_object(bucket, key)
            .await
            .map_err(|e| BlobError::backend(format!("failed to remove object {}", key), e))
    }

    /// One lifecycle pass over every bucket. A bucket that fails is logged
    /// and skipped.
    pub async fn run_lifecycle(&self, now: SystemTime) -> Result<SweepReport, BlobError> {
        let mut report = SweepReport::default();
        for bucket in self.list_buckets().await? {
            match self.backend.apply_lifecycle(&bucket, now).await {
                Ok(r) => report.merge(r),
                Err(e) => tracing::warn!(bucket, "lifecycle pass failed: {}", e),
            }
        }
        Ok(report)
    }
}

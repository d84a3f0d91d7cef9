use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use arc_swap::ArcSwapOption;
use bytes::Bytes;

use super::{
    BackendError, BlobBackend, LifecyclePolicy, ObjectInfo, PutInfo,
    SweepReport,
    version::{
        Lookup, NULL_VERSION, ObjectHistory, VersionEntry, VersionIdGenerator,
        from_unix_millis,
    },
};

/// Keeps every bucket in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    buckets: scc::HashMap<String, Arc<MemoryBucket>>,
    ids: VersionIdGenerator,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct MemoryBucket {
    versioned: AtomicBool,
    lifecycle: ArcSwapOption<LifecyclePolicy>,
    objects: scc::HashMap<String, StoredObject>,
}

#[derive(Default)]
struct StoredObject {
    history: ObjectHistory,
    blobs: HashMap<String, Bytes>,
}

impl StoredObject {
    fn forget(&mut self, purged: &[VersionEntry]) {
        for entry in purged {
            self.blobs.remove(&entry.version_id);
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`BackendError::Unavailable`], the way an
    /// unreachable server would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(BackendError::Unavailable("memory backend offline".into()));
        }
        Ok(())
    }

    async fn bucket(&self, bucket: &str) -> Result<Arc<MemoryBucket>, BackendError> {
        self.check()?;
        self.buckets
            .read_async(bucket, |_, b| b.clone())
            .await
            .ok_or_else(|| BackendError::NoSuchBucket(bucket.to_string()))
    }
}

fn lookup_err(bucket: &str, key: &str, version_id: Option<&str>, err: Lookup) -> BackendError {
    match (err, version_id) {
        (Lookup::MissingVersion, Some(v)) => BackendError::NoSuchVersion {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version: v.to_string(),
        },
        _ => BackendError::NoSuchKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
    }
}

#[async_trait::async_trait]
impl BlobBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_buckets(&self) -> Result<Vec<String>, BackendError> {
        self.check()?;
        let mut names = Vec::new();
        self.buckets
            .scan_async(|name, _| {
                names.push(name.clone());
            })
            .await;
        names.sort();
        Ok(names)
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError> {
        self.check()?;
        Ok(self.buckets.contains_async(bucket).await)
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        self.check()?;
        self.buckets
            .insert_async(bucket.to_string(), Arc::new(MemoryBucket::default()))
            .await
            .map_err(|_| BackendError::BucketExists(bucket.to_string()))
    }

    async fn enable_versioning(&self, bucket: &str) -> Result<(), BackendError> {
        self.bucket(bucket).await?.versioned.store(true, Ordering::Release);
        Ok(())
    }

    async fn is_versioned(&self, bucket: &str) -> Result<bool, BackendError> {
        Ok(self.bucket(bucket).await?.versioned.load(Ordering::Acquire))
    }

    async fn set_lifecycle(
        &self,
        bucket: &str,
        policy: LifecyclePolicy,
    ) -> Result<(), BackendError> {
        self.bucket(bucket).await?.lifecycle.store(Some(Arc::new(policy)));
        Ok(())
    }

    async fn lifecycle(
        &self,
        bucket: &str,
    ) -> Result<Option<LifecyclePolicy>, BackendError> {
        Ok(self.bucket(bucket).await?.lifecycle.load_full().map(|p| *p))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutInfo, BackendError> {
        let b = self.bucket(bucket).await?;
        let versioned = b.versioned.load(Ordering::Acquire);
        let size = data.len() as u64;
        let now = SystemTime::now();

        let mut slot = b
            .objects
            .entry_async(key.to_string())
            .await
            .or_insert_with(StoredObject::default);
        let obj = slot.get_mut();
        if versioned {
            let version_id = self.ids.next_id();
            obj.history.push(VersionEntry::object(version_id.clone(), size, now));
            obj.blobs.insert(version_id.clone(), data);
            Ok(PutInfo {
                version_id: Some(version_id),
                size,
            })
        } else {
            let dropped = obj
                .history
                .replace_unversioned(VersionEntry::object(NULL_VERSION, size, now));
            obj.forget(&dropped);
            obj.blobs.insert(NULL_VERSION.to_string(), data);
            Ok(PutInfo {
                version_id: None,
                size,
            })
        }
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Bytes, BackendError> {
        let b = self.bucket(bucket).await?;
        b.objects
            .read_async(key, |_, obj| {
                let entry = obj
                    .history
                    .resolve(version_id)
                    .map_err(|e| lookup_err(bucket, key, version_id, e))?;
                obj.blobs.get(&entry.version_id).cloned().ok_or_else(|| {
                    BackendError::Corrupt(format!(
                        "{}/{} version {} has no content",
                        bucket, key, entry.version_id
                    ))
                })
            })
            .await
            .unwrap_or_else(|| Err(lookup_err(bucket, key, version_id, Lookup::MissingObject)))
    }

    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectInfo, BackendError> {
        let b = self.bucket(bucket).await?;
        let versioned = b.versioned.load(Ordering::Acquire);
        b.objects
            .read_async(key, |_, obj| {
                let entry = obj
                    .history
                    .resolve(version_id)
                    .map_err(|e| lookup_err(bucket, key, version_id, e))?;
                Ok(ObjectInfo {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    version_id: versioned.then(|| entry.version_id.clone()),
                    size: entry.size,
                    last_modified: from_unix_millis(entry.created_at_ms),
                })
            })
            .await
            .unwrap_or_else(|| Err(lookup_err(bucket, key, version_id, Lookup::MissingObject)))
    }

    async fn remove_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<String>, BackendError> {
        let b = self.bucket(bucket).await?;
        if !b.versioned.load(Ordering::Acquire) {
            b.objects.remove_async(key).await;
            return Ok(None);
        }
        let version_id = self.ids.next_id();
        let mut slot = b
            .objects
            .entry_async(key.to_string())
            .await
            .or_insert_with(StoredObject::default);
        slot.get_mut()
            .history
            .push(VersionEntry::delete_marker(version_id.clone(), SystemTime::now()));
        Ok(Some(version_id))
    }

    async fn apply_lifecycle(
        &self,
        bucket: &str,
        now: SystemTime,
    ) -> Result<SweepReport, BackendError> {
        let b = self.bucket(bucket).await?;
        let mut report = SweepReport {
            buckets: 1,
            ..Default::default()
        };
        let Some(policy) = b.lifecycle.load_full() else {
            return Ok(report);
        };
        b.objects
            .retain_async(|_, obj| {
                let purged = obj.history.expire(&policy, now);
                for entry in &purged {
                    if entry.is_delete_marker() {
                        report.purged_delete_markers += 1;
                    } else {
                        report.purged_versions += 1;
                    }
                }
                obj.forget(&purged);
                if obj.history.is_empty() {
                    report.purged_keys += 1;
                    return false;
                }
                true
            })
            .await;
        Ok(report)
    }
}

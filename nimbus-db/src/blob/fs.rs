//! Filesystem backend.
//!
//! ```text
//! <root>/<bucket>/bucket.json                          versioning + lifecycle
//! <root>/<bucket>/objects/<hex>/<hex>/.../<hex>.k/manifest.json
//! <root>/<bucket>/objects/<hex>/<hex>/.../<hex>.k/<version>.blob
//! ```
//!
//! A key is hex-encoded and split into segments of at most
//! [`KEY_SEGMENT_LEN`] characters so every path component stays below the
//! usual 255 byte name limit. The last segment carries the `.k` suffix,
//! which keeps a short key from sharing a directory with a longer key it
//! prefixes. Every file is written to a temporary name first and renamed
//! into place.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{
    BackendError, BlobBackend, LifecyclePolicy, ObjectInfo, PutInfo, SweepReport,
    validate_bucket_name,
    version::{
        Lookup, NULL_VERSION, ObjectHistory, VersionEntry, VersionIdGenerator,
        from_unix_millis, unix_millis,
    },
};

const BUCKET_META: &str = "bucket.json";
const MANIFEST: &str = "manifest.json";
const OBJECTS_DIR: &str = "objects";
const OBJECT_SUFFIX: &str = ".k";

/// Hex characters per directory level of an encoded key.
pub const KEY_SEGMENT_LEN: usize = 128;
/// Number of key locks; keys hash onto them.
pub const LOCK_STRIPES: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BucketMeta {
    versioned: bool,
    #[serde(default)]
    lifecycle: Option<LifecyclePolicy>,
    created_at_ms: u64,
}

pub struct FsBackend {
    root: PathBuf,
    ids: VersionIdGenerator,
    locks: Box<[Mutex<()>]>,
}

impl FsBackend {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!("fs blob backend rooted at {}", root.display());
        Ok(Self {
            root,
            ids: VersionIdGenerator::default(),
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    /// Bucket names become a single path component, so anything that is
    /// not a valid bucket name never reaches the filesystem.
    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, BackendError> {
        if validate_bucket_name(bucket).is_err() {
            return Err(BackendError::InvalidBucketName(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    fn objects_dir(&self, bucket: &str) -> Result<PathBuf, BackendError> {
        Ok(self.bucket_dir(bucket)?.join(OBJECTS_DIR))
    }

    fn object_dir(&self, bucket: &str, key: &str) -> Result<PathBuf, BackendError> {
        Ok(self.objects_dir(bucket)?.join(key_path(key)))
    }

    fn lock_index(&self, bucket: &str, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        bucket.hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() % self.locks.len() as u64) as usize
    }

    fn lock(&self, bucket: &str, key: &str) -> &Mutex<()> {
        &self.locks[self.lock_index(bucket, key)]
    }

    async fn load_meta(&self, bucket: &str) -> Result<BucketMeta, BackendError> {
        let path = self.bucket_dir(bucket)?.join(BUCKET_META);
        match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| BackendError::Corrupt(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BackendError::NoSuchBucket(bucket.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store_meta(&self, bucket: &str, meta: &BucketMeta) -> Result<(), BackendError> {
        let raw = serde_json::to_vec_pretty(meta)
            .map_err(|e| BackendError::Corrupt(e.to_string()))?;
        write_atomic(&self.bucket_dir(bucket)?.join(BUCKET_META), &raw).await
    }

    async fn load_history(&self, dir: &Path) -> Result<Option<ObjectHistory>, BackendError> {
        let path = dir.join(MANIFEST);
        match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| BackendError::Corrupt(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store_history(&self, dir: &Path, history: &ObjectHistory) -> Result<(), BackendError> {
        let raw = serde_json::to_vec(history)
            .map_err(|e| BackendError::Corrupt(e.to_string()))?;
        write_atomic(&dir.join(MANIFEST), &raw).await
    }

    async fn resolve(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<(PathBuf, VersionEntry), BackendError> {
        self.load_meta(bucket).await?;
        let dir = self.object_dir(bucket, key)?;
        let history = self
            .load_history(&dir)
            .await?
            .ok_or_else(|| lookup_err(bucket, key, version_id, Lookup::MissingObject))?;
        let entry = history
            .resolve(version_id)
            .map_err(|e| lookup_err(bucket, key, version_id, e))?
            .clone();
        Ok((dir, entry))
    }

    /// Remove an object directory and whatever intermediate key levels it
    /// leaves empty.
    async fn remove_object_dir(&self, objects: &Path, dir: &Path) -> Result<(), BackendError> {
        match tokio::fs::remove_dir_all(dir).await {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        let mut parent = dir.parent();
        while let Some(p) = parent {
            if p == objects || !p.starts_with(objects) {
                break;
            }
            // fails once a sibling key still lives below `p`
            if tokio::fs::remove_dir(p).await.is_err() {
                break;
            }
            parent = p.parent();
        }
        Ok(())
    }

    /// Every object directory of `bucket` with the key it stores.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<(String, PathBuf)>, BackendError> {
        let objects = self.objects_dir(bucket)?;
        let mut found = Vec::new();
        let mut pending = vec![objects.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let path = entry.path();
                let is_object = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.ends_with(OBJECT_SUFFIX));
                if !is_object {
                    pending.push(path);
                    continue;
                }
                let key = path
                    .strip_prefix(&objects)
                    .ok()
                    .and_then(decode_key_path)
                    .ok_or_else(|| {
                        BackendError::Corrupt(format!("bad object dir {}", path.display()))
                    })?;
                found.push((key, path));
            }
        }
        Ok(found)
    }

    async fn sweep_object(
        &self,
        bucket: &str,
        key: &str,
        dir: &Path,
        policy: &LifecyclePolicy,
        now: SystemTime,
        report: &mut SweepReport,
    ) -> Result<(), BackendError> {
        let _held = self.lock(bucket, key).lock().await;

        let Some(mut history) = self.load_history(dir).await? else {
            return Ok(());
        };
        let purged = history.expire(policy, now);
        if purged.is_empty() {
            return Ok(());
        }
        for entry in &purged {
            if entry.is_delete_marker() {
                report.purged_delete_markers += 1;
            } else {
                report.purged_versions += 1;
                remove_if_exists(&blob_path(dir, &entry.version_id)).await?;
            }
        }
        if history.is_empty() {
            report.purged_keys += 1;
            self.remove_object_dir(&self.objects_dir(bucket)?, dir).await?;
        } else {
            self.store_history(dir, &history).await?;
        }
        Ok(())
    }
}

fn blob_path(dir: &Path, version_id: &str) -> PathBuf {
    dir.join(format!("{}.blob", version_id))
}

fn encode_key(key: &str) -> String {
    key.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn decode_key(raw: &str) -> Option<String> {
    if raw.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(raw.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// `objects/`-relative directory of `key`.
fn key_path(key: &str) -> PathBuf {
    let hex = encode_key(key);
    let segments: Vec<&str> = hex
        .as_bytes()
        .chunks(KEY_SEGMENT_LEN)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect();
    let mut path = PathBuf::new();
    if let Some((last, parents)) = segments.split_last() {
        for segment in parents {
            path.push(segment);
        }
        path.push(format!("{}{}", last, OBJECT_SUFFIX));
    }
    path
}

fn decode_key_path(rel: &Path) -> Option<String> {
    let mut hex = String::new();
    for component in rel.components() {
        hex.push_str(component.as_os_str().to_str()?);
    }
    decode_key(hex.strip_suffix(OBJECT_SUFFIX)?)
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), BackendError> {
    let tmp = path.with_extension(format!("tmp-{:08x}", rand::random::<u32>()));
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<(), BackendError> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
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
impl BlobBackend for FsBackend {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn list_buckets(&self) -> Result<Vec<String>, BackendError> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if tokio::fs::try_exists(entry.path().join(BUCKET_META)).await? {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError> {
        Ok(tokio::fs::try_exists(self.bucket_dir(bucket)?.join(BUCKET_META)).await?)
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        let dir = self.bucket_dir(bucket)?;
        match tokio::fs::create_dir(&dir).await {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BackendError::BucketExists(bucket.to_string()));
            }
            other => other?,
        }
        tokio::fs::create_dir_all(dir.join(OBJECTS_DIR)).await?;
        let meta = BucketMeta {
            created_at_ms: unix_millis(SystemTime::now()),
            ..Default::default()
        };
        self.store_meta(bucket, &meta).await
    }

    async fn enable_versioning(&self, bucket: &str) -> Result<(), BackendError> {
        let mut meta = self.load_meta(bucket).await?;
        if !meta.versioned {
            meta.versioned = true;
            self.store_meta(bucket, &meta).await?;
        }
        Ok(())
    }

    async fn is_versioned(&self, bucket: &str) -> Result<bool, BackendError> {
        Ok(self.load_meta(bucket).await?.versioned)
    }

    async fn set_lifecycle(
        &self,
        bucket: &str,
        policy: LifecyclePolicy,
    ) -> Result<(), BackendError> {
        let mut meta = self.load_meta(bucket).await?;
        meta.lifecycle = Some(policy);
        self.store_meta(bucket, &meta).await
    }

    async fn lifecycle(
        &self,
        bucket: &str,
    ) -> Result<Option<LifecyclePolicy>, BackendError> {
        Ok(self.load_meta(bucket).await?.lifecycle)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutInfo, BackendError> {
        let meta = self.load_meta(bucket).await?;
        let _held = self.lock(bucket, key).lock().await;

        let dir = self.object_dir(bucket, key)?;
        tokio::fs::create_dir_all(&dir).await?;
        let mut history = self.load_history(&dir).await?.unwrap_or_default();
        let size = data.len() as u64;
        let now = SystemTime::now();

        let version_id = if meta.versioned {
            self.ids.next_id()
        } else {
            NULL_VERSION.to_string()
        };
        write_atomic(&blob_path(&dir, &version_id), &data).await?;

        if meta.versioned {
            history.push(VersionEntry::object(version_id.clone(), size, now));
        } else {
            let dropped =
                history.replace_unversioned(VersionEntry::object(NULL_VERSION, size, now));
            for entry in dropped.iter().filter(|e| e.version_id != NULL_VERSION) {
                remove_if_exists(&blob_path(&dir, &entry.version_id)).await?;
            }
        }
        self.store_history(&dir, &history).await?;

        Ok(PutInfo {
            version_id: meta.versioned.then_some(version_id),
            size,
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Bytes, BackendError> {
        let (dir, entry) = self.resolve(bucket, key, version_id).await?;
        match tokio::fs::read(blob_path(&dir, &entry.version_id)).await {
            Ok(raw) => Ok(Bytes::from(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackendError::Corrupt(format!(
                "{}/{} version {} has no content",
                bucket, key, entry.version_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectInfo, BackendError> {
        let versioned = self.load_meta(bucket).await?.versioned;
        let (_, entry) = self.resolve(bucket, key, version_id).await?;
        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: versioned.then_some(entry.version_id),
            size: entry.size,
            last_modified: from_unix_millis(entry.created_at_ms),
        })
    }

    async fn remove_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<String>, BackendError> {
        let meta = self.load_meta(bucket).await?;
        let _held = self.lock(bucket, key).lock().await;
        let dir = self.object_dir(bucket, key)?;

        if !meta.versioned {
            self.remove_object_dir(&self.objects_dir(bucket)?, &dir).await?;
            return Ok(None);
        }
        tokio::fs::create_dir_all(&dir).await?;
        let mut history = self.load_history(&dir).await?.unwrap_or_default();
        let version_id = self.ids.next_id();
        history.push(VersionEntry::delete_marker(version_id.clone(), SystemTime::now()));
        self.store_history(&dir, &history).await?;
        Ok(Some(version_id))
    }

    async fn apply_lifecycle(
        &self,
        bucket: &str,
        now: SystemTime,
    ) -> Result<SweepReport, BackendError> {
        let meta = self.load_meta(bucket).await?;
        let mut report = SweepReport {
            buckets: 1,
            ..Default::default()
        };
        let Some(policy) = meta.lifecycle else {
            return Ok(report);
        };
        for (key, dir) in self.list_objects(bucket).await? {
            self.sweep_object(bucket, &key, &dir, &policy, now, &mut report)
                .await?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use bytes::Bytes;

    use super::{
        FsBackend, KEY_SEGMENT_LEN, LOCK_STRIPES, decode_key, decode_key_path, encode_key,
        key_path,
    };
    use crate::blob::{BackendError, BlobBackend};

    #[test]
    fn keys_survive_encoding() {
        for key in ["/ts-id-2/p", "a", "ünï/çødé", "../../etc"] {
            let enc = encode_key(key);
            assert!(!enc.contains('/'));
            assert_eq!(decode_key(&enc).as_deref(), Some(key));
        }
        assert_eq!(decode_key("abc"), None);
    }

    #[test]
    fn long_keys_are_split_into_short_components() {
        let key = format!("/{}", "k".repeat(1023));
        let path = key_path(&key);
        assert_eq!(path.components().count(), 2 * 1024 / KEY_SEGMENT_LEN);
        for component in path.components() {
            assert!(component.as_os_str().len() <= KEY_SEGMENT_LEN + 2);
        }
        assert_eq!(decode_key_path(&path).as_deref(), Some(key.as_str()));

        let short = key_path("a");
        assert_eq!(short, Path::new("61.k"));
        assert_eq!(decode_key_path(Path::new("61")), None);
    }

    #[test]
    fn lock_stripe_is_stable_per_key() {
        let backend = FsBackend {
            root: "/unused".into(),
            ids: Default::default(),
            locks: (0..LOCK_STRIPES).map(|_| tokio::sync::Mutex::new(())).collect(),
        };
        let a = backend.lock_index("gk-test", "/k");
        assert_eq!(a, backend.lock_index("gk-test", "/k"));
        assert!(a < LOCK_STRIPES);
    }

    #[tokio::test]
    async fn lock_table_does_not_grow() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).await.unwrap();
        backend.make_bucket("gk-test").await.unwrap();
        for i in 0..500 {
            let key = format!("/k-{}", i);
            backend
                .put_object("gk-test", &key, Bytes::from_static(b"x"))
                .await
                .unwrap();
            backend.remove_object("gk-test", &key).await.unwrap();
        }
        assert_eq!(backend.locks.len(), LOCK_STRIPES);
        let objects = dir.path().join("gk-test").join("objects");
        assert_eq!(std::fs::read_dir(objects).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn prefix_keys_do_not_share_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).await.unwrap();
        backend.make_bucket("gk-test").await.unwrap();
        let short = "s".repeat(KEY_SEGMENT_LEN / 2);
        let long = format!("{}tail", short);
        backend
            .put_object("gk-test", &short, Bytes::from_static(b"short"))
            .await
            .unwrap();
        backend
            .put_object("gk-test", &long, Bytes::from_static(b"long"))
            .await
            .unwrap();

        backend.remove_object("gk-test", &short).await.unwrap();
        assert!(matches!(
            backend.get_object("gk-test", &short, None).await,
            Err(BackendError::NoSuchKey { .. })
        ));
        assert_eq!(
            &backend.get_object("gk-test", &long, None).await.unwrap()[..],
            b"long"
        );
    }

    #[tokio::test]
    async fn invalid_bucket_names_never_reach_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path().join("root")).await.unwrap();
        for bucket in ["..", "../escape", "a/b", "UPPER"] {
            assert!(matches!(
                backend.put_object(bucket, "/k", Bytes::from_static(b"x")).await,
                Err(BackendError::InvalidBucketName(_))
            ));
            assert!(matches!(
                backend.make_bucket(bucket).await,
                Err(BackendError::InvalidBucketName(_))
            ));
        }
        assert!(!dir.path().join("escape").exists());
    }
}

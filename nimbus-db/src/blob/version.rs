use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use super::lifecycle::LifecyclePolicy;

/// Version id stored for objects in buckets without versioning.
pub const NULL_VERSION: &str = "null";

pub fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn from_unix_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

/// Produces version ids that never repeat within a process and are very
/// unlikely to collide across processes.
#[derive(Debug)]
pub struct VersionIdGenerator {
    seq: AtomicU64,
    salt: u32,
}

impl Default for VersionIdGenerator {
    fn default() -> Self {
        Self {
            seq: AtomicU64::new(0),
            salt: rand::random(),
        }
    }
}

impl VersionIdGenerator {
    pub fn next_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "{:012x}{:08x}{:08x}",
            unix_millis(SystemTime::now()),
            seq,
            self.salt
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Object,
    DeleteMarker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version_id: String,
    pub kind: EntryKind,
    pub size: u64,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noncurrent_since_ms: Option<u64>,
}

impl VersionEntry {
    pub fn object(version_id: impl Into<String>, size: u64, now: SystemTime) -> Self {
        Self {
            version_id: version_id.into(),
            kind: EntryKind::Object,
            size,
            created_at_ms: unix_millis(now),
            noncurrent_since_ms: None,
        }
    }

    pub fn delete_marker(version_id: impl Into<String>, now: SystemTime) -> Self {
        Self {
            version_id: version_id.into(),
            kind: EntryKind::DeleteMarker,
            size: 0,
            created_at_ms: unix_millis(now),
            noncurrent_since_ms: None,
        }
    }

    pub fn is_delete_marker(&self) -> bool {
        self.kind == EntryKind::DeleteMarker
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// No such version id.
    MissingVersion,
    /// The key has no current object.
    MissingObject,
    /// The addressed version is a delete marker.
    DeleteMarker,
}

/// All versions of one key, oldest first. The last entry is current.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHistory {
    entries: Vec<VersionEntry>,
}

impl ObjectHistory {
    pub fn entries(&self) -> &[VersionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current(&self) -> Option<&VersionEntry> {
        self.entries.last()
    }

    pub fn find(&self, version_id: &str) -> Option<&VersionEntry> {
        self.entries.iter().find(|e| e.version_id == version_id)
    }

    /// Append `entry` as the new current version.
    pub fn push(&mut self, entry: VersionEntry) {
        let since = entry.created_at_ms;
        if let Some(prev) = self.entries.last_mut() {
            prev.noncurrent_since_ms = Some(since);
        }
        self.entries.push(entry);
    }

    /// Replace the whole history with a single `null` version and return
    /// whatever was dropped.
    pub fn replace_unversioned(&mut self, mut entry: VersionEntry) -> Vec<VersionEntry> {
        entry.version_id = NULL_VERSION.to_string();
        std::mem::replace(&mut self.entries, vec![entry])
    }

    pub fn resolve(&self, version_id: Option<&str>) -> Result<&VersionEntry, Lookup> {
        let entry = match version_id {
            Some(v) => self.find(v).ok_or(Lookup::MissingVersion)?,
            None => self.current().ok_or(Lookup::MissingObject)?,
        };
        if entry.is_delete_marker() {
            return Err(Lookup::DeleteMarker);
        }
        Ok(entry)
    }

    /// Drop the versions `policy` has expired at `now` and return them.
    ///
    /// Non-current versions go once they have been non-current for the
    /// non-current delay. A current delete marker older than the delete
    /// marker delay goes together with everything it shadows.
    pub fn expire(&mut self, policy: &LifecyclePolicy, now: SystemTime) -> Vec<VersionEntry> {
        let now_ms = unix_millis(now);
        let noncurrent_ms = millis(policy.noncurrent_version_delay());
        let marker_ms = millis(policy.delete_marker_delay());

        let mut purged = Vec::new();
        let Some(current) = self.entries.pop() else {
            return purged;
        };
        let (keep, drop): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|e| match e.noncurrent_since_ms {
                Some(since) => now_ms.saturating_sub(since) < noncurrent_ms,
                None => true,
            });
        purged.extend(drop);
        self.entries = keep;

        if current.is_delete_marker()
            && now_ms.saturating_sub(current.created_at_ms) >= marker_ms
        {
            purged.append(&mut self.entries);
            purged.push(current);
        } else {
            self.entries.push(current);
        }
        purged
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

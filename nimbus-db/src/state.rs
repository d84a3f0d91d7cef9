use std::sync::Arc;

use arc_swap::ArcSwapOption;

pub type ShardId = u16;

/// Immutable snapshot of the shards this node owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeState {
    shard_ids: Arc<[ShardId]>,
}

impl RuntimeState {
    pub fn new(mut shard_ids: Vec<ShardId>) -> Self {
        shard_ids.sort_unstable();
        shard_ids.dedup();
        Self {
            shard_ids: shard_ids.into(),
        }
    }

    /// Single-node mode owns every shard `0..shard_count`.
    pub fn single_node(shard_count: u16) -> Self {
        Self::new((0..shard_count).collect())
    }

    /// Owned copy of the shard ids.
    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.shard_ids.to_vec()
    }

    /// Borrow the backing slice without copying.
    #[inline]
    pub fn shard_ids_view(&self) -> &[ShardId] {
        &self.shard_ids
    }

    #[inline]
    pub fn owns(&self, shard_id: ShardId) -> bool {
        self.shard_ids.binary_search(&shard_id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.shard_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shard_ids.is_empty()
    }
}

/// Holds the current [`RuntimeState`]. Readers get the whole snapshot that
/// was current when they loaded; writers replace it in one swap.
#[derive(Debug, Default)]
pub struct StateCell {
    current: ArcSwapOption<RuntimeState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Option<Arc<RuntimeState>> {
        self.current.load_full()
    }

    pub fn store(&self, state: RuntimeState) {
        self.current.store(Some(Arc::new(state)));
    }

    pub fn clear(&self) {
        self.current.store(None);
    }
}

use std::sync::Arc;

use nimbus_transport::MessageBus;

use crate::{blob::BlobClient, config::NodeConfig, state::StateCell};

/// Collaborators shared by every handler. Built once during startup and
/// cloned into each shard worker.
#[derive(Clone)]
pub struct NodeContext {
    pub config: Arc<NodeConfig>,
    pub bus: Arc<dyn MessageBus>,
    pub blob: BlobClient,
    pub state: Arc<StateCell>,
}

impl NodeContext {
    pub fn new(
        config: NodeConfig,
        bus: Arc<dyn MessageBus>,
        blob: BlobClient,
    ) -> Self {
        Self {
            config: Arc::new(config),
            bus,
            blob,
            state: Arc::new(StateCell::new()),
        }
    }
}

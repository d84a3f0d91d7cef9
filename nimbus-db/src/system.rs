//! Cluster metadata queries answered from configuration alone.

use bytes::Bytes;
use nimbus_transport::{
    Message,
    util::{Handler, ManagedConfig, ManagedSubscription, declare_managed_subscription},
};

use crate::{NimbusError, context::NodeContext, shard::ShardsResponse};

/// Queue group shared by every node, so one of them answers each query.
pub const SYSTEM_QUEUE_GROUP: &str = "nimbus-system-handlers";

#[derive(Clone)]
pub struct ShardCountHandler {
    shard_count: u16,
}

impl ShardCountHandler {
    pub fn new(shard_count: u16) -> Self {
        Self { shard_count }
    }

    pub fn reply(&self) -> Bytes {
        let resp = ShardsResponse {
            shard_count: self.shard_count,
        };
        Bytes::from(serde_json::to_vec(&resp).unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl Handler<Message> for ShardCountHandler {
    async fn handle(&self, mut msg: Message) {
        if let Err(e) = msg.respond(self.reply()).await {
            tracing::warn!("failed to answer '{}': {}", msg.subject(), e);
        }
    }
}

pub async fn start_system_handlers(
    ctx: &NodeContext,
) -> Result<Vec<ManagedSubscription>, NimbusError> {
    let subject = ctx.config.shard_count_subject();
    let sub = declare_managed_subscription(
        ctx.bus.as_ref(),
        ManagedConfig::unbounded(subject.clone(), 1).with_queue_group(SYSTEM_QUEUE_GROUP),
        ShardCountHandler::new(ctx.config.shard_count),
    )
    .await
    .map_err(|source| NimbusError::Subscribe { subject, source })?;
    Ok(vec![sub])
}

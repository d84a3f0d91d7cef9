use std::{future::Future, time::Duration};

use bytes::Bytes;
use nimbus_transport::{
    Headers, Message,
    util::{Handler, ManagedConfig, ManagedSubscription, declare_managed_subscription},
};

use super::{DbResponse, OperationKind, ShardOperationHeaders, ShardReply};
use crate::{
    NimbusError,
    blob::{BlobClient, BlobError},
    context::NodeContext,
    state::ShardId,
};

/// Handles the operations addressed to one shard.
#[derive(Clone)]
pub struct ShardOperationHandler {
    shard_id: ShardId,
    blob: BlobClient,
    op_timeout: Duration,
}

impl ShardOperationHandler {
    pub fn new(shard_id: ShardId, blob: BlobClient, op_timeout: Duration) -> Self {
        Self {
            shard_id,
            blob,
            op_timeout,
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Validate headers, route by operation type and produce the reply.
    /// A missing payload is treated as an empty one.
    pub async fn process(&self, headers: &Headers, payload: Option<&Bytes>) -> ShardReply {
        let req = match ShardOperationHeaders::extract(headers) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(shard = self.shard_id, "rejecting request: {}", e);
                return DbResponse::bad_request(e.to_string()).into();
            }
        };
        match req.operation {
            OperationKind::PointWrite => {
                let data = payload.cloned().unwrap_or_default();
                self.point_write(&req, data).await
            }
            OperationKind::PointRead => self.point_read(&req).await,
            OperationKind::CollectionWrite => {
                DbResponse::bad_request("collection write operation not yet implemented").into()
            }
            OperationKind::CollectionRead => {
                DbResponse::bad_request("collection read operation not yet implemented").into()
            }
            OperationKind::Unknown(code) => {
                DbResponse::bad_request(format!("unknown operation type: {}", code)).into()
            }
        }
    }

    /// The existence check and the write share one operation deadline.
    async fn point_write(&self, req: &ShardOperationHeaders, data: Bytes) -> ShardReply {
        match tokio::time::timeout(self.op_timeout, self.write_checked(req, data)).await {
            Ok(reply) => reply,
            Err(_) => {
                let e = BlobError::Timeout("point write".to_string(), self.op_timeout);
                tracing::error!(
                    shard = self.shard_id,
                    bucket = %req.bucket_name,
                    key = %req.file_name,
                    "write failed: {}",
                    e
                );
                failure("failed to write file", e)
            }
        }
    }

    async fn write_checked(&self, req: &ShardOperationHeaders, data: Bytes) -> ShardReply {
        let bucket = req.bucket_name.as_str();
        let key = req.file_name.as_str();
        if !req.overwrite {
            match self.blob.file_exists(bucket, key).await {
                Ok(false) => {}
                Ok(true) => {
                    return DbResponse::bad_request(format!("file already exists: {}", key)).into();
                }
                Err(e) => {
                    tracing::error!(
                        shard = self.shard_id,
                        bucket,
                        key,
                        "exists check failed: {}",
                        e
                    );
                    return failure("failed to check if file exists", e);
                }
            }
        }
        match self.blob.write_file(bucket, key, Some(data)).await {
            Ok(version) => {
                tracing::debug!(shard = self.shard_id, bucket, key, ?version, "file written");
                DbResponse::ok().into()
            }
            Err(e) => {
                tracing::error!(shard = self.shard_id, bucket, key, "write failed: {}", e);
                failure("failed to write file", e)
            }
        }
    }

    async fn point_read(&self, req: &ShardOperationHeaders) -> ShardReply {
        let bucket = req.bucket_name.as_str();
        let key = req.file_name.as_str();
        match self.timed("read_file", self.blob.read_file(bucket, key, None)).await {
            Ok(data) => ShardReply::Data(data),
            Err(e) => {
                tracing::error!(shard = self.shard_id, bucket, key, "read failed: {}", e);
                failure("failed to read file", e)
            }
        }
    }

    async fn timed<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T, BlobError>>,
    ) -> Result<T, BlobError> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .unwrap_or_else(|_| Err(BlobError::Timeout(op.to_string(), self.op_timeout)))
    }
}

fn failure(context: &str, e: BlobError) -> ShardReply {
    let message = format!("{}: {}", context, e);
    if e.is_client_error() {
        DbResponse::bad_request(message).into()
    } else {
        DbResponse::internal(message).into()
    }
}

#[async_trait::async_trait]
impl Handler<Message> for ShardOperationHandler {
    async fn handle(&self, mut msg: Message) {
        let reply = self.process(msg.headers(), msg.payload()).await;
        if let Err(e) = msg.respond(reply.into_bytes()).await {
            tracing::warn!(shard = self.shard_id, "failed to send response: {}", e);
        }
    }
}

/// One shard's live subscription together with its queue and worker.
pub struct ShardHandler {
    shard_id: ShardId,
    subscription: ManagedSubscription,
}

impl ShardHandler {
    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn subject(&self) -> &str {
        self.subscription.subject()
    }

    pub fn queue_len(&self) -> usize {
        self.subscription.queue_len()
    }

    pub async fn unsubscribe(&mut self) -> Result<(), NimbusError> {
        Ok(self.subscription.unsubscribe().await?)
    }

    /// Let the worker exit once it has drained what is already queued.
    pub fn close_queue(&mut self) {
        self.subscription.close_queue();
    }

    pub async fn join(&mut self) {
        self.subscription.join().await;
    }
}

/// Subscribe every shard in the current runtime state.
pub async fn start_shard_handlers(ctx: &NodeContext) -> Result<Vec<ShardHandler>, NimbusError> {
    let Some(state) = ctx.state.load() else {
        tracing::warn!("no runtime state installed, no shard handlers started");
        return Ok(vec![]);
    };
    let capacity = ctx.config.bus.queue_capacity;
    let op_timeout = ctx.config.blob.operation_timeout();
    let mut handlers = Vec::with_capacity(state.len());
    for &shard_id in state.shard_ids_view() {
        let subject = ctx.config.shard_subject(shard_id);
        let handler = ShardOperationHandler::new(shard_id, ctx.blob.clone(), op_timeout);
        let subscription = declare_managed_subscription(
            ctx.bus.as_ref(),
            ManagedConfig::new(subject.clone(), 1, capacity),
            handler,
        )
        .await
        .map_err(|source| NimbusError::Subscribe { subject, source })?;
        handlers.push(ShardHandler {
            shard_id,
            subscription,
        });
    }
    tracing::info!("started {} shard handlers", handlers.len());
    Ok(handlers)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use bytes::Bytes;
    use nimbus_transport::Headers;

    use super::ShardOperationHandler;
    use crate::{
        blob::{BlobClient, LifecyclePolicy, MemoryBackend},
        shard::{DbResponse, ShardReply},
    };

    async fn handler() -> ShardOperationHandler {
        let blob = BlobClient::new(
            Arc::new(MemoryBackend::new()),
            Some(LifecyclePolicy::new(1, 1).unwrap()),
        );
        blob.create_bucket("gk-test").await.unwrap();
        ShardOperationHandler::new(0, blob, Duration::from_secs(5))
    }

    fn headers(op: &str) -> Headers {
        Headers::new()
            .with("type", op)
            .with("fileName", "/k")
            .with("bucketName", "gk-test")
    }

    #[tokio::test]
    async fn collection_operations_are_unsupported() {
        let h = handler().await;
        assert_eq!(
            h.process(&headers("2"), None).await,
            ShardReply::Status(DbResponse::bad_request(
                "collection write operation not yet implemented"
            ))
        );
        assert_eq!(
            h.process(&headers("3"), None).await,
            ShardReply::Status(DbResponse::bad_request(
                "collection read operation not yet implemented"
            ))
        );
        assert_eq!(
            h.process(&headers("7"), None).await,
            ShardReply::Status(DbResponse::bad_request("unknown operation type: 7"))
        );
    }

    #[tokio::test]
    async fn missing_payload_writes_empty_object() {
        let h = handler().await;
        assert_eq!(h.process(&headers("0"), None).await.status(), 200);
        assert_eq!(
            h.process(&headers("1"), None).await,
            ShardReply::Data(Bytes::new())
        );
    }

    #[tokio::test]
    async fn read_of_missing_key_is_server_error() {
        let h = handler().await;
        let reply = h.process(&headers("1"), None).await;
        assert_eq!(reply.status(), 500);
    }
}

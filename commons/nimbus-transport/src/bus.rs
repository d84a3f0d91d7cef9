use std::time::Duration;

use bytes::Bytes;

use crate::{Headers, Message};

#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error("transport config error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("no responders available for '{0}'")]
    NoResponders(String),
    #[error("request on '{0}' was dropped without a response")]
    NoResponse(String),
    #[error("request on '{0}' timed out")]
    Timeout(String),
    #[error("request on '{0}' was rejected: {1}")]
    Rejected(String, String),
    #[error("message on '{0}' has no reply target")]
    NoReplyTarget(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("connection is closed")]
    Closed,
}

impl BusError {
    pub fn transport<E>(error: E) -> BusError
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        BusError::Transport(error.into())
    }
}

/// A live subscription. Dropping it without calling
/// [`Subscription::unsubscribe`] leaves delivery up to the transport.
#[async_trait::async_trait]
pub trait Subscription: Send + Sync {
    fn subject(&self) -> &str;

    async fn unsubscribe(self: Box<Self>) -> Result<(), BusError>;
}

/// Queue-group-aware publish/subscribe with request/response semantics.
///
/// Delivery pushes every matching message into `sink`. When the sink is a
/// bounded channel and it is full, delivery waits; the transport decides how
/// that stall propagates to publishers.
#[async_trait::async_trait]
pub trait MessageBus: Send + Sync + 'static {
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        sink: flume::Sender<Message>,
    ) -> Result<Box<dyn Subscription>, BusError>;

    async fn request(
        &self,
        subject: &str,
        headers: Headers,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError>;

    /// Stop accepting new requests, wait until every delivered request was
    /// answered, then close the connection.
    async fn drain(&self) -> Result<(), BusError>;

    /// Close the connection immediately.
    async fn close(&self);
}

/// `nimbus.shards.3.op` -> `nimbus/shards/3/op`
pub fn subject_to_key_expr(subject: &str) -> String {
    subject.replace('.', "/")
}

#[cfg(test)]
mod tests {
    use super::subject_to_key_expr;

    #[test]
    fn subject_maps_to_key_expr() {
        assert_eq!(
            subject_to_key_expr("nimbus.shards.3.op"),
            "nimbus/shards/3/op"
        );
        assert_eq!(
            subject_to_key_expr("nimbus.config.getShardCount"),
            "nimbus/config/getShardCount"
        );
    }
}

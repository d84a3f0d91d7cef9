//! [`MessageBus`] over a zenoh session.
//!
//! A subject maps to a key expression (`.` becomes `/`). Subscriptions are
//! complete queryables and requests are `get` queries, so a queue group is
//! served by whichever member zenoh picks with [`QueryTarget::BestMatching`].
//! Headers travel as a JSON attachment; selector parameters are accepted
//! too and lose against the attachment on conflict.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use zenoh::{
    Session,
    bytes::ZBytes,
    qos::CongestionControl,
    query::{ConsolidationMode, Query, QueryTarget, Queryable},
};

use crate::{
    BusError, Headers, InFlight, InFlightGuard, Message, MessageBus,
    ReplySink, Subscription, ZenohConfig, subject_to_key_expr,
};

#[derive(Clone)]
pub struct ZenohBus {
    session: Session,
    inflight: InFlight,
    closed: Arc<AtomicBool>,
}

impl ZenohBus {
    pub async fn connect(config: &ZenohConfig) -> Result<Self, BusError> {
        let conf = config.create_zenoh()?;
        Self::open(conf).await
    }

    pub async fn open(conf: zenoh::Config) -> Result<Self, BusError> {
        let session = zenoh::open(conf).await.map_err(BusError::transport)?;
        tracing::info!("zenoh session opened: {}", session.zid());
        Ok(Self::with_session(session))
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session,
            inflight: InFlight::default(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.count()
    }
}

fn headers_of(query: &Query) -> Headers {
    let mut headers: Headers = query
        .parameters()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if let Some(raw) = query.attachment() {
        match Headers::from_json(&raw.to_bytes()) {
            Ok(attached) => headers.merge(attached),
            Err(e) => tracing::warn!(
                "query '{}': ignoring malformed header attachment: {}",
                query.key_expr(),
                e
            ),
        }
    }
    headers
}

#[async_trait::async_trait]
impl MessageBus for ZenohBus {
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        sink: flume::Sender<Message>,
    ) -> Result<Box<dyn Subscription>, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let key = subject_to_key_expr(subject);
        let subject_owned = subject.to_string();
        let inflight = self.inflight.clone();
        let closed = self.closed.clone();
        let queryable = self
            .session
            .declare_queryable(key.clone())
            .complete(true)
            .callback(move |query: Query| {
                if closed.load(Ordering::Acquire) {
                    tracing::debug!(
                        "queryable '{}': draining, dropping query",
                        query.key_expr()
                    );
                    return;
                }
                let headers = headers_of(&query);
                let payload =
                    query.payload().map(|p| Bytes::from(p.to_bytes().to_vec()));
                let reply = ZenohReply {
                    query,
                    _guard: inflight.guard(),
                };
                let msg = Message::new(subject_owned.clone(), headers, payload)
                    .with_reply(Box::new(reply));
                // blocks the zenoh callback while the handler queue is full
                if let Err(e) = sink.send(msg) {
                    tracing::warn!(
                        "queryable '{}': callback error: {}",
                        subject_owned,
                        e
                    );
                }
            })
            .await
            .map_err(BusError::transport)?;
        tracing::info!("queryable '{}': declared (group={:?})", key, queue_group);
        Ok(Box::new(ZenohSubscription {
            subject: subject.to_string(),
            queryable: Some(queryable),
        }))
    }

    async fn request(
        &self,
        subject: &str,
        headers: Headers,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let key = subject_to_key_expr(subject);
        tracing::debug!("zenoh: GET {}", key);
        let replies = self
            .session
            .get(&key)
            .payload(ZBytes::from(payload.to_vec()))
            .attachment(ZBytes::from(headers.to_json()?))
            .consolidation(ConsolidationMode::None)
            .congestion_control(CongestionControl::Block)
            .target(QueryTarget::BestMatching)
            .timeout(timeout)
            .await
            .map_err(BusError::transport)?;

        let reply = match tokio::time::timeout(timeout, replies.recv_async()).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(BusError::NoResponders(subject.into())),
            Err(_) => return Err(BusError::Timeout(subject.into())),
        };
        match reply.result() {
            Ok(sample) => Ok(Bytes::from(sample.payload().to_bytes().to_vec())),
            Err(err) => {
                let reason = err
                    .payload()
                    .try_to_string()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| "undecodable error".into());
                if reason.to_lowercase().contains("timeout") {
                    Err(BusError::Timeout(subject.into()))
                } else {
                    Err(BusError::Rejected(subject.into(), reason))
                }
            }
        }
    }

    async fn drain(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::Release);
        self.inflight.wait_idle().await;
        self.session.close().await.map_err(BusError::transport)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Err(e) = self.session.close().await {
            tracing::warn!("failed to close zenoh session: {}", e);
        }
    }
}

struct ZenohSubscription {
    subject: String,
    queryable: Option<Queryable<()>>,
}

#[async_trait::async_trait]
impl Subscription for ZenohSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<(), BusError> {
        if let Some(q) = self.queryable.take() {
            q.undeclare().await.map_err(BusError::transport)?;
        }
        Ok(())
    }
}

struct ZenohReply {
    query: Query,
    _guard: InFlightGuard,
}

#[async_trait::async_trait]
impl ReplySink for ZenohReply {
    async fn send(self: Box<Self>, body: Bytes) -> Result<(), BusError> {
        self.query
            .reply(self.query.key_expr().clone(), ZBytes::from(body.to_vec()))
            .await
            .map_err(BusError::transport)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::ZenohBus;
    use crate::{BusError, Headers, MessageBus};

    async fn loopback() -> ZenohBus {
        let mut conf = zenoh::Config::default();
        conf.insert_json5("listen/endpoints", "[]").unwrap();
        conf.insert_json5("scouting/multicast/enabled", "false").unwrap();
        ZenohBus::open(conf).await.unwrap()
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn request_roundtrip_carries_headers() {
        let bus = loopback().await;
        let (tx, rx) = flume::bounded(8);
        let sub = bus
            .subscribe("nimbus.test.echo", Some("g"), tx)
            .await
            .unwrap();
        tokio::spawn(async move {
            while let Ok(mut msg) = rx.recv_async().await {
                let name = msg.headers().get("fileName").unwrap_or("-").to_string();
                let _ = msg.respond(name).await;
            }
        });

        let out = bus
            .request(
                "nimbus.test.echo",
                Headers::new().with("fileName", "/a/b"),
                Bytes::from_static(b"x"),
                Duration::from_secs(3),
            )
            .await
            .unwrap();
        assert_eq!(&out[..], b"/a/b");
        sub.unsubscribe().await.unwrap();
        bus.drain().await.unwrap();
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn request_without_queryable_fails() {
        let bus = loopback().await;
        let res = bus
            .request(
                "nimbus.test.nobody",
                Headers::new(),
                Bytes::new(),
                Duration::from_millis(500),
            )
            .await;
        assert!(matches!(
            res,
            Err(BusError::NoResponders(_)) | Err(BusError::Timeout(_))
        ));
        bus.close().await;
    }
}

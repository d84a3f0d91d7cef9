//! In-process [`MessageBus`] used by tests and embedded deployments.
//!
//! Subjects are matched exactly. Plain subscribers each receive a copy of a
//! request, queue-group members share it round-robin. The first response
//! wins.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, oneshot};

use crate::{
    BusError, Headers, InFlight, InFlightGuard, Message, MessageBus,
    ReplySink, Subscription,
};

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<MemoryBusInner>,
}

#[derive(Default)]
struct MemoryBusInner {
    subs: Mutex<HashMap<String, Vec<MemorySub>>>,
    next_id: AtomicU64,
    round_robin: AtomicUsize,
    inflight: InFlight,
    closed: AtomicBool,
}

#[derive(Clone)]
struct MemorySub {
    id: u64,
    queue_group: Option<String>,
    sink: flume::Sender<Message>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.inner
            .subs
            .lock()
            .map(|subs| subs.get(subject).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.inflight.count()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn route(&self, subject: &str) -> Vec<flume::Sender<Message>> {
        let Ok(subs) = self.inner.subs.lock() else {
            return vec![];
        };
        let Some(entries) = subs.get(subject) else {
            return vec![];
        };
        let mut targets = vec![];
        let mut groups: HashMap<&str, Vec<&MemorySub>> = HashMap::new();
        for sub in entries {
            match &sub.queue_group {
                Some(group) => groups.entry(group.as_str()).or_default().push(sub),
                None => targets.push(sub.sink.clone()),
            }
        }
        let turn = self.inner.round_robin.fetch_add(1, Ordering::Relaxed);
        for members in groups.values() {
            targets.push(members[turn % members.len()].sink.clone());
        }
        targets
    }

    fn clear(&self) {
        if let Ok(mut subs) = self.inner.subs.lock() {
            subs.clear();
        }
    }
}

#[async_trait::async_trait]
impl MessageBus for MemoryBus {
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        sink: flume::Sender<Message>,
    ) -> Result<Box<dyn Subscription>, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self
            .inner
            .subs
            .lock()
            .map_err(|e| BusError::transport(e.to_string()))?;
        subs.entry(subject.to_string()).or_default().push(MemorySub {
            id,
            queue_group: queue_group.map(String::from),
            sink,
        });
        tracing::debug!(subject, ?queue_group, id, "memory bus subscribe");
        Ok(Box::new(MemorySubscription {
            bus: self.clone(),
            subject: subject.to_string(),
            id,
        }))
    }

    async fn request(
        &self,
        subject: &str,
        headers: Headers,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let targets = self.route(subject);
        if targets.is_empty() {
            return Err(BusError::NoResponders(subject.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(AsyncMutex::new(Some(tx)));
        let exchange = async {
            for sink in targets {
                let reply = MemoryReply {
                    slot: slot.clone(),
                    _guard: self.inner.inflight.guard(),
                };
                let msg = Message::new(
                    subject,
                    headers.clone(),
                    Some(payload.clone()),
                )
                .with_reply(Box::new(reply));
                if sink.send_async(msg).await.is_err() {
                    tracing::debug!(subject, "memory bus: subscriber queue closed");
                }
            }
            drop(slot);
            rx.await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(BusError::NoResponse(subject.to_string())),
            Err(_) => Err(BusError::Timeout(subject.to_string())),
        }
    }

    async fn drain(&self) -> Result<(), BusError> {
        self.inner.closed.store(true, Ordering::Release);
        self.clear();
        self.inner.inflight.wait_idle().await;
        Ok(())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.clear();
    }
}

struct MemorySubscription {
    bus: MemoryBus,
    subject: String,
    id: u64,
}

#[async_trait::async_trait]
impl Subscription for MemorySubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), BusError> {
        let mut subs = self
            .bus
            .inner
            .subs
            .lock()
            .map_err(|e| BusError::transport(e.to_string()))?;
        if let Some(entries) = subs.get_mut(&self.subject) {
            entries.retain(|s| s.id != self.id);
            if entries.is_empty() {
                subs.remove(&self.subject);
            }
        }
        Ok(())
    }
}

struct MemoryReply {
    slot: Arc<AsyncMutex<Option<oneshot::Sender<Bytes>>>>,
    _guard: InFlightGuard,
}

#[async_trait::async_trait]
impl ReplySink for MemoryReply {
    async fn send(self: Box<Self>, body: Bytes) -> Result<(), BusError> {
        if let Some(tx) = self.slot.lock().await.take() {
            // requester may have timed out already
            let _ = tx.send(body);
        }
        Ok(())
    }
}

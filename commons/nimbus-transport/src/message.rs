use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::BusError;

/// Header key/value metadata carried next to an opaque payload.
///
/// Lookups are case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overlay `other` on top of `self`; keys present in `other` win.
    pub fn merge(&mut self, other: Headers) {
        self.0.extend(other.0);
    }

    pub fn to_json(&self) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(self).map_err(|e| BusError::Encode(e.to_string()))
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, BusError> {
        serde_json::from_slice(raw).map_err(|e| BusError::Decode(e.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One-shot response channel of a request message.
#[async_trait::async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(self: Box<Self>, body: Bytes) -> Result<(), BusError>;
}

/// An inbound message as delivered by a [`crate::MessageBus`] subscription.
pub struct Message {
    subject: String,
    headers: Headers,
    payload: Option<Bytes>,
    reply: Option<Box<dyn ReplySink>>,
}

impl Message {
    pub fn new(
        subject: impl Into<String>,
        headers: Headers,
        payload: Option<Bytes>,
    ) -> Self {
        Self {
            subject: subject.into(),
            headers,
            payload,
            reply: None,
        }
    }

    pub fn with_reply(mut self, reply: Box<dyn ReplySink>) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// `None` when the sender attached no body at all, as opposed to a
    /// zero-length body.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn has_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Send the response body. A message can be answered once.
    pub async fn respond(
        &mut self,
        body: impl Into<Bytes>,
    ) -> Result<(), BusError> {
        let sink = self
            .reply
            .take()
            .ok_or_else(|| BusError::NoReplyTarget(self.subject.clone()))?;
        sink.send(body.into()).await
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.subject)
            .field("headers", &self.headers)
            .field("payload_len", &self.payload.as_ref().map(Bytes::len))
            .field("has_reply", &self.reply.is_some())
            .finish()
    }
}

/// Counts requests that were delivered but not yet answered.
#[derive(Clone, Default)]
pub struct InFlight {
    inner: Arc<InFlightInner>,
}

#[derive(Default)]
struct InFlightInner {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn guard(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct InFlightGuard {
    inner: Arc<InFlightInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

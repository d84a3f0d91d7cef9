use flume::Sender;
use tokio::task::JoinHandle;

use crate::{BusError, Message, MessageBus, Subscription};

#[async_trait::async_trait]
pub trait Handler<T>: Send + Sync + Clone {
    async fn handle(&self, input: T);
}

#[derive(Debug, Clone)]
pub struct ManagedConfig {
    pub subject: String,
    pub queue_group: Option<String>,
    pub concurrency: usize,
    /// `0` means unbounded.
    pub channel_size: usize,
}

impl ManagedConfig {
    pub fn new(
        subject: impl Into<String>,
        concurrency: usize,
        channel_size: usize,
    ) -> Self {
        Self {
            subject: subject.into(),
            queue_group: None,
            concurrency,
            channel_size,
        }
    }

    pub fn unbounded(subject: impl Into<String>, concurrency: usize) -> Self {
        Self::new(subject, concurrency, 0)
    }

    pub fn with_queue_group(mut self, group: impl Into<String>) -> Self {
        self.queue_group = Some(group.into());
        self
    }
}

/// A subscription plus the worker tasks draining its queue.
pub struct ManagedSubscription {
    subject: String,
    subscription: Option<Box<dyn Subscription>>,
    queue: Option<Sender<Message>>,
    workers: Vec<JoinHandle<()>>,
}

impl ManagedSubscription {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn queue_len(&self) -> usize {
        self.queue.as_ref().map_or(0, Sender::len)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop new deliveries. Messages already queued stay queued.
    pub async fn unsubscribe(&mut self) -> Result<(), BusError> {
        match self.subscription.take() {
            Some(sub) => sub.unsubscribe().await,
            None => Ok(()),
        }
    }

    /// Drop our end of the queue so workers exit once it is empty.
    pub fn close_queue(&mut self) {
        self.queue.take();
    }

    /// Wait for every worker to finish.
    pub async fn join(&mut self) {
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::error!("subscription '{}': worker failed: {}", self.subject, e);
            }
        }
    }

    pub async fn shutdown(&mut self) -> Result<(), BusError> {
        let res = self.unsubscribe().await;
        self.close_queue();
        self.join().await;
        res
    }
}

pub async fn declare_managed_subscription<H>(
    bus: &dyn MessageBus,
    config: ManagedConfig,
    handler: H,
) -> Result<ManagedSubscription, BusError>
where
    H: Handler<Message> + 'static,
{
    let (tx, rx) = if config.channel_size == 0 {
        flume::unbounded()
    } else {
        flume::bounded(config.channel_size)
    };
    let subscription = bus
        .subscribe(&config.subject, config.queue_group.as_deref(), tx.clone())
        .await?;

    tracing::info!(
        "subscription '{}': declare with {} threads",
        config.subject,
        config.concurrency
    );
    let mut workers = Vec::with_capacity(config.concurrency);
    for i in 0..config.concurrency {
        let local_rx = rx.clone();
        let subject = config.subject.clone();
        let local_handler = handler.clone();
        workers.push(tokio::spawn(async move {
            while let Ok(msg) = local_rx.recv_async().await {
                local_handler.handle(msg).await;
            }
            tracing::info!("subscription '{}' {}: stopped", subject, i);
        }));
    }
    Ok(ManagedSubscription {
        subject: config.subject,
        subscription: Some(subscription),
        queue: Some(tx),
        workers,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use bytes::Bytes;

    use super::{Handler, ManagedConfig, declare_managed_subscription};
    use crate::{Headers, MemoryBus, Message, MessageBus};

    #[derive(Clone, Default)]
    struct Counting {
        seen: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Handler<Message> for Counting {
        async fn handle(&self, mut msg: Message) {
            self.seen.fetch_add(1, Ordering::SeqCst);
            let _ = msg.respond(Bytes::from_static(b"ok")).await;
        }
    }

    #[test_log::test(tokio::test)]
    async fn workers_answer_and_stop_after_shutdown() {
        let bus = MemoryBus::new();
        let handler = Counting::default();
        let mut managed = declare_managed_subscription(
            &bus,
            ManagedConfig::new("m.s", 2, 4).with_queue_group("g"),
            handler.clone(),
        )
        .await
        .unwrap();
        assert_eq!(managed.worker_count(), 2);

        for _ in 0..3 {
            let out = bus
                .request("m.s", Headers::new(), Bytes::new(), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(&out[..], b"ok");
        }
        assert_eq!(handler.seen.load(Ordering::SeqCst), 3);

        managed.shutdown().await.unwrap();
        assert_eq!(managed.worker_count(), 0);
        assert_eq!(bus.subscriber_count("m.s"), 0);
    }
}

use std::{sync::Arc, time::Duration};

use nimbus_transport::{MessageBus, ZenohBus, ZenohConfig, util::ManagedSubscription};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    NimbusError,
    blob::{BlobBackend, BlobClient, BlobError, FsBackend, MemoryBackend, spawn_sweeper},
    cli::Mode,
    config::{BackendKind, BlobConfig, NodeConfig},
    context::NodeContext,
    health::{Readiness, start_health_server},
    shard::{ShardHandler, start_shard_handlers},
    state::RuntimeState,
    system::start_system_handlers,
};

/// A running shard node.
pub struct Node {
    ctx: NodeContext,
    readiness: Readiness,
    shard_handlers: Vec<ShardHandler>,
    system_handlers: Vec<ManagedSubscription>,
    health_token: CancellationToken,
    health_task: Option<JoinHandle<()>>,
    sweeper_token: CancellationToken,
    sweeper_task: Option<JoinHandle<()>>,
}

pub async fn build_backend(conf: &BlobConfig) -> Result<Arc<dyn BlobBackend>, NimbusError> {
    match conf.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendKind::Fs => {
            let dir = conf.data_dir.clone().ok_or_else(|| {
                BlobError::ConfigMissing("blob.data_dir is required for the fs backend".into())
            })?;
            let backend = FsBackend::open(dir)
                .await
                .map_err(|e| BlobError::backend("failed to open fs backend", e))?;
            Ok(Arc::new(backend))
        }
    }
}

impl Node {
    /// Connect to zenoh with `NIMBUS_ZENOH_*` settings, open the configured
    /// blob backend and start serving.
    pub async fn start(
        config: NodeConfig,
        mode: Mode,
        zenoh: &ZenohConfig,
    ) -> Result<Self, NimbusError> {
        ensure_supported(mode)?;
        let bus = ZenohBus::connect(zenoh).await?;
        info!("transport connected");
        let backend = build_backend(&config.blob).await?;
        Self::start_with(config, mode, Arc::new(bus), backend).await
    }

    /// Start on an already connected transport and an unprobed backend.
    pub async fn start_with(
        config: NodeConfig,
        mode: Mode,
        bus: Arc<dyn MessageBus>,
        backend: Arc<dyn BlobBackend>,
    ) -> Result<Self, NimbusError> {
        ensure_supported(mode)?;
        config.validate()?;

        let policy = config.blob.lifecycle_policy()?;
        let blob = BlobClient::connect(backend, Some(policy), config.blob.probe_timeout()).await?;
        for bucket in &config.blob.bootstrap_buckets {
            blob.create_bucket(bucket)
                .await
                .map_err(|source| NimbusError::Bootstrap {
                    bucket: bucket.clone(),
                    source,
                })?;
            info!(bucket, "bucket ready");
        }

        let ctx = NodeContext::new(config, bus, blob);
        ctx.state.store(RuntimeState::single_node(ctx.config.shard_count));
        info!("owning {} shards", ctx.config.shard_count);

        let shard_handlers = start_shard_handlers(&ctx).await?;
        let system_handlers = start_system_handlers(&ctx).await?;

        let readiness = Readiness::default();
        let health_token = CancellationToken::new();
        let health_task =
            start_health_server(ctx.config.health_port, readiness.clone(), health_token.clone())
                .await?;
        let sweeper_token = CancellationToken::new();
        let sweeper_task = spawn_sweeper(
            ctx.blob.clone(),
            ctx.config.blob.sweep_interval(),
            sweeper_token.clone(),
        );

        readiness.set_ready(true);
        info!("NimbusDb is running and accepting requests");
        Ok(Self {
            ctx,
            readiness,
            shard_handlers,
            system_handlers,
            health_token,
            health_task: Some(health_task),
            sweeper_token,
            sweeper_task: Some(sweeper_task),
        })
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn shard_handlers(&self) -> &[ShardHandler] {
        &self.shard_handlers
    }

    /// Stop in dependency order: readiness, health server, subscriptions,
    /// grace period, shard queues, transport drain, lifecycle sweeper.
    pub async fn shutdown(mut self) {
        let bus_conf = self.ctx.config.bus.clone();
        info!("shutting down");
        self.readiness.set_ready(false);

        self.health_token.cancel();
        if let Some(task) = self.health_task.take() {
            let _ = task.await;
        }

        info!("unsubscribing from all subjects");
        for handler in &mut self.shard_handlers {
            if let Err(e) = handler.unsubscribe().await {
                warn!(shard = handler.shard_id(), "failed to unsubscribe: {}", e);
            }
        }
        for sub in &mut self.system_handlers {
            if let Err(e) = sub.unsubscribe().await {
                warn!("failed to unsubscribe '{}': {}", sub.subject(), e);
            }
        }

        info!("waiting {:?} for in-flight messages", bus_conf.grace_period());
        tokio::time::sleep(bus_conf.grace_period()).await;

        info!("closing shard queues");
        for handler in &mut self.shard_handlers {
            handler.close_queue();
        }
        for sub in &mut self.system_handlers {
            sub.close_queue();
        }

        info!("draining transport");
        drain_bus(self.ctx.bus.as_ref(), bus_conf.drain_timeout()).await;

        let workers = async {
            for handler in &mut self.shard_handlers {
                handler.join().await;
            }
            for sub in &mut self.system_handlers {
                sub.join().await;
            }
        };
        if tokio::time::timeout(bus_conf.drain_timeout(), workers).await.is_err() {
            warn!("shard workers still busy after {:?}", bus_conf.drain_timeout());
        }

        self.sweeper_token.cancel();
        if let Some(task) = self.sweeper_task.take() {
            let _ = task.await;
        }
        self.ctx.state.clear();
        info!("graceful shutdown complete");
    }
}

fn ensure_supported(mode: Mode) -> Result<(), NimbusError> {
    match mode {
        Mode::Single => Ok(()),
        Mode::Distributed => Err(NimbusError::Unsupported),
    }
}

async fn drain_bus(bus: &dyn MessageBus, timeout: Duration) {
    match tokio::time::timeout(timeout, bus.drain()).await {
        Ok(Ok(())) => info!("transport drained"),
        Ok(Err(e)) => {
            warn!("failed to drain transport: {}", e);
            bus.close().await;
        }
        Err(_) => {
            warn!("transport drain timed out after {:?}, closing", timeout);
            bus.close().await;
        }
    }
}

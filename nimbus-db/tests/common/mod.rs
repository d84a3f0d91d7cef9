#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use nimbus_db::{
    Mode, Node, NodeConfig,
    blob::{
        BackendError, BlobBackend, LifecyclePolicy, MemoryBackend, ObjectInfo, PutInfo,
        SweepReport,
    },
    shard::DbResponse,
};
use nimbus_transport::{BusError, Headers, MemoryBus, MessageBus};

pub const TEST_BUCKET: &str = "gk-test";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct TestConfig {
    pub node_config: NodeConfig,
    /// Added to every object read, write and stat.
    pub backend_delay: Duration,
}

impl TestConfig {
    pub fn new() -> Self {
        let mut node_config = NodeConfig::default();
        node_config.shard_count = 4;
        node_config.health_port = Self::find_free_port();
        node_config.bus.grace_period_ms = 10;
        node_config.bus.drain_timeout_ms = 2_000;
        node_config.bus.queue_capacity = 8;
        node_config.blob.probe_timeout_ms = 1_000;
        node_config.blob.bootstrap_buckets = vec![TEST_BUCKET.to_string()];
        Self {
            node_config,
            backend_delay: Duration::ZERO,
        }
    }

    pub fn with_shard_count(mut self, shard_count: u16) -> Self {
        self.node_config.shard_count = shard_count;
        self
    }

    pub fn with_backend_delay(mut self, delay: Duration) -> Self {
        self.backend_delay = delay;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.node_config.blob.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    fn find_free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .expect("Failed to bind to random port");
        listener.local_addr().expect("Failed to get local addr").port()
    }
}

/// A node running on the in-process bus, with storage calls counted.
pub struct TestEnvironment {
    pub config: TestConfig,
    pub bus: Arc<MemoryBus>,
    pub backend: Arc<CountingBackend>,
    pub node: Option<Node>,
}

impl TestEnvironment {
    pub async fn start(config: TestConfig) -> Self {
        let bus = Arc::new(MemoryBus::new());
        let backend = Arc::new(
            CountingBackend::new(Arc::new(MemoryBackend::new())).with_delay(config.backend_delay),
        );
        let node = Node::start_with(
            config.node_config.clone(),
            Mode::Single,
            bus.clone(),
            backend.clone(),
        )
        .await
        .expect("Failed to start node");
        Self {
            config,
            bus,
            backend,
            node: Some(node),
        }
    }

    pub fn node(&self) -> &Node {
        self.node.as_ref().expect("node already shut down")
    }

    pub async fn request(
        &self,
        shard_id: u16,
        headers: Headers,
        payload: impl Into<Bytes>,
    ) -> Result<Bytes, BusError> {
        self.client().request(shard_id, headers, payload).await
    }

    /// A handle that can keep sending while the node is shut down.
    pub fn client(&self) -> ShardClient {
        ShardClient {
            bus: self.bus.clone(),
            config: self.config.node_config.clone(),
        }
    }

    pub async fn write(
        &self,
        shard_id: u16,
        key: &str,
        data: &'static [u8],
        overwrite: Option<&str>,
    ) -> DbResponse {
        let mut headers = op_headers(0, key);
        if let Some(overwrite) = overwrite {
            headers.insert("overwrite", overwrite);
        }
        let raw = self
            .request(shard_id, headers, Bytes::from_static(data))
            .await
            .expect("write request failed");
        serde_json::from_slice(&raw).expect("write reply is not a DbResponse")
    }

    pub async fn read(&self, shard_id: u16, key: &str) -> Bytes {
        self.request(shard_id, op_headers(1, key), Bytes::new())
            .await
            .expect("read request failed")
    }

    pub async fn shutdown(&mut self) {
        if let Some(node) = self.node.take() {
            node.shutdown().await;
        }
    }
}

#[derive(Clone)]
pub struct ShardClient {
    bus: Arc<MemoryBus>,
    config: NodeConfig,
}

impl ShardClient {
    pub async fn request(
        &self,
        shard_id: u16,
        headers: Headers,
        payload: impl Into<Bytes>,
    ) -> Result<Bytes, BusError> {
        let subject = self.config.shard_subject(shard_id);
        self.bus
            .request(&subject, headers, payload.into(), REQUEST_TIMEOUT)
            .await
    }

    pub async fn write(&self, shard_id: u16, key: &str, data: impl Into<Bytes>) -> DbResponse {
        let raw = self
            .request(shard_id, op_headers(0, key), data)
            .await
            .expect("write request failed");
        serde_json::from_slice(&raw).expect("write reply is not a DbResponse")
    }
}

pub fn op_headers(op: i64, key: &str) -> Headers {
    Headers::new()
        .with("type", op.to_string())
        .with("fileName", key)
        .with("bucketName", TEST_BUCKET)
}

/// Forwards to an inner backend, counts object-level calls and optionally
/// slows them down.
pub struct CountingBackend {
    inner: Arc<dyn BlobBackend>,
    object_calls: AtomicUsize,
    delay: Duration,
}

impl CountingBackend {
    pub fn new(inner: Arc<dyn BlobBackend>) -> Self {
        Self {
            inner,
            object_calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn object_calls(&self) -> usize {
        self.object_calls.load(Ordering::SeqCst)
    }

    async fn hit(&self) {
        self.object_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait::async_trait]
impl BlobBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn list_buckets(&self) -> Result<Vec<String>, BackendError> {
        self.inner.list_buckets().await
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError> {
        self.inner.bucket_exists(bucket).await
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        self.inner.make_bucket(bucket).await
    }

    async fn enable_versioning(&self, bucket: &str) -> Result<(), BackendError> {
        self.inner.enable_versioning(bucket).await
    }

    async fn is_versioned(&self, bucket: &str) -> Result<bool, BackendError> {
        self.inner.is_versioned(bucket).await
    }

    async fn set_lifecycle(
        &self,
        bucket: &str,
        policy: LifecyclePolicy,
    ) -> Result<(), BackendError> {
        self.inner.set_lifecycle(bucket, policy).await
    }

    async fn lifecycle(&self, bucket: &str) -> Result<Option<LifecyclePolicy>, BackendError> {
        self.inner.lifecycle(bucket).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutInfo, BackendError> {
        self.hit().await;
        self.inner.put_object(bucket, key, data).await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Bytes, BackendError> {
        self.hit().await;
        self.inner.get_object(bucket, key, version_id).await
    }

    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectInfo, BackendError> {
        self.hit().await;
        self.inner.stat_object(bucket, key, version_id).await
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<Option<String>, BackendError> {
        self.hit().await;
        self.inner.remove_object(bucket, key).await
    }

    async fn apply_lifecycle(
        &self,
        bucket: &str,
        now: SystemTime,
    ) -> Result<SweepReport, BackendError> {
        self.inner.apply_lifecycle(bucket, now).await
    }
}

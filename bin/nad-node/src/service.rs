//! Node gRPC service implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use nad_common::Error;
use nad_proto::node::node_service_server::NodeService;
use nad_proto::node::{Blob, GetRequest, InfoRequest, InfoResponse, PutResponse};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::store::BackingStore;

/// gRPC method metrics
#[derive(Debug, Default)]
pub struct MethodMetrics {
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,
    pub latency_sum_us: AtomicU64,
    pub bytes: AtomicU64,
}

impl MethodMetrics {
    pub fn record(&self, success: bool, latency_us: u64, bytes: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
            self.bytes.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    fn summary(&self) -> String {
        let total = self.requests_total.load(Ordering::Relaxed);
        let avg_us = self
            .latency_sum_us
            .load(Ordering::Relaxed)
            .checked_div(total)
            .unwrap_or_default();
        format!(
            "total={} ok={} err={} bytes={} avg_latency={}us",
            total,
            self.requests_success.load(Ordering::Relaxed),
            self.requests_error.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            avg_us
        )
    }
}

/// Per-method metrics of one node
#[derive(Debug, Default)]
pub struct NodeMetrics {
    pub info: MethodMetrics,
    pub get: MethodMetrics,
    pub put: MethodMetrics,
}

impl NodeMetrics {
    /// Log one line per method
    pub fn log_summary(&self) {
        info!("Info: {}", self.info.summary());
        info!("Get: {}", self.get.summary());
        info!("Put: {}", self.put.summary());
    }
}

/// Map a backing store error to the status a gateway sees
fn to_status(err: Error) -> Status {
    match err {
        Error::OutOfRange { .. } => Status::invalid_argument(err.to_string()),
        Error::ShortRead { .. } => Status::out_of_range(err.to_string()),
        Error::Configuration(_) => Status::failed_precondition(err.to_string()),
        Error::Timeout => Status::deadline_exceeded(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}

/// Storage node service over one backing store
pub struct StorageNodeService {
    store: Arc<BackingStore>,
    metrics: Arc<NodeMetrics>,
}

impl StorageNodeService {
    pub fn new(store: BackingStore) -> Self {
        Self {
            store: Arc::new(store),
            metrics: Arc::new(NodeMetrics::default()),
        }
    }

    pub fn media_size(&self) -> u64 {
        self.store.media_size()
    }

    pub fn metrics(&self) -> Arc<NodeMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run blocking store I/O off the async workers
    async fn blocking<T, F>(&self, f: F) -> Result<T, Status>
    where
        T: Send + 'static,
        F: FnOnce(&BackingStore) -> nad_common::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| Status::internal(format!("I/O task failed: {e}")))?
            .map_err(to_status)
    }
}

#[tonic::async_trait]
impl NodeService for StorageNodeService {
    async fn info(
        &self,
        _request: Request<InfoRequest>,
    ) -> Result<Response<InfoResponse>, Status> {
        let start = Instant::now();
        let result = self.blocking(BackingStore::report_capacity).await;
        let latency_us = start.elapsed().as_micros() as u64;
        self.metrics.info.record(result.is_ok(), latency_us, 0);
        let media_size = result.inspect_err(|status| {
            warn!("Info failed: {}", status.message());
        })?;
        Ok(Response::new(InfoResponse { media_size }))
    }

    async fn get(&self, request: Request<GetRequest>) -> Result<Response<Blob>, Status> {
        let start = Instant::now();
        let GetRequest { offset, length } = request.into_inner();
        debug!("Get: offset={}, length={}", offset, length);

        let result = self
            .blocking(move |store| store.read_range(offset, length))
            .await;
        let latency_us = start.elapsed().as_micros() as u64;

        match result {
            Ok(data) => {
                self.metrics.get.record(true, latency_us, data.len() as u64);
                Ok(Response::new(Blob {
                    offset,
                    payload: Bytes::from(data),
                }))
            }
            Err(status) => {
                self.metrics.get.record(false, latency_us, 0);
                warn!("Get failed: offset={}, length={}: {}", offset, length, status.message());
                Err(status)
            }
        }
    }

    async fn put(&self, request: Request<Blob>) -> Result<Response<PutResponse>, Status> {
        let start = Instant::now();
        let Blob { offset, payload } = request.into_inner();
        let length = payload.len();
        debug!("Put: offset={}, length={}", offset, length);

        let result = self
            .blocking(move |store| store.write_range(offset, &payload))
            .await;
        let latency_us = start.elapsed().as_micros() as u64;

        match result {
            Ok(written) => {
                self.metrics.put.record(true, latency_us, written);
                Ok(Response::new(PutResponse { status: 0, written }))
            }
            Err(status) => {
                self.metrics.put.record(false, latency_us, 0);
                warn!("Put failed: offset={}, length={}: {}", offset, length, status.message());
                Err(status)
            }
        }
    }
}

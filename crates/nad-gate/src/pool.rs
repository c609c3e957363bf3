//! Storage node connection pool
//!
//! One persistent gRPC channel per configured node, opened once at startup.
//! Every node must report the same capacity; the set is read-only
//! afterwards and dead connections are not re-established.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use nad_common::config::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_MAX_MESSAGE_SIZE, GatewayConfig, node_endpoint,
};
use nad_common::{Error, Result};
use nad_proto::node::node_service_client::NodeServiceClient;
use nad_proto::node::{Blob, GetRequest, InfoRequest};
use tonic::Code;
use tonic::transport::{Channel, Endpoint};
use tracing::{error, info};

/// Remote calls offered by a storage node
#[async_trait]
pub trait BlockNode: Send + Sync {
    /// Address used in logs
    fn address(&self) -> &str;

    /// Media size of the node's backing store
    async fn info(&self) -> Result<u64>;

    /// Read `length` bytes at `offset`
    async fn get(&self, offset: u64, length: u64) -> Result<Bytes>;

    /// Write `payload` at `offset`, returning the bytes written
    async fn put(&self, offset: u64, payload: Bytes) -> Result<u64>;
}

/// Connection settings for node clients
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Bounds every call, including ones nobody waits for any more
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            connect_timeout: Duration::from_secs(5),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl From<&GatewayConfig> for NodeOptions {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            connect_timeout: config.connect_timeout(),
            max_message_size: config.max_message_size,
        }
    }
}

/// gRPC client for one storage node
#[derive(Clone)]
pub struct GrpcNode {
    address: String,
    client: NodeServiceClient<Channel>,
    call_timeout: Duration,
}

impl GrpcNode {
    /// Open the persistent channel to `address`
    pub async fn connect(address: &str, options: &NodeOptions) -> Result<Self> {
        let channel = Endpoint::new(node_endpoint(address))
            .map_err(|e| Error::configuration(format!("invalid node address {address}: {e}")))?
            .connect_timeout(options.connect_timeout)
            .tcp_nodelay(true)
            .connect()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{address}: {e}")))?;

        let client = NodeServiceClient::new(channel)
            .max_decoding_message_size(options.max_message_size)
            .max_encoding_message_size(options.max_message_size);

        info!("Connected to storage node at {}", address);
        Ok(Self {
            address: address.to_string(),
            client,
            call_timeout: options.call_timeout,
        })
    }

    fn status_error(&self, status: &tonic::Status) -> Error {
        match status.code() {
            Code::DeadlineExceeded | Code::Cancelled => Error::Timeout,
            Code::Unavailable => {
                Error::ConnectionFailed(format!("{}: {}", self.address, status.message()))
            }
            _ => Error::remote(format!("{}: {}", self.address, status.message())),
        }
    }
}

#[async_trait]
impl BlockNode for GrpcNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn info(&self) -> Result<u64> {
        let mut client = self.client.clone();
        let response = tokio::time::timeout(self.call_timeout, client.info(InfoRequest {}))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| self.status_error(&e))?;
        Ok(response.into_inner().media_size)
    }

    async fn get(&self, offset: u64, length: u64) -> Result<Bytes> {
        let mut client = self.client.clone();
        let request = GetRequest { offset, length };
        let response = tokio::time::timeout(self.call_timeout, client.get(request))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| self.status_error(&e))?;
        Ok(response.into_inner().payload)
    }

    async fn put(&self, offset: u64, payload: Bytes) -> Result<u64> {
        let mut client = self.client.clone();
        let request = Blob { offset, payload };
        let response = tokio::time::timeout(self.call_timeout, client.put(request))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| self.status_error(&e))?
            .into_inner();
        if response.status != 0 {
            return Err(Error::remote(format!(
                "{}: put returned status {}",
                self.address, response.status
            )));
        }
        Ok(response.written)
    }
}

/// A validated member of the node set
#[derive(Clone)]
pub struct StorageNode {
    pub address: String,
    pub capacity_bytes: u64,
    pub block_size_bytes: u32,
    pub client: Arc<dyn BlockNode>,
}

/// Node set backing one device
pub struct NodePool {
    nodes: Vec<StorageNode>,
    capacity_bytes: u64,
    block_size: u32,
}

impl NodePool {
    /// Connect to every address and validate the set
    pub async fn connect(
        addresses: &[String],
        block_size: u32,
        options: &NodeOptions,
    ) -> Result<Self> {
        if addresses.is_empty() {
            return Err(Error::configuration("no storage nodes configured"));
        }

        let connects = addresses
            .iter()
            .map(|address| GrpcNode::connect(address, options));
        let mut clients: Vec<Arc<dyn BlockNode>> = Vec::with_capacity(addresses.len());
        for result in join_all(connects).await {
            clients.push(Arc::new(result?));
        }

        Self::from_clients(clients, block_size).await
    }

    /// Query capacities and build the pool from already connected clients
    pub async fn from_clients(clients: Vec<Arc<dyn BlockNode>>, block_size: u32) -> Result<Self> {
        if clients.is_empty() {
            return Err(Error::configuration("no storage nodes configured"));
        }
        if block_size == 0 {
            return Err(Error::configuration("block size must be non-zero"));
        }

        let capacities = join_all(clients.iter().map(|client| client.info())).await;

        let mut nodes = Vec::with_capacity(clients.len());
        let mut expected: Option<u64> = None;
        for (client, capacity) in clients.into_iter().zip(capacities) {
            let address = client.address().to_string();
            let capacity = capacity.inspect_err(|e| {
                error!("Failed to query capacity of {}: {}", address, e);
            })?;

            match expected {
                None => expected = Some(capacity),
                Some(expected) if expected != capacity => {
                    return Err(Error::CapacityMismatch {
                        address,
                        expected,
                        actual: capacity,
                    });
                }
                Some(_) => {}
            }

            nodes.push(StorageNode {
                address,
                capacity_bytes: capacity,
                block_size_bytes: block_size,
                client,
            });
        }

        let capacity_bytes = expected.unwrap_or_default();
        if capacity_bytes == 0 || capacity_bytes % u64::from(block_size) != 0 {
            return Err(Error::configuration(format!(
                "capacity {capacity_bytes} is not a non-zero multiple of block size {block_size}"
            )));
        }

        info!(
            "Node pool ready: {} nodes, {} bytes, block size {}",
            nodes.len(),
            capacity_bytes,
            block_size
        );
        Ok(Self {
            nodes,
            capacity_bytes,
            block_size,
        })
    }

    pub fn nodes(&self) -> &[StorageNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Shared capacity, the device's advertised size
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Comma separated addresses, for device descriptions
    pub fn describe(&self) -> String {
        self.nodes
            .iter()
            .map(|n| n.address.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

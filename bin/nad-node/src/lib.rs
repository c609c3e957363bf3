//! NAD storage node
//!
//! Serves byte ranges of one backing file to gateways over gRPC.

pub mod service;
pub mod store;

use std::future::Future;

use nad_proto::node::node_service_server::NodeServiceServer;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

pub use service::{NodeMetrics, StorageNodeService};
pub use store::BackingStore;

/// Serve `service` on an already bound listener until `shutdown` resolves
pub async fn run(
    service: StorageNodeService,
    listener: TcpListener,
    max_message_size: usize,
    shutdown: impl Future<Output = ()>,
) -> Result<(), tonic::transport::Error> {
    let server = NodeServiceServer::new(service)
        .max_decoding_message_size(max_message_size)
        .max_encoding_message_size(max_message_size);

    Server::builder()
        .tcp_nodelay(true)
        .add_service(server)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
}

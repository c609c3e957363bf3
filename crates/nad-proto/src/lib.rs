//! NAD Protocol - gRPC service definitions
//!
//! Generated code for the storage node RPC protocol (`Info`, `Get`, `Put`).

/// Storage node service
pub mod node {
    tonic::include_proto!("nad.node");
}

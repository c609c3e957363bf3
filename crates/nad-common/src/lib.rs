//! NAD Common - Shared types and utilities
//!
//! Error definitions and configuration shared by the storage node service
//! and the block gateway.

pub mod config;
pub mod error;

pub use config::{DeviceConfig, GatewayConfig};
pub use error::{Error, Result};

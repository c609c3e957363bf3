//! Configuration types for NAD
//!
//! The gateway reads an optional TOML file into [`GatewayConfig`]; command
//! line flags are layered on top by the binaries.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default port of the storage node service
pub const DEFAULT_NODE_PORT: u16 = 10000;

/// Default sector size advertised for a device
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// How long a read or write waits for the first replica
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 1000;

/// Upper bound on a single node call, including abandoned ones
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Largest gRPC message exchanged with a node (16 MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Let the kernel pick the unit number on create
pub const UNIT_AUTO: i32 = -1;

/// Root configuration of the gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Sector size advertised to the kernel; shared by all nodes
    pub block_size: u32,
    /// Wait for the first replica before failing an operation (milliseconds)
    pub dispatch_timeout_ms: u64,
    /// Per node call timeout (milliseconds)
    pub call_timeout_ms: u64,
    /// Connection establishment timeout (milliseconds)
    pub connect_timeout_ms: u64,
    /// Maximum gRPC message size in bytes
    pub max_message_size: usize,
    /// Kernel-side request timeout in seconds (0 disables it)
    pub kernel_timeout_secs: u32,
    /// Maximum number of queued kernel requests per device
    pub kernel_max_count: u32,
    /// Devices served by this process
    pub devices: Vec<DeviceConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            connect_timeout_ms: 5000,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            kernel_timeout_secs: 1,
            kernel_max_count: 16,
            devices: Vec::new(),
        }
    }
}

/// One virtual device and the nodes that replicate it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// GEOM Gate unit number (`UNIT_AUTO` on create lets the kernel choose)
    #[serde(default = "default_unit")]
    pub unit: i32,
    /// Storage node addresses (`host:port` or full URIs)
    pub nodes: Vec<String>,
}

fn default_unit() -> i32 {
    UNIT_AUTO
}

impl GatewayConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::configuration(format!("invalid config: {e}")))
    }

    /// Load a TOML file, falling back to defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::configuration(format!("failed to read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&contents)
            }
            None => Ok(Self::default()),
        }
    }

    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject combinations that cannot be served
    pub fn validate(&self) -> Result<()> {
        if self.block_size < 512 || !self.block_size.is_power_of_two() {
            return Err(Error::configuration(format!(
                "block size {} must be a power of two of at least 512",
                self.block_size
            )));
        }
        if self.dispatch_timeout_ms == 0 || self.call_timeout_ms == 0 {
            return Err(Error::configuration("timeouts must be non-zero"));
        }
        if self.devices.is_empty() {
            return Err(Error::configuration("no devices configured"));
        }
        for device in &self.devices {
            if device.nodes.is_empty() {
                return Err(Error::configuration(format!(
                    "device unit {} has no storage nodes",
                    device.unit
                )));
            }
        }
        Ok(())
    }
}

/// Split a comma separated node list, dropping blanks
#[must_use]
pub fn parse_node_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Turn `host:port` into an endpoint URI
#[must_use]
pub fn node_endpoint(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.dispatch_timeout(), Duration::from_secs(1));
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let config = GatewayConfig::from_toml_str(
            r#"
            block_size = 512
            dispatch_timeout_ms = 250

            [[devices]]
            unit = 3
            nodes = ["10.0.0.1:10000", "10.0.0.2:10000"]

            [[devices]]
            nodes = ["10.0.0.3:10000"]
            "#,
        )
        .unwrap();

        assert_eq!(config.block_size, 512);
        assert_eq!(config.dispatch_timeout_ms, 250);
        assert_eq!(config.call_timeout_ms, DEFAULT_CALL_TIMEOUT_MS);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].unit, 3);
        assert_eq!(config.devices[1].unit, UNIT_AUTO);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate() {
        let mut config = GatewayConfig::default();
        assert!(config.validate().is_err());

        config.devices.push(DeviceConfig {
            unit: 0,
            nodes: vec!["a:1".into()],
        });
        config.validate().unwrap();

        config.block_size = 1000;
        assert!(config.validate().is_err());
        config.block_size = 4096;

        config.devices[0].nodes.clear();
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_node_list() {
        assert_eq!(
            parse_node_list(" a:1, b:2,,c:3 "),
            vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]
        );
        assert!(parse_node_list("").is_empty());
        assert_eq!(node_endpoint("a:1"), "http://a:1");
        assert_eq!(node_endpoint("https://a:1"), "https://a:1");
    }
}

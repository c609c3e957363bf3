//! NAD Gateway
//!
//! Exposes GEOM Gate devices whose writes are replicated to every storage
//! node and whose reads are served by the fastest one.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result, bail};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use nad_common::config::{DeviceConfig, GatewayConfig, UNIT_AUTO, parse_node_list};
use nad_gate::platform::open_control;
use nad_gate::{
    CreateRequest, Device, DeviceControl, GateError, GateResult, NodeOptions, NodePool,
    StatsSnapshot, spawn_device,
};
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "nad-gateway")]
#[command(about = "Replicated network-attached disk gateway")]
#[command(version)]
struct Args {
    /// Optional TOML configuration file; flags take precedence
    #[arg(short, long, global = true, env = "NAD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace / debug / info / warn / error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a device sized to the node set and serve it
    Create(DeviceArgs),
    /// Serve an existing device
    Attach(DeviceArgs),
    /// Destroy a device
    Destroy {
        #[arg(short, long, allow_negative_numbers = true)]
        unit: i32,
        /// Destroy even if the device is open
        #[arg(long)]
        force: bool,
    },
    /// Fail all requests queued for a device
    Cancel {
        #[arg(short, long, allow_negative_numbers = true)]
        unit: i32,
    },
}

#[derive(clap::Args, Debug)]
struct DeviceArgs {
    /// Unit number (-1 lets the kernel choose on create)
    #[arg(short, long, allow_negative_numbers = true)]
    unit: Option<i32>,

    /// Storage node addresses, comma separated (host:port)
    #[arg(short, long, value_delimiter = ',')]
    nodes: Vec<String>,

    /// Sector size advertised to the kernel
    #[arg(short, long)]
    block_size: Option<u32>,

    /// Wait for the first replica before failing an operation
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Upper bound on each node call
    #[arg(long)]
    call_timeout_ms: Option<u64>,
}

/// Layer command line values over the configuration file
fn merge(mut config: GatewayConfig, args: &DeviceArgs) -> GatewayConfig {
    if let Some(block_size) = args.block_size {
        config.block_size = block_size;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.dispatch_timeout_ms = timeout_ms;
    }
    if let Some(call_timeout_ms) = args.call_timeout_ms {
        config.call_timeout_ms = call_timeout_ms;
    }

    let nodes: Vec<String> = args.nodes.iter().flat_map(|n| parse_node_list(n)).collect();
    if !nodes.is_empty() {
        config.devices = vec![DeviceConfig {
            unit: args.unit.unwrap_or(UNIT_AUTO),
            nodes,
        }];
    } else if let Some(unit) = args.unit {
        config.devices.retain(|d| d.unit == unit);
    }
    config
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&args.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match &args.command {
        Commands::Create(device_args) => {
            let config = load_config(&args, device_args)?;
            serve_devices(&config, true).await
        }
        Commands::Attach(device_args) => {
            let config = load_config(&args, device_args)?;
            if let Some(device) = config.devices.iter().find(|d| d.unit < 0) {
                usage_error(format!("attach needs an explicit unit, got {}", device.unit));
            }
            serve_devices(&config, false).await
        }
        Commands::Destroy { unit, force } => {
            let control = open_control().context("open GEOM Gate control device")?;
            control
                .destroy(*unit, *force)
                .with_context(|| format!("destroy unit {unit}"))?;
            info!("Destroyed ggate{}", unit);
            Ok(())
        }
        Commands::Cancel { unit } => {
            let control = open_control().context("open GEOM Gate control device")?;
            control
                .cancel(*unit)
                .with_context(|| format!("cancel unit {unit}"))?;
            info!("Cancelled queued requests of ggate{}", unit);
            Ok(())
        }
    }
}

/// Print a usage error and exit without serving
fn usage_error(message: impl std::fmt::Display) -> ! {
    Args::command()
        .error(ErrorKind::MissingRequiredArgument, message)
        .exit()
}

fn load_config(args: &Args, device_args: &DeviceArgs) -> Result<GatewayConfig> {
    let file = GatewayConfig::load(args.config.as_deref()).context("load configuration")?;
    let config = merge(file, device_args);
    if config.devices.is_empty() {
        usage_error("no storage nodes given, use --nodes or a configuration file");
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Serve thread of one device, keyed by its unit
type Worker = (i32, JoinHandle<GateResult<StatsSnapshot>>);

/// Connect every device's node set and run one serve thread per device
async fn serve_devices(config: &GatewayConfig, create: bool) -> Result<()> {
    let control = open_control().context("open GEOM Gate control device")?;
    // All node sets must be usable before the kernel sees any device
    let pools = connect_pools(config).await?;
    let workers = start_devices(control.as_ref(), config, pools, create, &Handle::current())?;
    let units: Vec<i32> = workers.iter().map(|(unit, _)| *unit).collect();

    let joined = tokio::task::spawn_blocking(move || {
        workers
            .into_iter()
            .map(|(unit, worker)| (unit, worker.join()))
            .collect::<Vec<_>>()
    });
    tokio::pin!(joined);

    let results = tokio::select! {
        results = &mut joined => results?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            if !create {
                // Attached devices outlive the gateway
                warn!("Leaving attached devices {:?} in place", units);
                return Ok(());
            }
            for unit in &units {
                if let Err(e) = control.destroy(*unit, true) {
                    warn!("Failed to destroy ggate{}: {}", unit, e);
                }
            }
            joined.await?
        }
    };

    let mut failed = 0;
    for (unit, result) in results {
        match result {
            Ok(Ok(stats)) => info!(
                "ggate{}: reads={} writes={} deletes={} unsupported={} failed={}",
                unit, stats.reads, stats.writes, stats.deletes, stats.unsupported, stats.failed
            ),
            Ok(Err(e)) => {
                error!("ggate{}: {}", unit, e);
                failed += 1;
            }
            Err(_) => {
                error!("{}", GateError::WorkerPanicked { unit });
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} device(s) stopped with an error");
    }
    info!("Gateway shut down gracefully");
    Ok(())
}

async fn connect_pools(config: &GatewayConfig) -> Result<Vec<(i32, Arc<NodePool>)>> {
    let options = NodeOptions::from(config);
    let mut pools = Vec::with_capacity(config.devices.len());
    for device in &config.devices {
        let pool = NodePool::connect(&device.nodes, config.block_size, &options)
            .await
            .with_context(|| format!("connect storage nodes {:?}", device.nodes))?;
        pools.push((device.unit, Arc::new(pool)));
    }
    Ok(pools)
}

/// Create (or attach) and spawn every device.
///
/// On failure, units created so far are force-destroyed, which also ends
/// their serve threads.
fn start_devices(
    control: &dyn DeviceControl,
    config: &GatewayConfig,
    pools: Vec<(i32, Arc<NodePool>)>,
    create: bool,
    handle: &Handle,
) -> Result<Vec<Worker>> {
    let mut created = Vec::new();
    let mut workers = Vec::with_capacity(pools.len());
    for (requested, pool) in pools {
        match start_device(control, config, requested, pool, create, handle, &mut created) {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                for unit in &created {
                    match control.destroy(*unit, true) {
                        Ok(()) => info!("Destroyed ggate{} after failed startup", unit),
                        Err(err) => warn!("Failed to destroy ggate{}: {}", unit, err),
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(workers)
}

fn start_device(
    control: &dyn DeviceControl,
    config: &GatewayConfig,
    requested: i32,
    pool: Arc<NodePool>,
    create: bool,
    handle: &Handle,
    created: &mut Vec<i32>,
) -> Result<Worker> {
    let unit = if create {
        let request = CreateRequest {
            unit: requested,
            media_size: pool.capacity_bytes(),
            sector_size: config.block_size,
            timeout_secs: config.kernel_timeout_secs,
            max_count: config.kernel_max_count,
            info: format!("nad {}", pool.describe()),
        };
        let unit = control.create(&request).context("create device")?;
        created.push(unit);
        unit
    } else {
        requested
    };
    info!(
        "ggate{}: {} bytes on {} nodes ({})",
        unit,
        pool.capacity_bytes(),
        pool.len(),
        pool.describe()
    );

    let bridge = control
        .open_bridge(unit)
        .with_context(|| format!("open control bridge for unit {unit}"))?;
    let device = Device::new(unit, pool, config.dispatch_timeout())?;
    let worker = spawn_device(device, handle.clone(), bridge)
        .with_context(|| format!("spawn worker for unit {unit}"))?;
    Ok((unit, worker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use nad_gate::{BlockNode, BridgeError, ControlBridge, Fetch, PendingOperation, WorkingBuffer};
    use parking_lot::Mutex;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    fn device_args(args: Args) -> DeviceArgs {
        match args.command {
            Commands::Create(d) | Commands::Attach(d) => d,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_create_flags() {
        let args = parse(&[
            "nad-gateway",
            "create",
            "-u",
            "-1",
            "-n",
            "10.0.0.1:10000,10.0.0.2:10000",
            "-b",
            "512",
            "--timeout-ms",
            "250",
        ]);
        let d = device_args(args);
        assert_eq!(d.unit, Some(-1));
        assert_eq!(d.nodes, vec!["10.0.0.1:10000", "10.0.0.2:10000"]);

        let config = merge(GatewayConfig::default(), &d);
        assert_eq!(config.block_size, 512);
        assert_eq!(config.dispatch_timeout_ms, 250);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].unit, UNIT_AUTO);
        config.validate().unwrap();
    }

    #[test]
    fn test_flags_override_file() {
        let file = GatewayConfig::from_toml_str(
            r#"
            block_size = 8192
            call_timeout_ms = 2000

            [[devices]]
            unit = 3
            nodes = ["a:10000", "b:10000"]

            [[devices]]
            unit = 4
            nodes = ["c:10000"]
            "#,
        )
        .unwrap();

        let d = device_args(parse(&["nad-gateway", "attach", "-u", "4", "-b", "4096"]));
        let config = merge(file.clone(), &d);
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.call_timeout_ms, 2000);
        assert_eq!(config.devices, vec![file.devices[1].clone()]);

        let d = device_args(parse(&["nad-gateway", "attach"]));
        assert_eq!(merge(file.clone(), &d).devices.len(), 2);
    }

    #[test]
    fn test_destroy_flags() {
        match parse(&["nad-gateway", "destroy", "-u", "2", "--force"]).command {
            Commands::Destroy { unit, force } => {
                assert_eq!(unit, 2);
                assert!(force);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_malformed_flags_are_rejected() {
        assert!(Args::try_parse_from(["nad-gateway", "destroy"]).is_err());
        assert!(Args::try_parse_from(["nad-gateway", "create", "-b", "four"]).is_err());
        assert!(Args::try_parse_from(["nad-gateway", "resize"]).is_err());
    }

    /// Node that only answers `Info`
    struct FixedNode(u64);

    #[async_trait]
    impl BlockNode for FixedNode {
        fn address(&self) -> &str {
            "fixed:10000"
        }

        async fn info(&self) -> nad_common::Result<u64> {
            Ok(self.0)
        }

        async fn get(&self, _offset: u64, length: u64) -> nad_common::Result<Bytes> {
            Ok(Bytes::from(vec![0; length as usize]))
        }

        async fn put(&self, _offset: u64, payload: Bytes) -> nad_common::Result<u64> {
            Ok(payload.len() as u64)
        }
    }

    struct IdleBridge;

    impl ControlBridge for IdleBridge {
        fn fetch(&mut self, _buffer: &mut WorkingBuffer) -> Result<Fetch, BridgeError> {
            Ok(Fetch::Cancelled)
        }

        fn complete(
            &mut self,
            _op: &PendingOperation,
            _buffer: &mut WorkingBuffer,
        ) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    /// Hands out units from 0 and refuses to create `refused`
    #[derive(Default)]
    struct RecordingControl {
        refused: Option<i32>,
        next_unit: Mutex<i32>,
        destroyed: Mutex<Vec<(i32, bool)>>,
    }

    impl DeviceControl for RecordingControl {
        fn create(&self, request: &CreateRequest) -> Result<i32, BridgeError> {
            if Some(request.unit) == self.refused {
                return Err(BridgeError::Unsupported);
            }
            let mut next = self.next_unit.lock();
            let unit = *next;
            *next += 1;
            Ok(unit)
        }

        fn destroy(&self, unit: i32, force: bool) -> Result<(), BridgeError> {
            self.destroyed.lock().push((unit, force));
            Ok(())
        }

        fn cancel(&self, _unit: i32) -> Result<(), BridgeError> {
            Ok(())
        }

        fn open_bridge(&self, _unit: i32) -> Result<Box<dyn ControlBridge + Send>, BridgeError> {
            Ok(Box::new(IdleBridge))
        }
    }

    fn pools(rt: &tokio::runtime::Runtime, units: &[i32]) -> Vec<(i32, Arc<NodePool>)> {
        units
            .iter()
            .map(|&unit| {
                let clients: Vec<Arc<dyn BlockNode>> = vec![Arc::new(FixedNode(1 << 20))];
                let pool = rt.block_on(NodePool::from_clients(clients, 4096)).unwrap();
                (unit, Arc::new(pool))
            })
            .collect()
    }

    #[test]
    fn test_failed_create_destroys_earlier_units() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let control = RecordingControl {
            refused: Some(7),
            ..Default::default()
        };

        let err = start_devices(
            &control,
            &GatewayConfig::default(),
            pools(&rt, &[UNIT_AUTO, UNIT_AUTO, 7]),
            true,
            rt.handle(),
        )
        .unwrap_err();

        assert!(err.to_string().contains("create device"));
        assert_eq!(*control.destroyed.lock(), vec![(0, true), (1, true)]);
    }

    #[test]
    fn test_started_devices_are_not_destroyed() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let control = RecordingControl::default();

        let workers = start_devices(
            &control,
            &GatewayConfig::default(),
            pools(&rt, &[UNIT_AUTO, UNIT_AUTO]),
            true,
            rt.handle(),
        )
        .unwrap();

        assert_eq!(workers.iter().map(|(u, _)| *u).collect::<Vec<_>>(), vec![0, 1]);
        for (_, worker) in workers {
            assert!(worker.join().unwrap().is_ok());
        }
        assert!(control.destroyed.lock().is_empty());
    }

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }
}

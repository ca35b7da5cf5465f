//! CLI commands.

mod instances;
mod network;
mod power;
mod volumes;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hostlink_driver::config::ENV_PREFIX;
use hostlink_driver::{DriverConfig, HostDriver};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::output::OutputFormat;

/// hostctl - drive a virtualization host from the command line.
#[derive(Debug, Parser)]
#[command(name = "hostctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, env = "HOSTLINK_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Endpoint and credentials. Unset flags fall back to `HOSTLINK_*` variables.
#[derive(Debug, Args)]
struct ConnectionArgs {
    /// Host name or address of the virtualization host.
    #[arg(long, global = true, env = "HOSTLINK_HOST")]
    host: Option<String>,

    /// Management API user.
    #[arg(long, global = true, env = "HOSTLINK_USERNAME")]
    username: Option<String>,

    /// Management API password.
    #[arg(long, global = true, env = "HOSTLINK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Connection scheme (https or http).
    #[arg(long, global = true)]
    scheme: Option<String>,

    /// Seconds between remote task status polls.
    #[arg(long, global = true)]
    poll_interval: Option<f64>,

    /// Give up waiting on a remote task after this many seconds.
    #[arg(long, global = true)]
    task_timeout: Option<u64>,
}

impl ConnectionArgs {
    /// Flag values keyed the way `DriverConfig::from_lookup` asks for them.
    fn overrides(&self) -> Vec<(String, String)> {
        let pairs = [
            ("HOST", self.host.clone()),
            ("USERNAME", self.username.clone()),
            ("PASSWORD", self.password.clone()),
            ("SCHEME", self.scheme.clone()),
            ("TASK_POLL_INTERVAL", self.poll_interval.map(|v| v.to_string())),
            ("TASK_TIMEOUT_SECS", self.task_timeout.map(|v| v.to_string())),
        ];
        pairs
            .into_iter()
            .filter_map(|(name, value)| Some((format!("{ENV_PREFIX}{name}"), value?)))
            .collect()
    }

    fn load(&self) -> Result<DriverConfig> {
        let overrides = self.overrides();
        let config = DriverConfig::from_lookup(|key| {
            overrides
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .or_else(|| std::env::var(key).ok())
        })?;
        Ok(config)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List usable VMs on the host.
    List,

    /// Show power state and sizing of a VM.
    Info(instances::InstanceArgs),

    /// Show diagnostics for a VM.
    Diagnostics(instances::InstanceArgs),

    /// Print the VM's console log.
    Console(instances::InstanceArgs),

    /// Create a VM and power it on.
    Spawn(instances::SpawnArgs),

    /// Power off and unregister a VM.
    Destroy(instances::DestroyArgs),

    /// Snapshot a VM.
    Snapshot(instances::SnapshotArgs),

    #[command(flatten)]
    Power(power::PowerCommand),

    /// Attach, detach or describe iSCSI volumes.
    Volumes(volumes::VolumesCommand),

    /// Prepare host networking for a VM's interfaces.
    Network(network::NetworkCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub fn log_filter(&self) -> String {
        format!("{},hostlink_driver={}", self.log_level, self.log_level)
    }

    pub fn log_json(&self) -> bool {
        self.log_json
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = match self.format.as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        };

        if let Commands::Version = self.command {
            println!("hostctl {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }

        let config = self
            .connection
            .load()
            .context("loading connection settings")?;
        debug!(?config, "Configuration loaded");

        // Ctrl-C abandons in-flight retries and task waits.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, cancelling");
                let _ = shutdown_tx.send(true);
            }
        });

        let ctx = CommandContext {
            driver: HostDriver::over_http(config, shutdown_rx),
            format,
        };

        let result = match self.command {
            Commands::List => instances::list(&ctx).await,
            Commands::Info(args) => instances::info(&ctx, args).await,
            Commands::Diagnostics(args) => instances::diagnostics(&ctx, args).await,
            Commands::Console(args) => instances::console(&ctx, args).await,
            Commands::Spawn(args) => instances::spawn(&ctx, args).await,
            Commands::Destroy(args) => instances::destroy(&ctx, args).await,
            Commands::Snapshot(args) => instances::snapshot(&ctx, args).await,
            Commands::Power(cmd) => cmd.run(&ctx).await,
            Commands::Volumes(cmd) => cmd.run(&ctx).await,
            Commands::Network(cmd) => cmd.run(&ctx).await,
            Commands::Version => Ok(()),
        };

        ctx.driver.close().await;
        result
    }
}

/// Shared command context.
pub struct CommandContext {
    pub driver: HostDriver,
    pub format: OutputFormat,
}

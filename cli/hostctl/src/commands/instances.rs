//! Instance commands (listing, inspection, create and destroy).

use anyhow::Result;
use clap::Args;
use hostlink_driver::{InstanceInfo, InstanceSpec};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_output, print_single, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct InstanceArgs {
    /// VM name.
    instance: String,
}

impl InstanceArgs {
    pub fn name(&self) -> &str {
        &self.instance
    }
}

#[derive(Debug, Args)]
pub struct SpawnArgs {
    /// VM name.
    name: String,

    /// Memory in MiB.
    #[arg(long, default_value = "1024")]
    memory_mb: u64,

    /// Number of virtual CPUs.
    #[arg(long, default_value = "1")]
    vcpus: u32,

    /// Datastore path of the root disk, e.g. "[ds1] images/ubuntu.vmdk".
    #[arg(long)]
    image: String,

    /// Port group for the first NIC.
    #[arg(long)]
    network: Option<String>,
}

#[derive(Debug, Args)]
pub struct DestroyArgs {
    /// VM name.
    instance: String,

    /// Leave the VM's files on the datastore.
    #[arg(long)]
    keep_disks: bool,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// VM name.
    instance: String,

    /// Snapshot name.
    name: String,
}

#[derive(Debug, Serialize, Tabled)]
struct InstanceRow {
    #[tabled(rename = "Name")]
    name: String,
}

#[derive(Debug, Serialize, Tabled)]
struct InfoRow {
    #[tabled(rename = "Instance")]
    instance: String,

    #[tabled(rename = "State")]
    state: String,

    #[tabled(rename = "Max Mem (KiB)")]
    max_mem_kb: u64,

    #[tabled(rename = "Mem (KiB)")]
    mem_kb: u64,

    #[tabled(rename = "vCPUs")]
    num_cpu: u32,
}

impl InfoRow {
    fn new(instance: String, info: InstanceInfo) -> Self {
        Self {
            instance,
            state: info.state.to_string(),
            max_mem_kb: info.max_mem_kb,
            mem_kb: info.mem_kb,
            num_cpu: info.num_cpu,
        }
    }
}

pub async fn list(ctx: &CommandContext) -> Result<()> {
    let rows: Vec<InstanceRow> = ctx
        .driver
        .list_instances()
        .await?
        .into_iter()
        .map(|name| InstanceRow { name })
        .collect();
    print_output(&rows, ctx.format);
    Ok(())
}

pub async fn info(ctx: &CommandContext, args: InstanceArgs) -> Result<()> {
    let info = ctx.driver.get_info(&args.instance).await?;
    print_output(&[InfoRow::new(args.instance, info)], ctx.format);
    Ok(())
}

pub async fn diagnostics(ctx: &CommandContext, args: InstanceArgs) -> Result<()> {
    let info = ctx.driver.get_diagnostics(&args.instance).await?;
    print_single(&info, ctx.format);
    Ok(())
}

pub async fn console(ctx: &CommandContext, args: InstanceArgs) -> Result<()> {
    let log = ctx.driver.console_output(&args.instance).await?;
    match ctx.format {
        OutputFormat::Table => print!("{log}"),
        OutputFormat::Json => print_single(
            &serde_json::json!({ "instance": args.instance, "console": log }),
            ctx.format,
        ),
    }
    Ok(())
}

pub async fn spawn(ctx: &CommandContext, args: SpawnArgs) -> Result<()> {
    let spec = InstanceSpec {
        name: args.name,
        memory_mb: args.memory_mb,
        vcpus: args.vcpus,
        image_path: args.image,
        network: args.network,
    };
    ctx.driver.spawn(&spec).await?;
    print_success(&format!("Instance {} created and powered on", spec.name));
    Ok(())
}

pub async fn destroy(ctx: &CommandContext, args: DestroyArgs) -> Result<()> {
    ctx.driver.destroy(&args.instance, !args.keep_disks).await?;
    print_success(&format!("Instance {} destroyed", args.instance));
    Ok(())
}

pub async fn snapshot(ctx: &CommandContext, args: SnapshotArgs) -> Result<()> {
    let name = ctx.driver.snapshot(&args.instance, &args.name).await?;
    print_success(&format!("Snapshot {name} of {} created", args.instance));
    Ok(())
}

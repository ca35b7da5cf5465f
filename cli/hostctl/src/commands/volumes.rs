//! Volume commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use hostlink_driver::{VolumeConnection, VolumeConnector};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_output, print_success};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct VolumesCommand {
    #[command(subcommand)]
    command: VolumesSubcommand,
}

#[derive(Debug, Subcommand)]
enum VolumesSubcommand {
    /// Attach an iSCSI volume to a VM.
    Attach(VolumeArgs),

    /// Detach an iSCSI volume from a VM.
    Detach(VolumeArgs),

    /// Show what a volume service needs to export volumes to this host.
    Connector(ConnectorArgs),
}

#[derive(Debug, Args)]
struct VolumeArgs {
    /// VM name.
    instance: String,

    /// Guest device, e.g. /dev/sdb.
    #[arg(long)]
    mountpoint: String,

    /// iSCSI target portal (address:port).
    #[arg(long)]
    portal: String,

    /// iSCSI target IQN.
    #[arg(long)]
    iqn: String,

    /// iSCSI LUN.
    #[arg(long, default_value = "0")]
    lun: u32,
}

impl VolumeArgs {
    fn connection(&self) -> VolumeConnection {
        VolumeConnection {
            driver_volume_type: "iscsi".to_string(),
            target_portal: self.portal.clone(),
            target_iqn: self.iqn.clone(),
            target_lun: self.lun,
        }
    }
}

#[derive(Debug, Args)]
struct ConnectorArgs {
    /// VM the connector is requested for.
    instance: String,
}

#[derive(Debug, Serialize, Tabled)]
struct ConnectorRow {
    #[tabled(rename = "IP")]
    ip: String,

    #[tabled(rename = "Host")]
    host: String,

    #[tabled(rename = "Initiator")]
    initiator: String,
}

impl From<VolumeConnector> for ConnectorRow {
    fn from(connector: VolumeConnector) -> Self {
        Self {
            ip: connector.ip,
            host: connector.host,
            initiator: connector.initiator.unwrap_or_else(|| "-".to_string()),
        }
    }
}

impl VolumesCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        match self.command {
            VolumesSubcommand::Attach(args) => {
                ctx.driver
                    .attach_volume(&args.connection(), &args.instance, &args.mountpoint)
                    .await?;
                print_success(&format!(
                    "Volume {} attached to {} at {}",
                    args.iqn, args.instance, args.mountpoint
                ));
                Ok(())
            }
            VolumesSubcommand::Detach(args) => {
                ctx.driver
                    .detach_volume(&args.connection(), &args.instance, &args.mountpoint)
                    .await?;
                print_success(&format!(
                    "Volume {} detached from {}",
                    args.iqn, args.instance
                ));
                Ok(())
            }
            VolumesSubcommand::Connector(args) => {
                let connector = ctx.driver.volume_connector(&args.instance).await?;
                print_output(&[ConnectorRow::from(connector)], ctx.format);
                Ok(())
            }
        }
    }
}

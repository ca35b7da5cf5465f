//! Network commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use hostlink_driver::VifSpec;

use crate::output::print_success;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct NetworkCommand {
    #[command(subcommand)]
    command: NetworkSubcommand,
}

#[derive(Debug, Subcommand)]
enum NetworkSubcommand {
    /// Make sure the port group for a VM's interface exists on the host.
    Plug(VifArgs),

    /// Release a VM's interface. Shared port groups stay on the host.
    Unplug(VifArgs),
}

#[derive(Debug, Args)]
struct VifArgs {
    /// VM name.
    instance: String,

    /// Port group the interface connects to.
    #[arg(long)]
    bridge: String,

    /// VLAN tag; a missing tagged port group is created.
    #[arg(long)]
    vlan: Option<u16>,

    /// Interface identifier used in logs.
    #[arg(long, default_value = "vif-0")]
    vif_id: String,
}

impl VifArgs {
    fn vif(&self) -> VifSpec {
        VifSpec {
            id: self.vif_id.clone(),
            bridge: self.bridge.clone(),
            vlan: self.vlan,
            mac: None,
        }
    }
}

impl NetworkCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        match self.command {
            NetworkSubcommand::Plug(args) => {
                ctx.driver.plug_vifs(&args.instance, &[args.vif()]).await?;
                print_success(&format!(
                    "Port group {} ready for {}",
                    args.bridge, args.instance
                ));
                Ok(())
            }
            NetworkSubcommand::Unplug(args) => {
                ctx.driver.unplug_vifs(&args.instance, &[args.vif()]).await?;
                print_success(&format!(
                    "Interface {} of {} unplugged",
                    args.vif_id, args.instance
                ));
                Ok(())
            }
        }
    }
}

//! Power state commands.

use anyhow::Result;
use clap::Subcommand;

use crate::output::print_success;

use super::instances::InstanceArgs;
use super::CommandContext;

#[derive(Debug, Subcommand)]
pub enum PowerCommand {
    /// Reboot through the guest, or reset when guest tools are not running.
    Reboot(InstanceArgs),

    /// Pause a running VM.
    Pause(InstanceArgs),

    /// Unpause a paused VM.
    Unpause(InstanceArgs),

    /// Suspend a running VM.
    Suspend(InstanceArgs),

    /// Resume a suspended VM.
    Resume(InstanceArgs),
}

impl PowerCommand {
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        let driver = &ctx.driver;
        let (instance, verb) = match &self {
            PowerCommand::Reboot(args) => {
                driver.reboot(args.name()).await?;
                (args.name(), "rebooted")
            }
            PowerCommand::Pause(args) => {
                driver.pause(args.name()).await?;
                (args.name(), "paused")
            }
            PowerCommand::Unpause(args) => {
                driver.unpause(args.name()).await?;
                (args.name(), "unpaused")
            }
            PowerCommand::Suspend(args) => {
                driver.suspend(args.name()).await?;
                (args.name(), "suspended")
            }
            PowerCommand::Resume(args) => {
                driver.resume(args.name()).await?;
                (args.name(), "resumed")
            }
        };
        print_success(&format!("Instance {instance} {verb}"));
        Ok(())
    }
}

//! hostctl - operator CLI for a single virtualization host
//!
//! Runs one driver operation per invocation against the host named by
//! `--host` / `HOSTLINK_HOST`, then logs out.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so tables and JSON on stdout stay clean.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_filter().into());
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if cli.log_json() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt).init();
    }

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}

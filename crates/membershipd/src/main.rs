//! membershipd - heartbeat gossip membership daemon
//!
//! Joins the group through the introducer and keeps a live view of its
//! members until interrupted.

use clap::Parser;
use membershipd::config::Config;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("membershipd={level}").parse()?)
        .add_directive(format!("membership_core={level}").parse()?)
        .add_directive(format!("membership_net={level}").parse()?);

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();

    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        "membershipd v{} - heartbeat gossip membership daemon",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = membershipd::service::run(config).await {
        error!("Node error: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

//! membership-sim - in-process heartbeat gossip simulation

use clap::Parser;
use membership_sim::{scenario, Config, Report};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let level = if config.verbose { "debug" } else { "info" };
    // Keep protocol chatter below the report unless asked for
    let protocol = if config.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("membership_sim={level}").parse()?)
        .add_directive(format!("membership_core={protocol}").parse()?)
        .add_directive(format!("membership_net={protocol}").parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(())
}

fn summarize(report: &Report) {
    info!(
        sent = report.network.sent,
        dropped = report.network.dropped,
        delivered = report.network.delivered,
        "network"
    );
    match report.full_view_at {
        Some(tick) => info!(tick, "all {} nodes held the full group", report.nodes),
        None => warn!("group never reached a full view"),
    }
    for crash in &report.crashes {
        info!(
            node = %crash.addr,
            crashed_at = crash.crashed_at,
            detected_by = crash.detections.len(),
            max_latency = ?crash.max_latency(),
            missed = crash.missed.len(),
            "crash"
        );
    }
    if report.false_removals > 0 {
        warn!(count = report.false_removals, "live members removed");
    }
    if report.failed_joins > 0 {
        warn!(count = report.failed_joins, "nodes failed to join");
    }
    for view in &report.views {
        info!(
            node = %view.addr,
            joined = view.joined,
            failed = view.failed,
            heartbeat = view.heartbeat,
            members = view.members,
            "view"
        );
    }
    info!(converged = report.converged, "simulation finished");
}

fn main() -> ExitCode {
    let config = Config::parse();

    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let report = match scenario::run(&config) {
        Ok(report) => report,
        Err(e) => {
            error!("Simulation error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!("Failed to encode report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        summarize(&report);
    }

    ExitCode::SUCCESS
}

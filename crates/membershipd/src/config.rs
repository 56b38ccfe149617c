//! Configuration for membershipd

use clap::Parser;
use membership_core::ProtocolParams;
use std::net::SocketAddrV4;

/// membershipd - heartbeat gossip membership daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "membershipd")]
#[command(author, version, about = "Heartbeat gossip membership daemon", long_about = None)]
pub struct Config {
    /// UDP listen address
    #[arg(short, long, default_value = "127.0.0.1:7400")]
    pub listen: SocketAddrV4,

    /// Address peers should use to reach us (defaults to --listen)
    #[arg(long)]
    pub advertise: Option<SocketAddrV4>,

    /// Well-known introducer; the node listening here boots the group
    #[arg(long, env = "MEMBERSHIP_INTRODUCER", default_value = "127.0.0.1:7400")]
    pub introducer: SocketAddrV4,

    /// Length of one protocol tick in milliseconds
    #[arg(long, default_value = "100")]
    pub tick_ms: u64,

    /// Log a membership summary every N ticks (0 disables)
    #[arg(long, default_value = "50")]
    pub report_every: u64,

    #[command(flatten)]
    pub protocol: ProtocolParams,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Address this node announces in every message
    pub fn advertised(&self) -> SocketAddrV4 {
        self.advertise.unwrap_or(self.listen)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.advertised().ip().is_unspecified() {
            anyhow::bail!("Listening on an unspecified address requires --advertise");
        }
        if self.tick_ms == 0 {
            anyhow::bail!("Tick length must be positive");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        self.protocol.validate()?;
        Ok(())
    }
}

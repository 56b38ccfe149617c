//! membership-sim configuration

use clap::Parser;
use membership_core::ProtocolParams;

/// In-process simulation of a heartbeat gossip group
#[derive(Parser, Debug, Clone)]
#[command(name = "membership-sim")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Number of nodes (node 0 is the introducer)
    #[arg(long, default_value = "10")]
    pub nodes: usize,

    /// Total ticks to simulate
    #[arg(long, default_value = "200")]
    pub ticks: u64,

    /// Ticks between consecutive node start-ups
    #[arg(long, default_value = "1")]
    pub step: u64,

    /// Probability that any single message is lost
    #[arg(long, default_value = "0.0")]
    pub drop_rate: f64,

    /// Number of non-introducer nodes to crash
    #[arg(long, default_value = "1")]
    pub fail_count: usize,

    /// Tick at which the crashes happen
    #[arg(long, default_value = "100")]
    pub fail_at: u64,

    /// Seed for message loss, crash selection and gossip targets
    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[command(flatten)]
    pub protocol: ProtocolParams,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.nodes == 0 {
            anyhow::bail!("At least one node is required");
        }
        if self.fail_count >= self.nodes {
            anyhow::bail!(
                "Cannot crash {} of {} nodes; the introducer always survives",
                self.fail_count,
                self.nodes
            );
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            anyhow::bail!("Drop rate must be within [0, 1]");
        }
        if self.fail_count > 0 && self.fail_at >= self.ticks {
            anyhow::bail!("Crash tick {} is past the end of the run", self.fail_at);
        }
        self.protocol.validate()?;
        Ok(())
    }
}

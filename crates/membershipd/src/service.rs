//! membershipd service loop

use crate::config::Config;
use anyhow::Context;
use membership_core::{ManualClock, Node, NodeAddress};
use membership_net::UdpTransport;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Run one node until shutdown. Returns an error if the node cannot join
/// the group.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let transport = UdpTransport::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    let clock = ManualClock::new();
    let addr = NodeAddress::from(config.advertised());
    let introducer = NodeAddress::from(config.introducer);

    let mut node = Node::new(addr, introducer, config.protocol.clone(), transport, clock.clone())?;
    info!(
        node = %addr,
        %introducer,
        tick_ms = config.tick_ms,
        "starting membership node"
    );
    node.start();

    let mut ticker = interval(Duration::from_millis(config.tick_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = clock.advance();
                node.on_tick().context("node left service")?;

                for event in node.drain_events() {
                    debug!(?event, "membership event");
                }
                if config.report_every > 0 && now % config.report_every == 0 {
                    info!(
                        tick = now,
                        joined = node.is_joined(),
                        heartbeat = node.heartbeat(),
                        members = node.member_count(),
                        "membership"
                    );
                }
            }
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!(
        members = node.member_count(),
        heartbeat = node.heartbeat(),
        "Shutting down..."
    );
    Ok(())
}

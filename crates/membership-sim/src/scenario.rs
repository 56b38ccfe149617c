//! Scripted group run: staggered joins, one crash wave, detection report

use crate::config::Config;
use membership_core::{MembershipEvent, NodeAddress, ProtocolParams, Tick};
use membership_net::{Cluster, NetworkStats};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Final state of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub addr: String,
    pub joined: bool,
    pub failed: bool,
    pub heartbeat: u64,
    pub members: usize,
}

/// One observer removing a crashed node
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub observer: String,
    pub removed_at: Tick,
    pub latency: Tick,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrashReport {
    pub addr: String,
    pub crashed_at: Tick,
    pub detections: Vec<Detection>,
    /// Running nodes that still list the crashed node at the end of the run
    pub missed: Vec<String>,
}

impl CrashReport {
    pub fn max_latency(&self) -> Option<Tick> {
        self.detections.iter().map(|d| d.latency).max()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub nodes: usize,
    pub ticks: Tick,
    pub drop_rate: f64,
    pub seed: u64,
    pub params: ProtocolParams,
    pub network: NetworkStats,
    /// First tick at which every node held the complete group
    pub full_view_at: Option<Tick>,
    /// Whether running views agree at the end of the run
    pub converged: bool,
    pub failed_joins: usize,
    /// Removals of nodes that never crashed
    pub false_removals: u64,
    pub crashes: Vec<CrashReport>,
    pub views: Vec<NodeView>,
}

/// Run the scenario described by `config` to completion.
pub fn run(config: &Config) -> anyhow::Result<Report> {
    let mut cluster = Cluster::new(
        config.nodes,
        config.protocol.clone(),
        config.drop_rate,
        config.seed,
    )?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let candidates: Vec<usize> = (1..config.nodes).collect();
    let mut victims: Vec<usize> = candidates
        .choose_multiple(&mut rng, config.fail_count)
        .copied()
        .collect();
    victims.sort_unstable();

    let mut crashed: HashMap<NodeAddress, Tick> = HashMap::new();
    let mut detections: HashMap<NodeAddress, Vec<Detection>> = HashMap::new();
    let mut full_view_at = None;
    let mut false_removals = 0;

    info!(
        nodes = config.nodes,
        ticks = config.ticks,
        drop_rate = config.drop_rate,
        seed = config.seed,
        "starting simulation"
    );

    for _ in 0..config.ticks {
        let now = cluster.now();
        for index in 0..cluster.len() {
            if index as u64 * config.step == now {
                debug!(node = %Cluster::address(index), tick = now, "starting node");
                cluster.start(index);
            }
        }
        if !victims.is_empty() && now == config.fail_at {
            for &index in &victims {
                info!(node = %Cluster::address(index), tick = now, "crashing node");
                cluster.crash(index);
                crashed.insert(Cluster::address(index), now);
            }
        }

        for (observer, event) in cluster.tick() {
            if let MembershipEvent::MemberRemoved { addr, at } = event {
                match crashed.get(&addr) {
                    Some(&crashed_at) => {
                        detections.entry(addr).or_default().push(Detection {
                            observer: observer.to_string(),
                            removed_at: at,
                            latency: at.saturating_sub(crashed_at),
                        });
                    }
                    None => {
                        debug!(%observer, victim = %addr, tick = at, "false removal");
                        false_removals += 1;
                    }
                }
            }
        }

        if full_view_at.is_none()
            && cluster.running().count() == cluster.len()
            && cluster.converged()
        {
            full_view_at = Some(cluster.now());
        }
    }

    let crashes = victims
        .iter()
        .map(|&index| {
            let addr = Cluster::address(index);
            let missed = cluster
                .running()
                .filter(|node| node.members().iter().any(|e| e.addr == addr))
                .map(|node| node.addr().to_string())
                .collect();
            CrashReport {
                addr: addr.to_string(),
                crashed_at: crashed.get(&addr).copied().unwrap_or(config.fail_at),
                detections: detections.remove(&addr).unwrap_or_default(),
                missed,
            }
        })
        .collect();

    let views = cluster
        .nodes()
        .iter()
        .map(|node| NodeView {
            addr: node.addr().to_string(),
            joined: node.is_joined(),
            failed: node.is_failed(),
            heartbeat: node.heartbeat(),
            members: node.member_count(),
        })
        .collect();

    let failed_joins = (0..cluster.len())
        .filter(|index| !victims.contains(index) && cluster.node(*index).is_failed())
        .count();

    Ok(Report {
        nodes: config.nodes,
        ticks: config.ticks,
        drop_rate: config.drop_rate,
        seed: config.seed,
        params: config.protocol.clone(),
        network: cluster.network().stats(),
        full_view_at,
        converged: cluster.converged(),
        failed_joins,
        false_removals,
        crashes,
        views,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["membership-sim"];
        argv.extend_from_slice(args);
        Config::parse_from(argv)
    }

    #[test]
    fn test_crash_detected_by_every_survivor() {
        let config = config(&["--nodes", "6", "--ticks", "80", "--fail-at", "30"]);
        let report = run(&config).unwrap();

        assert_eq!(report.crashes.len(), 1);
        let crash = &report.crashes[0];
        assert_eq!(crash.crashed_at, 30);
        assert_eq!(crash.detections.len(), 5);
        assert!(crash.missed.is_empty());
        for detection in &crash.detections {
            assert!(detection.latency > report.params.t_fail);
            assert!(detection.latency <= report.params.t_remove + 10);
        }

        assert!(report.converged);
        assert!(report.full_view_at.is_some_and(|t| t < 30));
        assert_eq!(report.false_removals, 0);
        assert_eq!(report.failed_joins, 0);
        assert_eq!(report.views.iter().filter(|v| v.failed).count(), 1);
        for view in report.views.iter().filter(|v| !v.failed) {
            assert_eq!(view.members, 5);
        }
    }

    #[test]
    fn test_no_crashes() {
        let config = config(&["--nodes", "5", "--ticks", "40", "--fail-count", "0"]);
        let report = run(&config).unwrap();

        assert!(report.crashes.is_empty());
        assert!(report.converged);
        assert!(report.views.iter().all(|v| v.joined && v.members == 5));
    }

    #[test]
    fn test_same_seed_same_report() {
        let config = config(&[
            "--nodes", "6", "--ticks", "60", "--fail-at", "30", "--drop-rate", "0.1",
        ]);
        let first = serde_json::to_string(&run(&config).unwrap()).unwrap();
        let second = serde_json::to_string(&run(&config).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_introducer_never_crashed() {
        let config = config(&[
            "--nodes", "4", "--ticks", "50", "--fail-count", "3", "--fail-at", "20",
        ]);
        let report = run(&config).unwrap();

        let introducer = Cluster::address(0).to_string();
        assert!(report.crashes.iter().all(|c| c.addr != introducer));
        assert!(!report.views[0].failed);
        assert_eq!(report.views[0].members, 1);
    }
}

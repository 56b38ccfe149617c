//! Emulated network and cluster harness
//!
//! [`SimNetwork`] keeps one FIFO inbox per address and loses each send with
//! a fixed probability. [`Cluster`] runs a group of nodes over it against a
//! shared [`ManualClock`], one `on_tick` per node per tick.

use bytes::Bytes;
use membership_core::{
    Clock, Error, JoinState, ManualClock, MembershipEvent, Node, NodeAddress, ProtocolParams, Tick,
    Transport, TransportError,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::warn;

/// Messages queued per inbox before further sends are dropped
const DEFAULT_INBOX_CAPACITY: usize = 30_000;

/// Traffic counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub sent: u64,
    pub dropped: u64,
    pub delivered: u64,
}

struct Inner {
    inboxes: HashMap<NodeAddress, VecDeque<Bytes>>,
    rng: StdRng,
    drop_rate: f64,
    capacity: usize,
    stats: NetworkStats,
}

/// Lossy in-memory network shared by every endpoint
pub struct SimNetwork {
    inner: Mutex<Inner>,
}

impl SimNetwork {
    pub fn new(drop_rate: f64, seed: u64) -> Arc<Self> {
        Self::with_capacity(drop_rate, seed, DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(drop_rate: f64, seed: u64, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                inboxes: HashMap::new(),
                rng: StdRng::seed_from_u64(seed),
                drop_rate: drop_rate.clamp(0.0, 1.0),
                capacity,
                stats: NetworkStats::default(),
            }),
        })
    }

    /// Transport handle bound to `addr`.
    pub fn endpoint(self: &Arc<Self>, addr: NodeAddress) -> SimEndpoint {
        SimEndpoint {
            addr,
            network: Arc::clone(self),
        }
    }

    pub fn set_drop_rate(&self, drop_rate: f64) {
        self.inner.lock().drop_rate = drop_rate.clamp(0.0, 1.0);
    }

    pub fn stats(&self) -> NetworkStats {
        self.inner.lock().stats
    }

    /// Messages waiting in `addr`'s inbox.
    pub fn pending(&self, addr: NodeAddress) -> usize {
        self.inner
            .lock()
            .inboxes
            .get(&addr)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    fn deliver(&self, to: NodeAddress, payload: Bytes) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.stats.sent += 1;

        let lost = inner.drop_rate > 0.0 && inner.rng.gen_bool(inner.drop_rate);
        let inbox = inner.inboxes.entry(to).or_default();
        if lost || inbox.len() >= inner.capacity {
            inner.stats.dropped += 1;
            return;
        }
        inbox.push_back(payload);
    }

    fn take(&self, addr: NodeAddress) -> Vec<Bytes> {
        let mut inner = self.inner.lock();
        let drained: Vec<Bytes> = match inner.inboxes.get_mut(&addr) {
            Some(inbox) => inbox.drain(..).collect(),
            None => Vec::new(),
        };
        inner.stats.delivered += drained.len() as u64;
        drained
    }
}

/// One address's view of a [`SimNetwork`]
pub struct SimEndpoint {
    addr: NodeAddress,
    network: Arc<SimNetwork>,
}

impl SimEndpoint {
    pub fn addr(&self) -> NodeAddress {
        self.addr
    }
}

impl Transport for SimEndpoint {
    fn send(
        &mut self,
        _from: NodeAddress,
        to: NodeAddress,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        // Loss is silent, as on a real datagram network
        self.network.deliver(to, payload);
        Ok(())
    }

    fn receive(&mut self) -> Vec<Bytes> {
        self.network.take(self.addr)
    }
}

/// A simulated group sharing one network and one clock.
///
/// Node `i` lives at `(i + 1, 0)`; node 0 is the introducer.
pub struct Cluster {
    network: Arc<SimNetwork>,
    clock: ManualClock,
    nodes: Vec<Node<SimEndpoint, ManualClock>>,
}

impl Cluster {
    pub fn new(
        size: usize,
        params: ProtocolParams,
        drop_rate: f64,
        seed: u64,
    ) -> Result<Self, Error> {
        let network = SimNetwork::new(drop_rate, seed);
        let clock = ManualClock::new();
        let introducer = Self::address(0);

        let nodes = (0..size)
            .map(|i| {
                let addr = Self::address(i);
                Node::new(addr, introducer, params.clone(), network.endpoint(addr), clock.clone())
                    .map(|node| node.with_rng_seed(seed.wrapping_add(i as u64 + 1)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            network,
            clock,
            nodes,
        })
    }

    pub fn address(index: usize) -> NodeAddress {
        NodeAddress::new(index as u32 + 1, 0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    pub fn node(&self, index: usize) -> &Node<SimEndpoint, ManualClock> {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[Node<SimEndpoint, ManualClock>] {
        &self.nodes
    }

    pub fn start(&mut self, index: usize) {
        self.nodes[index].start();
    }

    pub fn start_all(&mut self) {
        for node in &mut self.nodes {
            node.start();
        }
    }

    pub fn crash(&mut self, index: usize) {
        self.nodes[index].crash();
    }

    /// Advance the clock and tick every started node in index order.
    /// Returns the membership events recorded during the tick.
    pub fn tick(&mut self) -> Vec<(NodeAddress, MembershipEvent)> {
        let now = self.clock.advance();
        let mut events = Vec::new();
        for node in &mut self.nodes {
            if node.join_state() != JoinState::Uninitialized && !node.is_failed() {
                if let Err(e) = node.on_tick() {
                    warn!(node = %node.addr(), tick = now, "node stopped: {}", e);
                }
            }
            let addr = node.addr();
            events.extend(node.drain_events().into_iter().map(|event| (addr, event)));
        }
        events
    }

    pub fn run(&mut self, ticks: u64) -> Vec<(NodeAddress, MembershipEvent)> {
        (0..ticks).flat_map(|_| self.tick()).collect()
    }

    /// Nodes that joined and have not failed.
    pub fn running(&self) -> impl Iterator<Item = &Node<SimEndpoint, ManualClock>> {
        self.nodes.iter().filter(|n| n.is_joined() && !n.is_failed())
    }

    /// Whether every running node's table holds exactly the running set.
    pub fn converged(&self) -> bool {
        let expected: HashSet<NodeAddress> = self.running().map(|n| n.addr()).collect();
        !expected.is_empty()
            && self.running().all(|node| {
                let view: HashSet<NodeAddress> = node.members().iter().map(|e| e.addr).collect();
                view == expected
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ProtocolParams {
        ProtocolParams::default()
    }

    #[test]
    fn test_network_fifo_per_inbox() {
        let network = SimNetwork::new(0.0, 1);
        let a = NodeAddress::new(1, 0);
        let b = NodeAddress::new(2, 0);
        let mut ea = network.endpoint(a);
        let mut eb = network.endpoint(b);

        for i in 0..3u8 {
            ea.send(a, b, Bytes::from(vec![i])).unwrap();
        }
        assert_eq!(network.pending(b), 3);
        let got: Vec<u8> = eb.receive().iter().map(|p| p[0]).collect();
        assert_eq!(got, vec![0, 1, 2]);
        assert!(eb.receive().is_empty());
        assert!(ea.receive().is_empty());
        assert_eq!(
            network.stats(),
            NetworkStats {
                sent: 3,
                dropped: 0,
                delivered: 3
            }
        );
    }

    #[test]
    fn test_network_total_loss() {
        let network = SimNetwork::new(1.0, 1);
        let a = NodeAddress::new(1, 0);
        let mut ea = network.endpoint(a);
        ea.send(a, a, Bytes::from_static(b"x")).unwrap();
        assert!(ea.receive().is_empty());
        assert_eq!(network.stats().dropped, 1);
    }

    #[test]
    fn test_network_inbox_capacity() {
        let network = SimNetwork::with_capacity(0.0, 1, 2);
        let a = NodeAddress::new(1, 0);
        let mut ea = network.endpoint(a);
        for _ in 0..5 {
            ea.send(a, a, Bytes::from_static(b"x")).unwrap();
        }
        assert_eq!(network.pending(a), 2);
        assert_eq!(network.stats().dropped, 3);
    }

    #[test]
    fn test_cluster_converges_without_loss() {
        let mut cluster = Cluster::new(10, params(), 0.0, 7).unwrap();
        cluster.start_all();
        cluster.run(40);

        assert_eq!(cluster.running().count(), 10);
        assert!(cluster.converged());

        // Every view carries a heartbeat newer than the join-time one
        for node in cluster.running() {
            for entry in node.members() {
                assert!(entry.heartbeat > 0, "{} stale at {}", entry.addr, node.addr());
            }
        }
    }

    #[test]
    fn test_cluster_staggered_start() {
        let mut cluster = Cluster::new(6, params(), 0.0, 11).unwrap();
        for i in 0..cluster.len() {
            cluster.start(i);
            cluster.run(2);
        }
        cluster.run(30);
        assert!(cluster.converged());
        assert_eq!(cluster.node(5).member_count(), 6);
    }

    #[test]
    fn test_crashed_member_evicted_everywhere() {
        let params = params();
        let mut cluster = Cluster::new(8, params.clone(), 0.0, 3).unwrap();
        cluster.start_all();
        cluster.run(20);
        assert!(cluster.converged());

        let victim = Cluster::address(3);
        cluster.crash(3);
        let events = cluster.run(params.t_remove + 30);

        for node in cluster.running() {
            assert!(
                node.members().iter().all(|e| e.addr != victim),
                "{} still lists {}",
                node.addr(),
                victim
            );
            let removed = events.iter().any(|(observer, event)| {
                *observer == node.addr()
                    && matches!(
                        event,
                        MembershipEvent::MemberRemoved { addr, .. } if *addr == victim
                    )
            });
            assert!(removed, "{} never recorded the removal", node.addr());
        }
        assert_eq!(cluster.running().count(), 7);
        assert!(cluster.converged());
    }

    #[test]
    fn test_late_joiner_does_not_revive_crashed_member() {
        let params = params();
        for delay in [params.t_fail + 10, params.t_remove - 1] {
            let mut cluster = Cluster::new(8, params.clone(), 0.0, 13).unwrap();
            for i in 0..7 {
                cluster.start(i);
            }
            cluster.run(20);
            assert!(cluster.converged());

            let victim = Cluster::address(3);
            cluster.crash(3);
            let mut events = cluster.run(delay);
            cluster.start(7);
            events.extend(cluster.run(params.t_remove + 30));

            let revived: Vec<_> = events
                .iter()
                .filter(|(_, event)| {
                    matches!(event, MembershipEvent::MemberAdded { addr, .. } if *addr == victim)
                })
                .collect();
            assert!(revived.is_empty(), "delay {delay}: {revived:?}");

            for node in cluster.running() {
                assert!(node.members().iter().all(|e| e.addr != victim));
            }
            assert_eq!(cluster.running().count(), 7);
            assert!(cluster.converged());
        }
    }

    #[test]
    fn test_removal_waits_for_t_remove() {
        let params = params();
        let mut cluster = Cluster::new(4, params.clone(), 0.0, 5).unwrap();
        cluster.start_all();
        cluster.run(10);

        cluster.crash(2);
        let crashed_at = cluster.now();
        let events = cluster.run(params.t_remove + 10);

        let victim = Cluster::address(2);
        for (_, event) in events {
            if let MembershipEvent::MemberRemoved { addr, at } = event {
                assert_eq!(addr, victim);
                assert!(at > crashed_at + params.t_remove);
            }
        }
    }

    #[test]
    fn test_cluster_converges_with_loss() {
        let params = ProtocolParams {
            join_retries: 10,
            ..ProtocolParams::default()
        };
        let mut cluster = Cluster::new(8, params, 0.1, 21).unwrap();
        cluster.start_all();
        cluster.run(80);

        assert_eq!(cluster.running().count(), 8);
        assert!(cluster.converged());
        assert!(cluster.network().stats().dropped > 0);
    }

    #[test]
    fn test_join_fails_without_introducer() {
        let params = ProtocolParams {
            join_timeout: 2,
            join_retries: 1,
            ..ProtocolParams::default()
        };
        let mut cluster = Cluster::new(3, params, 0.0, 1).unwrap();
        // Introducer never started
        cluster.start(1);
        cluster.start(2);
        cluster.run(10);

        assert!(cluster.node(1).is_failed());
        assert!(cluster.node(2).is_failed());
        assert_eq!(cluster.running().count(), 0);
        assert!(!cluster.converged());
    }
}

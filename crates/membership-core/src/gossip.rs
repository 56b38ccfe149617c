//! Gossip dissemination
//!
//! Each round the node pushes one digest of its live entries to `fanout`
//! distinct live peers picked uniformly at random. Receivers merge every
//! record with the strictly-greater rule, so duplicated, reordered or
//! replayed digests converge to the same table.

use crate::codec::{GossipDigest, Outbound, WireMessage};
use crate::error::Result;
use crate::params::ProtocolParams;
use crate::table::{MembershipTable, Upsert};
use crate::types::{LocalView, MemberEntry, MembershipEvent, NodeAddress, Tick};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

pub struct GossipDisseminator {
    gossip_interval: Tick,
    fanout: usize,
    t_fail: Tick,
    rng: StdRng,
}

impl GossipDisseminator {
    /// Fails with `InvalidParams` when `params` does not validate.
    pub fn new(params: &ProtocolParams) -> Result<Self> {
        Self::with_rng(params, StdRng::from_entropy())
    }

    /// Deterministic target selection for simulations and tests.
    pub fn with_seed(params: &ProtocolParams, seed: u64) -> Result<Self> {
        Self::with_rng(params, StdRng::seed_from_u64(seed))
    }

    fn with_rng(params: &ProtocolParams, rng: StdRng) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            gossip_interval: params.gossip_interval,
            fanout: params.fanout,
            t_fail: params.t_fail,
            rng,
        })
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Whether `now` falls on a dissemination round.
    pub fn is_round(&self, now: Tick) -> bool {
        now % self.gossip_interval == 0
    }

    /// Digest of every live entry, or `None` when there is nobody to tell.
    pub fn build_digest(&self, table: &MembershipTable, local: LocalView) -> Option<GossipDigest> {
        let live: Vec<_> = table
            .live(local.now, self.t_fail)
            .map(MemberEntry::digest_entry)
            .collect();
        if live.len() < 2 {
            return None;
        }
        Some(GossipDigest::new(local.addr, local.heartbeat, live))
    }

    /// Up to `fanout` distinct live peers, never `self_addr`.
    pub fn select_targets(
        &mut self,
        table: &MembershipTable,
        self_addr: NodeAddress,
        now: Tick,
    ) -> Vec<NodeAddress> {
        let candidates: Vec<NodeAddress> = table
            .live(now, self.t_fail)
            .filter(|e| e.addr != self_addr)
            .map(|e| e.addr)
            .collect();
        candidates
            .choose_multiple(&mut self.rng, self.fanout)
            .copied()
            .collect()
    }

    /// Build this round's digest and address a copy to each target.
    pub fn disseminate(&mut self, table: &MembershipTable, local: LocalView) -> Vec<Outbound> {
        let Some(digest) = self.build_digest(table, local) else {
            debug!(node = %local.addr, "fewer than two live members, skipping gossip");
            return Vec::new();
        };
        let targets = self.select_targets(table, local.addr, local.now);
        debug!(
            node = %local.addr,
            entries = digest.entries.len(),
            targets = targets.len(),
            "gossip round"
        );
        targets
            .into_iter()
            .map(|to| WireMessage::Gossip(digest.clone()).to(to))
            .collect()
    }

    /// Merge a received digest. Records about `self_addr` are skipped since
    /// only this node may advance its own heartbeat. Returns how many
    /// entries were inserted or advanced.
    pub fn apply(
        table: &mut MembershipTable,
        digest: &GossipDigest,
        self_addr: NodeAddress,
        now: Tick,
        events: &mut Vec<MembershipEvent>,
    ) -> usize {
        let sender = std::iter::once((digest.sender, digest.heartbeat));
        let records = digest.entries.iter().map(|e| (e.addr, e.heartbeat));

        sender
            .chain(records)
            .filter(|(addr, _)| *addr != self_addr)
            .map(|(addr, heartbeat)| table.merge(addr, heartbeat, now, events))
            .filter(|outcome| *outcome != Upsert::Unchanged)
            .count()
    }
}

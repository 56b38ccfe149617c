//! Heartbeat-timeout failure detection
//!
//! Two thresholds against the tick counter: past `t_fail` an entry is
//! suspect and no longer gossiped, past `t_remove` it is deleted. Nothing is
//! broadcast on removal; every node times the entry out on its own.

use crate::params::ProtocolParams;
use crate::table::MembershipTable;
use crate::types::{Heartbeat, MemberEntry, MemberStatus, MembershipEvent, NodeAddress, Tick};
use tracing::{info, warn};

/// What one detector pass changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectorReport {
    pub suspected: Vec<NodeAddress>,
    pub removed: Vec<MemberEntry>,
}

impl DetectorReport {
    pub fn is_empty(&self) -> bool {
        self.suspected.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FailureDetector {
    t_fail: Tick,
    t_remove: Tick,
}

impl FailureDetector {
    pub fn new(params: &ProtocolParams) -> Self {
        Self {
            t_fail: params.t_fail,
            t_remove: params.t_remove,
        }
    }

    /// Evaluate every entry except `self_addr`.
    pub fn evaluate(
        &self,
        table: &mut MembershipTable,
        self_addr: NodeAddress,
        now: Tick,
        events: &mut Vec<MembershipEvent>,
    ) -> DetectorReport {
        let mut stale = Vec::new();
        let mut suspect = Vec::new();
        for entry in table.iter().filter(|e| e.addr != self_addr) {
            let silence = entry.silence(now);
            if silence > self.t_remove {
                stale.push(entry.addr);
            } else if silence > self.t_fail && entry.status == MemberStatus::Alive {
                suspect.push(entry.addr);
            }
        }

        let mut report = DetectorReport::default();
        for addr in suspect {
            if table.mark_suspect(addr) {
                info!(peer = %addr, tick = now, "member suspected");
                events.push(MembershipEvent::MemberSuspected { addr, at: now });
                report.suspected.push(addr);
            }
        }
        for addr in stale {
            if let Some(entry) = table.remove(addr) {
                info!(
                    peer = %addr,
                    heartbeat = entry.heartbeat,
                    last_updated = entry.last_updated,
                    tick = now,
                    "member removed"
                );
                events.push(MembershipEvent::MemberRemoved { addr, at: now });
                report.removed.push(entry);
            }
        }
        report
    }
}

/// Record a new self heartbeat in the node's own entry, re-inserting the
/// entry if it has gone missing.
pub fn refresh_self(
    table: &mut MembershipTable,
    self_addr: NodeAddress,
    heartbeat: Heartbeat,
    now: Tick,
) {
    match table.index_of(self_addr) {
        Some(index) => {
            table.advance_at(index, heartbeat, now);
        }
        None => {
            warn!(node = %self_addr, "own entry missing from table, restoring");
            table.upsert(self_addr, heartbeat, now);
        }
    }
}

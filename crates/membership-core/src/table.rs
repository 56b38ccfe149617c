//! Local membership table
//!
//! Every cross-node update funnels through [`MembershipTable::upsert`], which
//! only ever moves a heartbeat forward. That rule is what makes the order in
//! which gossip arrives irrelevant.

use crate::types::{Heartbeat, MemberEntry, MemberStatus, MembershipEvent, NodeAddress, Tick};
use tracing::info;

/// Result of merging one `(addr, heartbeat)` observation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    /// Address was unknown and has been inserted
    Inserted,
    /// Stored heartbeat was strictly lower and has been replaced
    Advanced { recovered: bool },
    /// Incoming heartbeat was not newer; nothing changed
    Unchanged,
}

/// Known peers keyed by `(id, port)`, kept in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct MembershipTable {
    entries: Vec<MemberEntry>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of an entry, if present.
    pub fn index_of(&self, addr: NodeAddress) -> Option<usize> {
        self.entries.iter().position(|e| e.addr == addr)
    }

    pub fn get(&self, addr: NodeAddress) -> Option<&MemberEntry> {
        self.entries.iter().find(|e| e.addr == addr)
    }

    pub fn contains(&self, addr: NodeAddress) -> bool {
        self.index_of(addr).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemberEntry> {
        self.entries.iter()
    }

    /// Insert an unknown address, or advance a known one if `heartbeat` is
    /// strictly greater than the stored value.
    pub fn upsert(&mut self, addr: NodeAddress, heartbeat: Heartbeat, now: Tick) -> Upsert {
        match self.index_of(addr) {
            None => {
                self.entries.push(MemberEntry::new(addr, heartbeat, now));
                Upsert::Inserted
            }
            Some(index) => {
                if self.advance_at(index, heartbeat, now) {
                    let recovered = self.entries[index].status == MemberStatus::Suspect;
                    self.entries[index].status = MemberStatus::Alive;
                    Upsert::Advanced { recovered }
                } else {
                    Upsert::Unchanged
                }
            }
        }
    }

    /// Advance the entry at `index` if `heartbeat` is newer. Returns whether
    /// it changed.
    pub fn advance_at(&mut self, index: usize, heartbeat: Heartbeat, now: Tick) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) if heartbeat > entry.heartbeat => {
                entry.heartbeat = heartbeat;
                entry.last_updated = now;
                true
            }
            _ => false,
        }
    }

    /// Delete an entry unconditionally.
    pub fn remove(&mut self, addr: NodeAddress) -> Option<MemberEntry> {
        let index = self.index_of(addr)?;
        Some(self.entries.remove(index))
    }

    /// Flag an alive entry as suspect. Returns whether the status changed.
    pub fn mark_suspect(&mut self, addr: NodeAddress) -> bool {
        match self.entries.iter_mut().find(|e| e.addr == addr) {
            Some(entry) if entry.status == MemberStatus::Alive => {
                entry.status = MemberStatus::Suspect;
                true
            }
            _ => false,
        }
    }

    /// Ordered copy of every entry.
    pub fn snapshot(&self) -> Vec<MemberEntry> {
        self.entries.clone()
    }

    /// Entries heard from within `t_fail` ticks of `now`.
    pub fn live(&self, now: Tick, t_fail: Tick) -> impl Iterator<Item = &MemberEntry> {
        self.entries.iter().filter(move |e| e.is_live(now, t_fail))
    }

    /// Upsert and record the resulting membership change, if any.
    pub(crate) fn merge(
        &mut self,
        addr: NodeAddress,
        heartbeat: Heartbeat,
        now: Tick,
        events: &mut Vec<MembershipEvent>,
    ) -> Upsert {
        let outcome = self.upsert(addr, heartbeat, now);
        match outcome {
            Upsert::Inserted => {
                info!(peer = %addr, heartbeat, tick = now, "member added");
                events.push(MembershipEvent::MemberAdded { addr, at: now });
            }
            Upsert::Advanced { recovered: true } => {
                info!(peer = %addr, heartbeat, tick = now, "member recovered");
                events.push(MembershipEvent::MemberRecovered { addr, at: now });
            }
            Upsert::Advanced { recovered: false } | Upsert::Unchanged => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: NodeAddress = NodeAddress::new(1, 100);
    const B: NodeAddress = NodeAddress::new(2, 200);

    #[test]
    fn test_upsert_inserts_unknown() {
        let mut table = MembershipTable::new();
        assert_eq!(table.upsert(A, 0, 3), Upsert::Inserted);
        assert_eq!(table.len(), 1);
        let entry = table.get(A).unwrap();
        assert_eq!(entry.heartbeat, 0);
        assert_eq!(entry.last_updated, 3);
    }

    #[test]
    fn test_monotonic_merge() {
        let mut table = MembershipTable::new();
        table.upsert(A, 5, 1);

        // Equal and older heartbeats are ignored, including the timestamp
        assert_eq!(table.upsert(A, 5, 7), Upsert::Unchanged);
        assert_eq!(table.upsert(A, 2, 8), Upsert::Unchanged);
        assert_eq!(table.get(A).unwrap().heartbeat, 5);
        assert_eq!(table.get(A).unwrap().last_updated, 1);

        // Strictly greater replaces both fields
        assert_eq!(table.upsert(A, 6, 9), Upsert::Advanced { recovered: false });
        assert_eq!(table.get(A).unwrap().heartbeat, 6);
        assert_eq!(table.get(A).unwrap().last_updated, 9);
    }

    #[test]
    fn test_one_entry_per_address() {
        let mut table = MembershipTable::new();
        for hb in [3, 1, 4, 1, 5] {
            table.upsert(A, hb, hb);
        }
        table.upsert(B, 0, 0);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(A).unwrap().heartbeat, 5);
    }

    #[test]
    fn test_index_and_remove() {
        let mut table = MembershipTable::new();
        table.upsert(A, 0, 0);
        table.upsert(B, 0, 0);
        assert_eq!(table.index_of(B), Some(1));
        assert_eq!(table.index_of(NodeAddress::new(9, 9)), None);

        assert!(table.remove(A).is_some());
        assert!(table.remove(A).is_none());
        assert_eq!(table.index_of(B), Some(0));
    }

    #[test]
    fn test_suspect_recovers_on_advance() {
        let mut table = MembershipTable::new();
        let mut events = Vec::new();
        table.merge(A, 1, 0, &mut events);
        assert!(table.mark_suspect(A));
        assert!(!table.mark_suspect(A));

        let outcome = table.merge(A, 2, 10, &mut events);
        assert_eq!(outcome, Upsert::Advanced { recovered: true });
        assert_eq!(table.get(A).unwrap().status, MemberStatus::Alive);
        assert_eq!(
            events,
            vec![
                MembershipEvent::MemberAdded { addr: A, at: 0 },
                MembershipEvent::MemberRecovered { addr: A, at: 10 },
            ]
        );
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut table = MembershipTable::new();
        table.upsert(A, 0, 0);
        let snapshot = table.snapshot();
        table.upsert(A, 9, 9);
        assert_eq!(snapshot[0].heartbeat, 0);
    }
}

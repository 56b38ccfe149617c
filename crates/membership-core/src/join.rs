//! Join handshake between a new node and the introducer

use crate::codec::{GossipDigest, Outbound, WireMessage};
use crate::error::{Error, Result};
use crate::params::ProtocolParams;
use crate::table::MembershipTable;
use crate::types::{Heartbeat, LocalView, MemberEntry, MembershipEvent, NodeAddress, Tick};
use tracing::{debug, info, warn};

/// Join lifecycle. `Joined` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinState {
    Uninitialized,
    Joining,
    Joined,
}

/// Drives one node into the group and admits others once it is in.
#[derive(Debug)]
pub struct JoinCoordinator {
    introducer: NodeAddress,
    state: JoinState,
    /// Join requests sent so far
    attempts: u32,
    last_request: Tick,
}

impl JoinCoordinator {
    pub fn new(introducer: NodeAddress) -> Self {
        Self {
            introducer,
            state: JoinState::Uninitialized,
            attempts: 0,
            last_request: 0,
        }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == JoinState::Joined
    }

    pub fn introducer(&self) -> NodeAddress {
        self.introducer
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Leave `Uninitialized`.
    ///
    /// The introducer boots the group by inserting itself and returns
    /// nothing to send; everyone else returns the first join request.
    pub fn start(
        &mut self,
        table: &mut MembershipTable,
        local: LocalView,
        events: &mut Vec<MembershipEvent>,
    ) -> Option<Outbound> {
        if self.state != JoinState::Uninitialized {
            return None;
        }

        if local.addr == self.introducer {
            info!(node = %local.addr, "starting up group");
            self.enter_group(table, local, events);
            return None;
        }

        info!(node = %local.addr, introducer = %self.introducer, "trying to join");
        self.state = JoinState::Joining;
        self.attempts = 1;
        self.last_request = local.now;
        Some(self.request(local))
    }

    /// Re-send the join request once `join_timeout` ticks pass without a
    /// reply. Fails once every attempt has timed out.
    pub fn poll(&mut self, local: LocalView, params: &ProtocolParams) -> Result<Option<Outbound>> {
        if self.state != JoinState::Joining {
            return Ok(None);
        }
        if local.now.saturating_sub(self.last_request) < params.join_timeout {
            return Ok(None);
        }
        if self.attempts >= params.join_attempts() {
            return Err(Error::JoinFailed {
                attempts: self.attempts,
            });
        }

        self.attempts += 1;
        self.last_request = local.now;
        warn!(
            node = %local.addr,
            attempt = self.attempts,
            "no join reply, retrying"
        );
        Ok(Some(self.request(local)))
    }

    /// Admit a requester: record it, answer, and hand it every live entry.
    /// Entries silent past `t_fail` stay behind so a dead peer is not
    /// handed out as fresh.
    pub fn handle_request(
        &self,
        table: &mut MembershipTable,
        local: LocalView,
        sender: NodeAddress,
        heartbeat: Heartbeat,
        params: &ProtocolParams,
        events: &mut Vec<MembershipEvent>,
    ) -> Vec<Outbound> {
        if !self.is_joined() {
            debug!(node = %local.addr, from = %sender, "not in group, dropping join request");
            return Vec::new();
        }

        table.merge(sender, heartbeat, local.now, events);

        let reply = WireMessage::JoinReply {
            sender: local.addr,
            heartbeat: local.heartbeat,
        };
        let live = table
            .iter()
            .filter(|e| e.addr == local.addr || e.is_live(local.now, params.t_fail))
            .map(MemberEntry::digest_entry);
        let view = GossipDigest::new(local.addr, local.heartbeat, live);
        vec![reply.to(sender), WireMessage::Gossip(view).to(sender)]
    }

    /// Complete the handshake on the first reply.
    pub fn handle_reply(
        &mut self,
        table: &mut MembershipTable,
        local: LocalView,
        sender: NodeAddress,
        heartbeat: Heartbeat,
        events: &mut Vec<MembershipEvent>,
    ) {
        match self.state {
            JoinState::Joining => {
                info!(node = %local.addr, introducer = %sender, "added to group");
                self.enter_group(table, local, events);
                table.merge(sender, heartbeat, local.now, events);
            }
            JoinState::Joined => {
                table.merge(sender, heartbeat, local.now, events);
            }
            JoinState::Uninitialized => {
                debug!(node = %local.addr, from = %sender, "not started, dropping join reply");
            }
        }
    }

    fn enter_group(
        &mut self,
        table: &mut MembershipTable,
        local: LocalView,
        events: &mut Vec<MembershipEvent>,
    ) {
        self.state = JoinState::Joined;
        table.upsert(local.addr, local.heartbeat, local.now);
        events.push(MembershipEvent::Joined { at: local.now });
    }

    fn request(&self, local: LocalView) -> Outbound {
        WireMessage::JoinRequest {
            sender: local.addr,
            heartbeat: local.heartbeat,
        }
        .to(self.introducer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTRODUCER: NodeAddress = NodeAddress::new(1, 100);
    const JOINER: NodeAddress = NodeAddress::new(2, 200);

    fn view(addr: NodeAddress, now: Tick) -> LocalView {
        LocalView {
            addr,
            heartbeat: 0,
            now,
        }
    }

    #[test]
    fn test_introducer_boots_group() {
        let mut join = JoinCoordinator::new(INTRODUCER);
        let mut table = MembershipTable::new();
        let mut events = Vec::new();

        assert!(join.start(&mut table, view(INTRODUCER, 0), &mut events).is_none());
        assert!(join.is_joined());
        assert_eq!(table.len(), 1);
        assert!(table.contains(INTRODUCER));
        assert_eq!(events, vec![MembershipEvent::Joined { at: 0 }]);
    }

    #[test]
    fn test_joiner_sends_request() {
        let mut join = JoinCoordinator::new(INTRODUCER);
        let mut table = MembershipTable::new();
        let mut events = Vec::new();

        let out = join.start(&mut table, view(JOINER, 0), &mut events).unwrap();
        assert_eq!(out.to, INTRODUCER);
        assert_eq!(
            out.message,
            WireMessage::JoinRequest {
                sender: JOINER,
                heartbeat: 0
            }
        );
        assert_eq!(join.state(), JoinState::Joining);
        assert!(table.is_empty());

        // Starting twice does nothing
        assert!(join.start(&mut table, view(JOINER, 1), &mut events).is_none());
    }

    #[test]
    fn test_request_answered_with_reply_and_view() {
        let mut join = JoinCoordinator::new(INTRODUCER);
        let mut table = MembershipTable::new();
        let mut events = Vec::new();
        join.start(&mut table, view(INTRODUCER, 0), &mut events);

        let params = ProtocolParams::default();
        let out = join.handle_request(
            &mut table,
            view(INTRODUCER, 1),
            JOINER,
            0,
            &params,
            &mut events,
        );
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| o.to == JOINER));
        assert!(matches!(out[0].message, WireMessage::JoinReply { .. }));
        match &out[1].message {
            WireMessage::Gossip(digest) => assert_eq!(digest.entries.len(), 2),
            other => panic!("expected gossip, got {other:?}"),
        }
        assert!(table.contains(JOINER));
    }

    #[test]
    fn test_view_for_joiner_leaves_out_silent_entries() {
        let params = ProtocolParams {
            t_fail: 5,
            t_remove: 20,
            ..Default::default()
        };
        let silent = NodeAddress::new(3, 300);
        let mut join = JoinCoordinator::new(INTRODUCER);
        let mut table = MembershipTable::new();
        let mut events = Vec::new();
        join.start(&mut table, view(INTRODUCER, 0), &mut events);
        table.upsert(silent, 7, 0);

        let out = join.handle_request(
            &mut table,
            view(INTRODUCER, 10),
            JOINER,
            0,
            &params,
            &mut events,
        );
        let WireMessage::Gossip(digest) = &out[1].message else {
            panic!("expected gossip, got {:?}", out[1].message);
        };
        let addrs: Vec<_> = digest.entries.iter().map(|e| e.addr).collect();
        // Own entry is sent even when not refreshed since boot
        assert_eq!(addrs, vec![INTRODUCER, JOINER]);
        assert!(table.contains(silent));
    }

    #[test]
    fn test_request_ignored_before_joining() {
        let join = JoinCoordinator::new(INTRODUCER);
        let mut table = MembershipTable::new();
        let mut events = Vec::new();
        let out = join.handle_request(
            &mut table,
            view(JOINER, 0),
            NodeAddress::new(3, 300),
            0,
            &ProtocolParams::default(),
            &mut events,
        );
        assert!(out.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_reply_completes_join() {
        let mut join = JoinCoordinator::new(INTRODUCER);
        let mut table = MembershipTable::new();
        let mut events = Vec::new();
        join.start(&mut table, view(JOINER, 0), &mut events);

        join.handle_reply(&mut table, view(JOINER, 2), INTRODUCER, 4, &mut events);
        assert!(join.is_joined());
        let addrs: Vec<_> = table.iter().map(|e| e.addr).collect();
        assert_eq!(addrs, vec![JOINER, INTRODUCER]);
        assert_eq!(table.get(INTRODUCER).unwrap().heartbeat, 4);
    }

    #[test]
    fn test_retry_then_fail() {
        let params = ProtocolParams {
            join_timeout: 3,
            join_retries: 1,
            ..Default::default()
        };
        let mut join = JoinCoordinator::new(INTRODUCER);
        let mut table = MembershipTable::new();
        let mut events = Vec::new();
        join.start(&mut table, view(JOINER, 0), &mut events);

        assert!(join.poll(view(JOINER, 2), &params).unwrap().is_none());
        let retry = join.poll(view(JOINER, 3), &params).unwrap().unwrap();
        assert_eq!(retry.to, INTRODUCER);
        assert_eq!(join.attempts(), 2);

        assert!(join.poll(view(JOINER, 5), &params).unwrap().is_none());
        assert!(matches!(
            join.poll(view(JOINER, 6), &params),
            Err(Error::JoinFailed { attempts: 2 })
        ));
    }
}

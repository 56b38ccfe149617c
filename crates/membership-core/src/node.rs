//! Protocol driver
//!
//! One [`Node::on_tick`] call per logical tick: drain the inbox in arrival
//! order, then (once joined) run the failure detector, then gossip on
//! dissemination rounds.

use crate::codec::{Outbound, WireMessage};
use crate::detector::{self, FailureDetector};
use crate::error::{Error, Result};
use crate::gossip::GossipDisseminator;
use crate::join::{JoinCoordinator, JoinState};
use crate::params::ProtocolParams;
use crate::table::MembershipTable;
use crate::transport::{Clock, Transport};
use crate::types::{Heartbeat, LocalView, MemberEntry, MembershipEvent, NodeAddress, Tick};
use tracing::{debug, error, warn};

/// Per-process protocol state
#[derive(Debug)]
pub struct NodeState {
    pub addr: NodeAddress,
    pub heartbeat: Heartbeat,
    pub failed: bool,
    pub table: MembershipTable,
}

/// A group member bound to a transport endpoint and a tick source.
pub struct Node<T, C> {
    state: NodeState,
    params: ProtocolParams,
    join: JoinCoordinator,
    detector: FailureDetector,
    gossip: GossipDisseminator,
    transport: T,
    clock: C,
    events: Vec<MembershipEvent>,
}

impl<T: Transport, C: Clock> Node<T, C> {
    pub fn new(
        addr: NodeAddress,
        introducer: NodeAddress,
        params: ProtocolParams,
        transport: T,
        clock: C,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            state: NodeState {
                addr,
                heartbeat: 0,
                failed: false,
                table: MembershipTable::new(),
            },
            join: JoinCoordinator::new(introducer),
            detector: FailureDetector::new(&params),
            gossip: GossipDisseminator::new(&params)?,
            params,
            transport,
            clock,
            events: Vec::new(),
        })
    }

    /// Seed the gossip target RNG so runs are reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.gossip.reseed(seed);
        self
    }

    pub fn addr(&self) -> NodeAddress {
        self.state.addr
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.state.heartbeat
    }

    pub fn join_state(&self) -> JoinState {
        self.join.state()
    }

    pub fn is_joined(&self) -> bool {
        self.join.is_joined()
    }

    pub fn is_failed(&self) -> bool {
        self.state.failed
    }

    pub fn member_count(&self) -> usize {
        self.state.table.len()
    }

    pub fn members(&self) -> Vec<MemberEntry> {
        self.state.table.snapshot()
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Take every membership event recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<MembershipEvent> {
        std::mem::take(&mut self.events)
    }

    /// Stop taking part in the protocol, as if the process had crashed.
    pub fn crash(&mut self) {
        warn!(node = %self.state.addr, "node failed");
        self.state.failed = true;
    }

    /// Boot the group if this is the introducer, otherwise ask to join.
    pub fn start(&mut self) {
        let local = self.local(self.clock.now());
        if let Some(request) = self.join.start(&mut self.state.table, local, &mut self.events) {
            self.send(request);
        }
    }

    pub fn on_tick(&mut self) -> Result<()> {
        if self.state.failed {
            return Ok(());
        }
        if self.join.state() == JoinState::Uninitialized {
            return Err(Error::NotStarted);
        }
        let now = self.clock.now();

        self.drain_inbox(now);

        if !self.join.is_joined() {
            return self.poll_join(now);
        }

        self.detector
            .evaluate(&mut self.state.table, self.state.addr, now, &mut self.events);

        if self.gossip.is_round(now) {
            self.state.heartbeat += 1;
            detector::refresh_self(
                &mut self.state.table,
                self.state.addr,
                self.state.heartbeat,
                now,
            );
            let local = self.local(now);
            let outbound = self.gossip.disseminate(&self.state.table, local);
            for message in outbound {
                self.send(message);
            }
        }
        Ok(())
    }

    fn poll_join(&mut self, now: Tick) -> Result<()> {
        let local = self.local(now);
        match self.join.poll(local, &self.params) {
            Ok(Some(request)) => {
                self.send(request);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                error!(node = %self.state.addr, "unable to join group: {}", e);
                self.state.failed = true;
                Err(e)
            }
        }
    }

    fn drain_inbox(&mut self, now: Tick) {
        for payload in self.transport.receive() {
            match WireMessage::decode(&payload) {
                Ok(message) => self.dispatch(message, now),
                Err(e) => warn!(
                    node = %self.state.addr,
                    len = payload.len(),
                    "dropping malformed message: {}",
                    e
                ),
            }
        }
    }

    fn dispatch(&mut self, message: WireMessage, now: Tick) {
        let local = self.local(now);
        debug!(
            node = %local.addr,
            from = %message.sender(),
            kind = ?message.message_type(),
            "received"
        );
        match message {
            WireMessage::JoinRequest { sender, heartbeat } => {
                let replies = self.join.handle_request(
                    &mut self.state.table,
                    local,
                    sender,
                    heartbeat,
                    &self.params,
                    &mut self.events,
                );
                for reply in replies {
                    self.send(reply);
                }
            }
            WireMessage::JoinReply { sender, heartbeat } => {
                self.join.handle_reply(
                    &mut self.state.table,
                    local,
                    sender,
                    heartbeat,
                    &mut self.events,
                );
            }
            WireMessage::Gossip(digest) => {
                GossipDisseminator::apply(
                    &mut self.state.table,
                    &digest,
                    local.addr,
                    now,
                    &mut self.events,
                );
            }
        }
    }

    fn send(&mut self, outbound: Outbound) {
        let payload = outbound.message.encode();
        if let Err(e) = self.transport.send(self.state.addr, outbound.to, payload) {
            debug!(node = %self.state.addr, to = %outbound.to, "send failed: {}", e);
        }
    }

    fn local(&self, now: Tick) -> LocalView {
        LocalView {
            addr: self.state.addr,
            heartbeat: self.state.heartbeat,
            now,
        }
    }
}

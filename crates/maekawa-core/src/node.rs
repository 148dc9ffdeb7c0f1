//! Node state machine.
//!
//! [`MaekawaNode`] combines one node's gatekeeper role, requester role and
//! Lamport clock behind the operations the runtime calls.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods return `Result<Vec<NodeAction>, CoreError>`
//! - Driver code executes actions (send messages, wake the waiting caller)
//! - Messages a node addresses to itself (its quorum contains it) are
//!   delivered locally before the method returns and never show up as
//!   actions
//!
//! # Clock discipline
//!
//! Every receive merges the sender's timestamp; every send event ticks the
//! clock once and stamps the result. A multicast is one send event, so every
//! copy of a REQUEST carries the same timestamp, which then identifies the
//! request at each gatekeeper.

use std::collections::{BTreeSet, VecDeque};

use maekawa_proto::{Message, MessageKind, NodeId, Timestamp};
use tracing::{debug, trace};

use crate::{
    clock::LamportClock,
    error::CoreError,
    grantor::{Grantor, RequestEntry},
    quorum::Quorum,
    requester::{Requester, RequesterState},
};

/// Actions returned by the node state machine.
///
/// The driver (test harness or production runtime) executes these actions:
/// - `Send`: Serialize and deliver the message to `to`
/// - `EnterCriticalSection`: Wake the caller blocked in `request_access`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// Deliver this message to a peer
    Send {
        /// Destination node
        to: NodeId,
        /// Message to deliver
        message: Message,
    },

    /// Every quorum member has granted; the critical section is ours
    EnterCriticalSection {
        /// Timestamp of the request that was granted
        timestamp: Timestamp,
    },
}

/// A message a role wants sent, before the clock stamps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outgoing {
    pub(crate) kind: MessageKind,
    pub(crate) to: NodeId,
    pub(crate) request_ts: Timestamp,
}

impl Outgoing {
    pub(crate) fn new(kind: MessageKind, to: NodeId, request_ts: Timestamp) -> Self {
        Self { kind, to, request_ts }
    }
}

/// Maekawa protocol state of one node.
///
/// This is a pure state machine: no I/O, no clocks other than the Lamport
/// clock, no randomness.
#[derive(Debug, Clone)]
pub struct MaekawaNode {
    id: NodeId,
    quorum: Quorum,
    clock: LamportClock,
    grantor: Grantor,
    requester: Requester,
}

impl MaekawaNode {
    /// Create an idle, ungranted node.
    pub fn new(id: NodeId, quorum: Quorum) -> Self {
        Self {
            id,
            quorum,
            clock: LamportClock::new(),
            grantor: Grantor::new(),
            requester: Requester::new(id),
        }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// This node's quorum.
    pub fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    /// Current Lamport clock value.
    pub fn clock(&self) -> Timestamp {
        self.clock.value()
    }

    /// Gatekeeper role.
    pub fn grantor(&self) -> &Grantor {
        &self.grantor
    }

    /// Node currently holding this node's token.
    pub fn granted_to(&self) -> Option<NodeId> {
        self.grantor.granted().map(|entry| entry.node)
    }

    /// Requests waiting for this node's token, smallest first.
    pub fn request_queue(&self) -> Vec<RequestEntry> {
        self.grantor.queue().collect()
    }

    /// Coarse requester state.
    pub fn requester_state(&self) -> RequesterState {
        self.requester.state()
    }

    /// Timestamp of the outstanding or active request.
    pub fn current_request(&self) -> Option<Timestamp> {
        self.requester.current_request()
    }

    /// Whether this node is inside the critical section.
    pub fn in_critical_section(&self) -> bool {
        self.requester.state() == RequesterState::InCriticalSection
    }

    /// Quorum members that have granted the outstanding request.
    pub fn replies_received(&self) -> BTreeSet<NodeId> {
        self.requester.replies_received()
    }

    /// Quorum members still to grant the outstanding request.
    ///
    /// Empty unless a request is outstanding.
    pub fn pending_replies(&self) -> BTreeSet<NodeId> {
        if self.requester.state() != RequesterState::Requesting {
            return BTreeSet::new();
        }
        let received = self.requester.replies_received();
        self.quorum.members().filter(|member| !received.contains(member)).collect()
    }

    /// Ask the quorum for permission to enter the critical section.
    ///
    /// Returns REQUEST sends for every remote quorum member, plus
    /// `EnterCriticalSection` if local delivery alone completes the quorum.
    ///
    /// # Errors
    ///
    /// `AlreadyRequesting` or `AlreadyInCriticalSection` unless idle.
    pub fn request_access(&mut self) -> Result<Vec<NodeAction>, CoreError> {
        self.requester.ensure_idle()?;

        let ts = self.clock.tick();
        self.requester.begin(ts);
        debug!(node = self.id, ts, "requesting access");

        let mut batch = Batch::default();
        self.multicast(&Message::request(self.id, ts), &mut batch);
        Ok(self.drain_local(batch))
    }

    /// Leave the critical section and hand every token back.
    ///
    /// # Errors
    ///
    /// `NotInCriticalSection` unless inside the critical section.
    pub fn release_access(&mut self) -> Result<Vec<NodeAction>, CoreError> {
        let request_ts = self.requester.finish()?;

        let ts = self.clock.tick();
        debug!(node = self.id, ts, request_ts, "releasing access");

        let mut batch = Batch::default();
        self.multicast(&Message::release(self.id, ts), &mut batch);
        Ok(self.drain_local(batch))
    }

    /// Handle a message received from the network.
    ///
    /// # Errors
    ///
    /// `Misaddressed` if the message names a different destination. The
    /// message is not applied.
    pub fn handle_message(&mut self, message: &Message) -> Result<Vec<NodeAction>, CoreError> {
        if let Some(dest) = message.dest()
            && dest != self.id
        {
            return Err(CoreError::Misaddressed { node: self.id, dest });
        }

        Ok(self.deliver(message))
    }

    /// REQUEST from `from` stamped `ts`: grant now, or queue for later.
    pub fn on_request(&mut self, from: NodeId, ts: Timestamp) -> Vec<NodeAction> {
        self.deliver(&Message::request(from, ts))
    }

    /// REPLY from `from` granting the request stamped `request_ts`.
    pub fn on_reply(&mut self, from: NodeId, ts: Timestamp, request_ts: Timestamp) -> Vec<NodeAction> {
        self.deliver(&Message::reply(from, self.id, ts, request_ts))
    }

    /// RELEASE from `from`: pass the token to the next queued request.
    pub fn on_release(&mut self, from: NodeId, ts: Timestamp) -> Vec<NodeAction> {
        self.deliver(&Message::release(from, ts))
    }

    fn deliver(&mut self, message: &Message) -> Vec<NodeAction> {
        let mut batch = Batch::default();
        self.receive(message, &mut batch);
        self.drain_local(batch)
    }

    fn receive(&mut self, message: &Message, batch: &mut Batch) {
        let now = self.clock.observe(message.ts());
        trace!(node = self.id, clock = now, %message, "received");

        let from = message.src();
        let mut out = Vec::new();
        match message.kind() {
            MessageKind::Request => {
                self.grantor.on_request(RequestEntry::new(message.ts(), from), &mut out);
            },
            MessageKind::Release => self.grantor.on_release(from, &mut out),
            MessageKind::Relinquish => {
                if let Some(request_ts) = message.request_ts() {
                    self.grantor.on_relinquish(RequestEntry::new(request_ts, from), &mut out);
                }
            },
            MessageKind::Reply => {
                if let Some(timestamp) =
                    self.requester.on_reply(from, message.request_ts(), &self.quorum)
                {
                    debug!(node = self.id, timestamp, "entering critical section");
                    batch.actions.push(NodeAction::EnterCriticalSection { timestamp });
                }
            },
            MessageKind::Failed => self.requester.on_failed(from, message.request_ts(), &mut out),
            MessageKind::Inquire => self.requester.on_inquire(from, message.request_ts(), &mut out),
        }

        for outgoing in out {
            let ts = self.clock.tick();
            let message = match outgoing.kind {
                MessageKind::Reply => Message::reply(self.id, outgoing.to, ts, outgoing.request_ts),
                MessageKind::Inquire => {
                    Message::inquire(self.id, outgoing.to, ts, outgoing.request_ts)
                },
                MessageKind::Failed => Message::failed(self.id, outgoing.to, ts, outgoing.request_ts),
                MessageKind::Relinquish => {
                    Message::relinquish(self.id, outgoing.to, ts, outgoing.request_ts)
                },
                MessageKind::Request | MessageKind::Release => continue,
            };
            self.route(outgoing.to, message, batch);
        }
    }

    fn multicast(&self, message: &Message, batch: &mut Batch) {
        for member in self.quorum.members() {
            self.route(member, message.clone(), batch);
        }
    }

    fn route(&self, to: NodeId, message: Message, batch: &mut Batch) {
        if to == self.id {
            batch.local.push_back(message);
        } else {
            batch.actions.push(NodeAction::Send { to, message });
        }
    }

    fn drain_local(&mut self, mut batch: Batch) -> Vec<NodeAction> {
        while let Some(message) = batch.local.pop_front() {
            self.receive(&message, &mut batch);
        }
        batch.actions
    }
}

#[derive(Debug, Default)]
struct Batch {
    actions: Vec<NodeAction>,
    local: VecDeque<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sends(actions: &[NodeAction]) -> Vec<(NodeId, MessageKind)> {
        actions
            .iter()
            .filter_map(|action| match action {
                NodeAction::Send { to, message } => Some((*to, message.kind())),
                NodeAction::EnterCriticalSection { .. } => None,
            })
            .collect()
    }

    fn node(id: NodeId, members: &[NodeId]) -> MaekawaNode {
        MaekawaNode::new(id, Quorum::new(members.iter().copied()))
    }

    #[test]
    fn request_multicasts_to_quorum() {
        let mut n0 = node(0, &[1, 2, 3]);

        let actions = n0.request_access().unwrap();

        assert_eq!(
            sends(&actions),
            vec![(1, MessageKind::Request), (2, MessageKind::Request), (3, MessageKind::Request)]
        );
        assert_eq!(n0.clock(), 1);
        assert_eq!(n0.pending_replies(), BTreeSet::from([1, 2, 3]));
        assert!(n0.replies_received().is_empty());
        assert!(!n0.in_critical_section());
    }

    #[test]
    fn ungranted_gatekeeper_replies_immediately() {
        let mut n1 = node(1, &[0, 2, 3]);

        let actions = n1.on_request(0, 1);

        assert_eq!(n1.granted_to(), Some(0));
        assert_eq!(sends(&actions), vec![(0, MessageKind::Reply)]);
        // observe(1) -> 2, then the reply send ticks to 3
        assert_eq!(n1.clock(), 3);
        match &actions[0] {
            NodeAction::Send { message, .. } => {
                assert_eq!(message.dest(), Some(0));
                assert_eq!(message.request_ts(), Some(1));
                assert_eq!(message.ts(), 3);
            },
            NodeAction::EnterCriticalSection { .. } => unreachable!(),
        }
    }

    #[test]
    fn all_replies_enter_critical_section() {
        let mut n0 = node(0, &[1, 2, 3]);
        n0.request_access().unwrap();

        assert!(n0.on_reply(1, 3, 1).is_empty());
        assert!(n0.on_reply(2, 3, 1).is_empty());
        let actions = n0.on_reply(3, 3, 1);

        assert_eq!(actions, vec![NodeAction::EnterCriticalSection { timestamp: 1 }]);
        assert!(n0.in_critical_section());
        assert!(n0.pending_replies().is_empty());
    }

    #[test]
    fn release_resets_requester_and_multicasts() {
        let mut n0 = node(0, &[1, 2]);
        n0.request_access().unwrap();
        n0.on_reply(1, 2, 1);
        n0.on_reply(2, 2, 1);

        let actions = n0.release_access().unwrap();

        assert_eq!(sends(&actions), vec![(1, MessageKind::Release), (2, MessageKind::Release)]);
        assert_eq!(n0.requester_state(), RequesterState::Idle);
        assert!(n0.replies_received().is_empty());
        assert!(n0.pending_replies().is_empty());
    }

    #[test]
    fn release_grants_next_queued_requester() {
        let mut n2 = node(2, &[0, 1, 3]);
        n2.on_request(0, 1);
        n2.on_request(1, 1);
        assert_eq!(n2.request_queue(), vec![RequestEntry::new(1, 1)]);

        let actions = n2.on_release(0, 5);

        assert_eq!(n2.granted_to(), Some(1));
        assert!(n2.request_queue().is_empty());
        assert_eq!(sends(&actions), vec![(1, MessageKind::Reply)]);

        n2.on_release(1, 9);
        assert_eq!(n2.granted_to(), None);
    }

    #[test]
    fn duplicate_request_yields_one_grant() {
        let mut n1 = node(1, &[0, 2, 3]);

        let first = n1.on_request(0, 1);
        let second = n1.on_request(0, 1);

        assert_eq!(sends(&first), vec![(0, MessageKind::Reply)]);
        assert!(second.is_empty());
        assert!(n1.request_queue().is_empty());
    }

    #[test]
    fn duplicate_request_yields_one_queue_entry() {
        let mut n1 = node(1, &[0, 2, 3]);
        n1.on_request(0, 1);

        n1.on_request(2, 4);
        n1.on_request(2, 4);

        assert_eq!(n1.request_queue(), vec![RequestEntry::new(4, 2)]);
    }

    #[test]
    fn self_in_quorum_is_served_locally() {
        let mut n0 = node(0, &[0, 1, 2]);

        let actions = n0.request_access().unwrap();

        assert_eq!(sends(&actions), vec![(1, MessageKind::Request), (2, MessageKind::Request)]);
        assert_eq!(n0.granted_to(), Some(0));
        assert_eq!(n0.replies_received(), BTreeSet::from([0]));

        n0.on_reply(1, 5, 1);
        let actions = n0.on_reply(2, 5, 1);
        assert_eq!(actions, vec![NodeAction::EnterCriticalSection { timestamp: 1 }]);

        let actions = n0.release_access().unwrap();
        assert_eq!(sends(&actions), vec![(1, MessageKind::Release), (2, MessageKind::Release)]);
        assert_eq!(n0.granted_to(), None);
    }

    #[test]
    fn singleton_self_quorum_enters_without_network() {
        let mut n0 = node(0, &[0]);

        let actions = n0.request_access().unwrap();

        assert_eq!(actions, vec![NodeAction::EnterCriticalSection { timestamp: 1 }]);
    }

    #[test]
    fn misaddressed_message_is_rejected() {
        let mut n1 = node(1, &[0, 2]);
        let result = n1.handle_message(&Message::reply(0, 2, 5, 1));
        assert_eq!(result, Err(CoreError::Misaddressed { node: 1, dest: 2 }));
        assert_eq!(n1.clock(), 0);
    }

    #[test]
    fn operations_enforce_preconditions() {
        let mut n0 = node(0, &[1]);
        assert_eq!(n0.release_access(), Err(CoreError::NotInCriticalSection { node: 0 }));

        n0.request_access().unwrap();
        assert_eq!(n0.request_access(), Err(CoreError::AlreadyRequesting { node: 0 }));

        n0.on_reply(1, 3, 1);
        assert_eq!(n0.request_access(), Err(CoreError::AlreadyInCriticalSection { node: 0 }));
    }

    #[test]
    fn outranked_holder_relinquishes_after_failure() {
        // Node 1 holds gatekeeper 2's token; node 0's older request arrives at 2.
        let mut n1 = node(1, &[0, 2, 3]);
        let mut n2 = node(2, &[0, 1, 3]);

        n1.request_access().unwrap();
        assert_eq!(n1.current_request(), Some(1));
        let reply = n2.on_request(1, 1);
        assert_eq!(sends(&reply), vec![(1, MessageKind::Reply)]);
        for action in reply {
            if let NodeAction::Send { message, .. } = action {
                n1.handle_message(&message).unwrap();
            }
        }
        assert_eq!(n1.replies_received(), BTreeSet::from([2]));

        // Node 0 (older: ts 1, lower id) reaches gatekeeper 2.
        let inquire = n2.on_request(0, 1);
        assert_eq!(sends(&inquire), vec![(1, MessageKind::Inquire)]);

        // Node 1 is not blocked yet, so it parks the inquiry.
        for action in inquire {
            if let NodeAction::Send { message, .. } = action {
                assert!(n1.handle_message(&message).unwrap().is_empty());
            }
        }

        // Gatekeeper 3 tells node 1 it lost; node 1 hands 2's token back.
        let actions = n1.handle_message(&Message::failed(3, 1, 10, 1)).unwrap();
        assert_eq!(sends(&actions), vec![(2, MessageKind::Relinquish)]);
        assert!(n1.replies_received().is_empty());

        for action in actions {
            if let NodeAction::Send { message, .. } = action {
                let regrant = n2.handle_message(&message).unwrap();
                assert_eq!(sends(&regrant), vec![(0, MessageKind::Reply)]);
            }
        }
        assert_eq!(n2.granted_to(), Some(0));
        assert_eq!(n2.request_queue(), vec![RequestEntry::new(1, 1)]);
    }

    #[test]
    fn clock_strictly_increases_across_operations() {
        let mut n0 = node(0, &[0, 1, 2]);
        let mut last = n0.clock();
        let mut check = |clock: Timestamp| {
            assert!(clock > last, "clock went from {last} to {clock}");
            last = clock;
        };

        n0.request_access().unwrap();
        check(n0.clock());
        n0.on_request(2, 1);
        check(n0.clock());
        n0.on_reply(1, 1, 1);
        check(n0.clock());
        n0.on_reply(2, 2, 1);
        check(n0.clock());
        n0.release_access().unwrap();
        check(n0.clock());
    }
}

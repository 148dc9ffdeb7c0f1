//! Requester role.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ request_access ┌────────────┐ all replies ┌───────────────────┐
//! │ Idle │───────────────>│ Requesting │────────────>│ InCriticalSection │
//! └──────┘                └────────────┘             └───────────────────┘
//!    ^                                                         │
//!    └─────────────────────── release_access ──────────────────┘
//! ```
//!
//! While requesting, a gatekeeper may ask for its token back (INQUIRE). The
//! requester gives it back (RELINQUISH) only once it knows it cannot enter
//! yet: some gatekeeper told it FAILED, or it already gave another token
//! back. Otherwise the inquiry is parked until one of those happens or the
//! critical section is entered, in which case the RELEASE answers it.

use std::collections::BTreeSet;

use maekawa_proto::{MessageKind, NodeId, Timestamp};
use tracing::debug;

use crate::{error::CoreError, node::Outgoing, quorum::Quorum};

/// Coarse requester state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterState {
    /// No request outstanding
    Idle,
    /// Waiting for replies from the quorum
    Requesting,
    /// Holding permission from every quorum member
    InCriticalSection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attempt {
    ts: Timestamp,
    replies: BTreeSet<NodeId>,
    failed_from: BTreeSet<NodeId>,
    relinquished_to: BTreeSet<NodeId>,
    deferred_inquiries: BTreeSet<NodeId>,
}

impl Attempt {
    fn new(ts: Timestamp) -> Self {
        Self {
            ts,
            replies: BTreeSet::new(),
            failed_from: BTreeSet::new(),
            relinquished_to: BTreeSet::new(),
            deferred_inquiries: BTreeSet::new(),
        }
    }

    fn is_blocked(&self) -> bool {
        !self.failed_from.is_empty() || !self.relinquished_to.is_empty()
    }

    fn relinquish(&mut self, gatekeeper: NodeId, out: &mut Vec<Outgoing>) {
        if self.replies.remove(&gatekeeper) {
            self.relinquished_to.insert(gatekeeper);
            out.push(Outgoing::new(MessageKind::Relinquish, gatekeeper, self.ts));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Requesting(Attempt),
    InCriticalSection { ts: Timestamp },
}

/// Requester state of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    node: NodeId,
    phase: Phase,
}

impl Requester {
    /// Idle requester for `node`.
    pub fn new(node: NodeId) -> Self {
        Self { node, phase: Phase::Idle }
    }

    /// Coarse state.
    pub fn state(&self) -> RequesterState {
        match self.phase {
            Phase::Idle => RequesterState::Idle,
            Phase::Requesting(_) => RequesterState::Requesting,
            Phase::InCriticalSection { .. } => RequesterState::InCriticalSection,
        }
    }

    /// Timestamp of the outstanding or active request.
    pub fn current_request(&self) -> Option<Timestamp> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Requesting(attempt) => Some(attempt.ts),
            Phase::InCriticalSection { ts } => Some(*ts),
        }
    }

    /// Gatekeepers that have granted the outstanding request.
    pub fn replies_received(&self) -> BTreeSet<NodeId> {
        match &self.phase {
            Phase::Requesting(attempt) => attempt.replies.clone(),
            Phase::Idle | Phase::InCriticalSection { .. } => BTreeSet::new(),
        }
    }

    pub(crate) fn ensure_idle(&self) -> Result<(), CoreError> {
        match self.phase {
            Phase::Idle => Ok(()),
            Phase::Requesting(_) => Err(CoreError::AlreadyRequesting { node: self.node }),
            Phase::InCriticalSection { .. } => {
                Err(CoreError::AlreadyInCriticalSection { node: self.node })
            },
        }
    }

    pub(crate) fn begin(&mut self, ts: Timestamp) {
        self.phase = Phase::Requesting(Attempt::new(ts));
    }

    pub(crate) fn finish(&mut self) -> Result<Timestamp, CoreError> {
        match self.phase {
            Phase::InCriticalSection { ts } => {
                self.phase = Phase::Idle;
                Ok(ts)
            },
            _ => Err(CoreError::NotInCriticalSection { node: self.node }),
        }
    }

    /// Returns the request timestamp when this reply completes the quorum.
    pub(crate) fn on_reply(
        &mut self,
        from: NodeId,
        request_ts: Option<Timestamp>,
        quorum: &Quorum,
    ) -> Option<Timestamp> {
        let Phase::Requesting(attempt) = &mut self.phase else {
            debug!(node = self.node, from, "reply outside of a request ignored");
            return None;
        };
        if request_ts.is_some_and(|ts| ts != attempt.ts) || !quorum.contains(from) {
            debug!(node = self.node, from, ?request_ts, "stale reply ignored");
            return None;
        }

        attempt.replies.insert(from);
        attempt.failed_from.remove(&from);
        attempt.relinquished_to.remove(&from);

        if !quorum.is_covered_by(&attempt.replies) {
            return None;
        }

        let ts = attempt.ts;
        self.phase = Phase::InCriticalSection { ts };
        Some(ts)
    }

    pub(crate) fn on_failed(
        &mut self,
        from: NodeId,
        request_ts: Option<Timestamp>,
        out: &mut Vec<Outgoing>,
    ) {
        let Phase::Requesting(attempt) = &mut self.phase else {
            return;
        };
        if request_ts.is_some_and(|ts| ts != attempt.ts) {
            return;
        }

        attempt.failed_from.insert(from);
        for gatekeeper in std::mem::take(&mut attempt.deferred_inquiries) {
            attempt.relinquish(gatekeeper, out);
        }
    }

    pub(crate) fn on_inquire(
        &mut self,
        from: NodeId,
        request_ts: Option<Timestamp>,
        out: &mut Vec<Outgoing>,
    ) {
        let Phase::Requesting(attempt) = &mut self.phase else {
            // In the critical section the coming RELEASE answers the inquiry.
            return;
        };
        if request_ts.is_some_and(|ts| ts != attempt.ts) || !attempt.replies.contains(&from) {
            debug!(node = self.node, from, ?request_ts, "stale inquiry ignored");
            return;
        }

        if attempt.is_blocked() {
            attempt.relinquish(from, out);
        } else {
            attempt.deferred_inquiries.insert(from);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requesting(ts: Timestamp) -> Requester {
        let mut requester = Requester::new(0);
        requester.begin(ts);
        requester
    }

    #[test]
    fn enters_once_every_member_replied() {
        let quorum = Quorum::new([1, 2, 3]);
        let mut requester = requesting(4);

        assert_eq!(requester.on_reply(1, Some(4), &quorum), None);
        assert_eq!(requester.on_reply(3, Some(4), &quorum), None);
        assert_eq!(requester.on_reply(2, Some(4), &quorum), Some(4));
        assert_eq!(requester.state(), RequesterState::InCriticalSection);
    }

    #[test]
    fn reply_for_other_request_is_ignored() {
        let quorum = Quorum::new([1]);
        let mut requester = requesting(4);

        assert_eq!(requester.on_reply(1, Some(2), &quorum), None);
        assert_eq!(requester.state(), RequesterState::Requesting);
    }

    #[test]
    fn inquiry_is_deferred_until_failed() {
        let mut requester = requesting(4);
        let quorum = Quorum::new([1, 2, 3]);
        let mut out = Vec::new();
        requester.on_reply(1, Some(4), &quorum);

        requester.on_inquire(1, Some(4), &mut out);
        assert!(out.is_empty());

        requester.on_failed(2, Some(4), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].kind, out[0].to, out[0].request_ts), (MessageKind::Relinquish, 1, 4));
        assert!(requester.replies_received().is_empty());
    }

    #[test]
    fn blocked_requester_relinquishes_immediately() {
        let mut requester = requesting(4);
        let quorum = Quorum::new([1, 2, 3]);
        let mut out = Vec::new();
        requester.on_reply(1, Some(4), &quorum);
        requester.on_failed(3, Some(4), &mut out);
        assert!(out.is_empty());

        requester.on_inquire(1, Some(4), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, MessageKind::Relinquish);
    }

    #[test]
    fn inquiry_in_critical_section_is_ignored() {
        let quorum = Quorum::new([1]);
        let mut requester = requesting(4);
        let mut out = Vec::new();
        requester.on_reply(1, Some(4), &quorum);

        requester.on_inquire(1, Some(4), &mut out);

        assert!(out.is_empty());
        assert_eq!(requester.state(), RequesterState::InCriticalSection);
    }

    #[test]
    fn preconditions_are_enforced() {
        let mut requester = Requester::new(7);
        assert_eq!(requester.finish(), Err(CoreError::NotInCriticalSection { node: 7 }));

        requester.begin(1);
        assert_eq!(requester.ensure_idle(), Err(CoreError::AlreadyRequesting { node: 7 }));

        requester.on_reply(2, Some(1), &Quorum::new([2]));
        assert_eq!(requester.ensure_idle(), Err(CoreError::AlreadyInCriticalSection { node: 7 }));
        assert_eq!(requester.finish(), Ok(1));
        assert_eq!(requester.ensure_idle(), Ok(()));
    }
}

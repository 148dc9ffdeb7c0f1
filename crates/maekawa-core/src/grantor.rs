//! Gatekeeper role.
//!
//! Each node owns one permission token. It lends the token to at most one
//! requester at a time and queues everyone else in `(timestamp, node)` order.
//!
//! # State Machine
//!
//! ```text
//!              REQUEST                    RELEASE (queue empty)
//! ┌───────────┐ ──────> ┌───────────────┐ ───────────────────> ┌───────────┐
//! │ Ungranted │         │ Granted(head) │                      │ Ungranted │
//! └───────────┘         └───────────────┘ <─┐                  └───────────┘
//!                               │           │ RELEASE / RELINQUISH
//!                               └───────────┘ (grant next in queue)
//! ```
//!
//! When a request arrives that outranks both the holder and every queued
//! entry, the gatekeeper sends one INQUIRE to the holder asking for the token
//! back; any request that cannot win right now is told FAILED. These two
//! messages let requesters that hold tokens they cannot use give them up,
//! which is what keeps contending requesters from waiting on each other
//! forever.

use std::collections::BTreeSet;

use maekawa_proto::{MessageKind, NodeId, Timestamp};
use tracing::{debug, warn};

use crate::node::Outgoing;

/// A request waiting at (or holding) a gatekeeper.
///
/// Ordered by timestamp, then node id: a total order consistent with Lamport
/// causality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestEntry {
    /// Timestamp of the request
    pub ts: Timestamp,
    /// Requesting node
    pub node: NodeId,
}

impl RequestEntry {
    /// Entry for `node`'s request stamped `ts`.
    pub fn new(ts: Timestamp, node: NodeId) -> Self {
        Self { ts, node }
    }
}

/// Gatekeeper state of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grantor {
    granted: Option<RequestEntry>,
    queue: BTreeSet<RequestEntry>,
    inquired: bool,
}

impl Grantor {
    /// Gatekeeper with its token free.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request currently holding the token.
    pub fn granted(&self) -> Option<RequestEntry> {
        self.granted
    }

    /// Waiting requests, smallest first.
    pub fn queue(&self) -> impl Iterator<Item = RequestEntry> + '_ {
        self.queue.iter().copied()
    }

    /// Whether an INQUIRE is outstanding for the current grant.
    pub fn inquired(&self) -> bool {
        self.inquired
    }

    pub(crate) fn on_request(&mut self, entry: RequestEntry, out: &mut Vec<Outgoing>) {
        let Some(holder) = self.granted else {
            self.grant(entry, out);
            return;
        };

        if holder == entry || self.queue.contains(&entry) {
            debug!(node = entry.node, ts = entry.ts, "duplicate request ignored");
            return;
        }

        let previous_head = self.queue.first().copied();
        self.queue.insert(entry);

        let outranks_all = entry < holder && previous_head.is_none_or(|head| entry < head);
        if outranks_all {
            debug!(node = entry.node, ts = entry.ts, holder = holder.node, "request outranks holder");
            if !self.inquired {
                self.inquired = true;
                out.push(Outgoing::new(MessageKind::Inquire, holder.node, holder.ts));
            }
            if let Some(head) = previous_head {
                out.push(Outgoing::new(MessageKind::Failed, head.node, head.ts));
            }
        } else {
            debug!(node = entry.node, ts = entry.ts, holder = holder.node, "request queued");
            out.push(Outgoing::new(MessageKind::Failed, entry.node, entry.ts));
        }
    }

    pub(crate) fn on_release(&mut self, from: NodeId, out: &mut Vec<Outgoing>) {
        match self.granted {
            Some(holder) if holder.node == from => {
                self.granted = None;
                self.inquired = false;
                if let Some(next) = self.queue.pop_first() {
                    self.grant(next, out);
                }
            },
            other => {
                warn!(from, holder = ?other.map(|e| e.node), "release from node that holds no grant");
            },
        }
    }

    pub(crate) fn on_relinquish(&mut self, entry: RequestEntry, out: &mut Vec<Outgoing>) {
        if self.granted != Some(entry) {
            debug!(node = entry.node, ts = entry.ts, "stale relinquish ignored");
            return;
        }

        self.granted = None;
        self.inquired = false;
        self.queue.insert(entry);
        if let Some(next) = self.queue.pop_first() {
            self.grant(next, out);
        }
    }

    fn grant(&mut self, entry: RequestEntry, out: &mut Vec<Outgoing>) {
        debug!(node = entry.node, ts = entry.ts, "granting token");
        self.granted = Some(entry);
        out.push(Outgoing::new(MessageKind::Reply, entry.node, entry.ts));
    }
}

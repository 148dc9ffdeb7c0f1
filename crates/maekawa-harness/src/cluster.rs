//! In-memory cluster with an explicit delivery schedule.
//!
//! Every node is a bare [`MaekawaNode`]; messages wait in one FIFO queue per
//! directed link until a test delivers them. This gives tests full control of
//! interleavings while keeping the per-link ordering that the runtime's
//! streams guarantee.
//!
//! Mutual exclusion is checked after every step: a step that leaves two
//! nodes inside the critical section fails with
//! [`ClusterError::MutualExclusionViolated`].

use std::collections::{BTreeMap, VecDeque};

use maekawa_core::{CoreError, MaekawaNode, NodeAction, QuorumTable, RequesterState};
use maekawa_proto::{Message, NodeId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::trace;

/// Errors from driving a [`Cluster`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// No node with this id
    #[error("no node {0} in cluster")]
    UnknownNode(NodeId),

    /// The link has no message waiting
    #[error("nothing in flight from {from} to {to}")]
    NothingToDeliver {
        /// Sending node
        from: NodeId,
        /// Receiving node
        to: NodeId,
    },

    /// A node rejected an operation or message
    #[error(transparent)]
    Core(#[from] CoreError),

    /// More than one node is inside the critical section
    #[error("mutual exclusion violated: nodes {holders:?} are all in the critical section")]
    MutualExclusionViolated {
        /// Nodes inside the critical section
        holders: Vec<NodeId>,
    },

    /// Deliveries did not quiesce within the step limit
    #[error("messages still in flight after {steps} deliveries")]
    NoQuiescence {
        /// Deliveries performed
        steps: usize,
    },

    /// Nothing left to deliver, yet some requests never completed
    #[error("nodes {waiting:?} are stuck requesting with nothing in flight")]
    Stalled {
        /// Nodes still waiting for their quorum
        waiting: Vec<NodeId>,
    },
}

/// One move of a random schedule.
#[derive(Debug, Clone, Copy)]
enum Move {
    Request(NodeId),
    Release(NodeId),
    Deliver,
}

/// Deliveries allowed before [`Cluster::deliver_all`] gives up.
const MAX_DELIVERIES: usize = 100_000;

/// A set of nodes wired together by in-memory FIFO links.
#[derive(Debug, Clone)]
pub struct Cluster {
    nodes: Vec<MaekawaNode>,
    links: BTreeMap<(NodeId, NodeId), VecDeque<Message>>,
    entries: Vec<NodeId>,
    delivered: usize,
}

impl Cluster {
    /// One node per quorum in `table`; node `i` uses quorum `i`.
    pub fn new(table: &QuorumTable) -> Self {
        let nodes = table.iter().map(|(id, quorum)| MaekawaNode::new(id, quorum.clone())).collect();
        Self { nodes, links: BTreeMap::new(), entries: Vec::new(), delivered: 0 }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cluster has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node `id`.
    pub fn node(&self, id: NodeId) -> Option<&MaekawaNode> {
        self.nodes.get(id as usize)
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> &[MaekawaNode] {
        &self.nodes
    }

    /// Node `id` asks for the critical section.
    pub fn request(&mut self, id: NodeId) -> Result<(), ClusterError> {
        let actions = self.node_mut(id)?.request_access()?;
        self.apply(id, actions)
    }

    /// Node `id` leaves the critical section.
    pub fn release(&mut self, id: NodeId) -> Result<(), ClusterError> {
        let actions = self.node_mut(id)?.release_access()?;
        self.apply(id, actions)
    }

    /// Deliver the oldest message on link `from -> to`.
    pub fn deliver(&mut self, from: NodeId, to: NodeId) -> Result<Message, ClusterError> {
        let message = self
            .links
            .get_mut(&(from, to))
            .and_then(VecDeque::pop_front)
            .ok_or(ClusterError::NothingToDeliver { from, to })?;
        self.links.retain(|_, queue| !queue.is_empty());

        trace!(from, to, %message, "delivering");
        self.delivered += 1;
        let actions = self.node_mut(to)?.handle_message(&message)?;
        self.apply(to, actions)?;
        Ok(message)
    }

    /// Deliver the oldest message on the `index`-th busy link, modulo the
    /// number of busy links. Returns `None` when nothing is in flight.
    pub fn deliver_nth(&mut self, index: usize) -> Result<Option<Message>, ClusterError> {
        let busy = self.busy_links();
        if busy.is_empty() {
            return Ok(None);
        }
        let (from, to) = busy[index % busy.len()];
        self.deliver(from, to).map(Some)
    }

    /// Re-send a copy of the oldest message on link `from -> to`, directly
    /// behind the original, as a network duplicating a packet would.
    pub fn duplicate(&mut self, from: NodeId, to: NodeId) -> Result<Message, ClusterError> {
        let queue = self
            .links
            .get_mut(&(from, to))
            .filter(|queue| !queue.is_empty())
            .ok_or(ClusterError::NothingToDeliver { from, to })?;
        let copy = queue[0].clone();
        queue.insert(1, copy.clone());
        Ok(copy)
    }

    /// Deliver until no message is in flight, links taken round-robin in id
    /// order. Returns the number of deliveries.
    pub fn deliver_all(&mut self) -> Result<usize, ClusterError> {
        let mut steps = 0;
        while !self.links.is_empty() {
            for (from, to) in self.busy_links() {
                self.deliver(from, to)?;
                steps += 1;
            }
            if steps > MAX_DELIVERIES {
                return Err(ClusterError::NoQuiescence { steps });
            }
        }
        Ok(steps)
    }

    /// Run a seeded random schedule until every node has completed `cycles`
    /// critical-section cycles and nothing is in flight.
    ///
    /// Each step picks uniformly among: an idle node with cycles left
    /// requesting, the holder releasing, or delivering the head of a random
    /// busy link.
    pub fn run_random(&mut self, seed: u64, cycles: u32) -> Result<(), ClusterError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut remaining = vec![cycles; self.nodes.len()];
        let mut steps = 0;

        loop {
            let mut moves = Vec::new();
            for node in &self.nodes {
                match node.requester_state() {
                    RequesterState::Idle if remaining[node.id() as usize] > 0 => {
                        moves.push(Move::Request(node.id()));
                    },
                    RequesterState::InCriticalSection => moves.push(Move::Release(node.id())),
                    RequesterState::Idle | RequesterState::Requesting => {},
                }
            }
            if !self.links.is_empty() {
                moves.push(Move::Deliver);
            }

            let Some(&next) = moves.get(rng.gen_range(0..moves.len().max(1))) else { break };
            match next {
                Move::Request(id) => {
                    remaining[id as usize] -= 1;
                    self.request(id)?;
                },
                Move::Release(id) => self.release(id)?,
                Move::Deliver => {
                    self.deliver_nth(rng.gen_range(0..self.links.len()))?;
                },
            }

            steps += 1;
            if steps > MAX_DELIVERIES {
                return Err(ClusterError::NoQuiescence { steps });
            }
        }

        let waiting: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|node| node.requester_state() != RequesterState::Idle)
            .map(MaekawaNode::id)
            .collect();
        if waiting.is_empty() { Ok(()) } else { Err(ClusterError::Stalled { waiting }) }
    }

    /// Messages waiting on link `from -> to`, oldest first.
    pub fn in_flight(&self, from: NodeId, to: NodeId) -> Vec<Message> {
        self.links.get(&(from, to)).map(|queue| queue.iter().cloned().collect()).unwrap_or_default()
    }

    /// Total messages waiting on all links.
    pub fn pending(&self) -> usize {
        self.links.values().map(VecDeque::len).sum()
    }

    /// Links with at least one message waiting.
    pub fn busy_links(&self) -> Vec<(NodeId, NodeId)> {
        self.links.keys().copied().collect()
    }

    /// Nodes currently inside the critical section.
    pub fn holders(&self) -> Vec<NodeId> {
        self.nodes.iter().filter(|node| node.in_critical_section()).map(MaekawaNode::id).collect()
    }

    /// Critical-section entries made by `id` so far.
    pub fn entries_of(&self, id: NodeId) -> usize {
        self.entries.iter().filter(|&&entry| entry == id).count()
    }

    /// Every critical-section entry so far, in order.
    pub fn entries(&self) -> &[NodeId] {
        &self.entries
    }

    /// Total messages delivered so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MaekawaNode, ClusterError> {
        self.nodes.get_mut(id as usize).ok_or(ClusterError::UnknownNode(id))
    }

    fn apply(&mut self, from: NodeId, actions: Vec<NodeAction>) -> Result<(), ClusterError> {
        for action in actions {
            match action {
                NodeAction::Send { to, message } => {
                    self.links.entry((from, to)).or_default().push_back(message);
                },
                NodeAction::EnterCriticalSection { .. } => self.entries.push(from),
            }
        }

        let holders = self.holders();
        if holders.len() > 1 {
            return Err(ClusterError::MutualExclusionViolated { holders });
        }
        Ok(())
    }
}

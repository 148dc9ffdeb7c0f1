//! Quorums and quorum tables.
//!
//! A node may enter the critical section only with permission from every
//! member of its quorum. Mutual exclusion rests on one property of the table:
//! any two quorums share at least one member, the gatekeeper that can grant
//! its single token to only one of them at a time.

use std::collections::BTreeSet;

use maekawa_proto::NodeId;

use crate::error::QuorumError;

/// Classic Maekawa table for four nodes. Each quorum contains its owner.
pub const FOUR_NODE_QUORUMS: [[NodeId; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];

/// Set of nodes whose permission one node needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quorum {
    members: BTreeSet<NodeId>,
}

impl Quorum {
    /// Build a quorum from its members. Duplicates collapse.
    pub fn new(members: impl IntoIterator<Item = NodeId>) -> Self {
        Self { members: members.into_iter().collect() }
    }

    /// Members in ascending order.
    pub fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied()
    }

    /// Whether `node` belongs to this quorum.
    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the quorum has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the two quorums share a member.
    pub fn intersects(&self, other: &Self) -> bool {
        self.members.intersection(&other.members).next().is_some()
    }

    /// Whether `replied` covers every member.
    pub fn is_covered_by(&self, replied: &BTreeSet<NodeId>) -> bool {
        self.members.is_subset(replied)
    }
}

/// Quorum assignment for a whole cluster, indexed by node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumTable {
    quorums: Vec<Quorum>,
}

impl QuorumTable {
    /// Validate and build a table; `quorums[i]` belongs to node `i`.
    pub fn new(quorums: Vec<Quorum>) -> Result<Self, QuorumError> {
        let table = Self { quorums };
        table.validate()?;
        Ok(table)
    }

    /// Every node asks every other node (self excluded).
    ///
    /// Needs at least three nodes: with two, the quorums `{1}` and `{0}` are
    /// disjoint.
    pub fn all_others(nodes: usize) -> Result<Self, QuorumError> {
        let quorums = (0..nodes as NodeId)
            .map(|id| Quorum::new((0..nodes as NodeId).filter(|&member| member != id)))
            .collect();
        Self::new(quorums)
    }

    /// The [`FOUR_NODE_QUORUMS`] table.
    pub fn maekawa_four() -> Self {
        Self { quorums: FOUR_NODE_QUORUMS.iter().map(|members| Quorum::new(*members)).collect() }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.quorums.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.quorums.is_empty()
    }

    /// Quorum of `node`.
    pub fn quorum_for(&self, node: NodeId) -> Option<&Quorum> {
        self.quorums.get(node as usize)
    }

    /// `(node, quorum)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Quorum)> {
        self.quorums.iter().enumerate().map(|(id, quorum)| (id as NodeId, quorum))
    }

    /// Check the table invariants.
    ///
    /// Every quorum is non-empty, names only nodes of the table, and shares a
    /// member with every other quorum.
    pub fn validate(&self) -> Result<(), QuorumError> {
        if self.quorums.is_empty() {
            return Err(QuorumError::NoNodes);
        }

        let size = self.quorums.len();
        for (node, quorum) in self.iter() {
            if quorum.is_empty() {
                return Err(QuorumError::Empty { node });
            }
            if let Some(member) = quorum.members().find(|&member| member as usize >= size) {
                return Err(QuorumError::MemberOutOfRange { node, member, size });
            }
        }

        for (a, first) in self.iter() {
            for (b, second) in self.iter().skip(a as usize + 1) {
                if !first.intersects(second) {
                    return Err(QuorumError::Disjoint { a, b });
                }
            }
        }

        Ok(())
    }
}

//! Error types for the protocol core.

use maekawa_proto::NodeId;
use thiserror::Error;

/// Errors from node operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// `request_access` while a request is still waiting for replies
    #[error("node {node} already has a request outstanding")]
    AlreadyRequesting {
        /// Node that was asked
        node: NodeId,
    },

    /// `request_access` while inside the critical section
    #[error("node {node} is already in the critical section")]
    AlreadyInCriticalSection {
        /// Node that was asked
        node: NodeId,
    },

    /// `release_access` outside the critical section
    #[error("node {node} is not in the critical section")]
    NotInCriticalSection {
        /// Node that was asked
        node: NodeId,
    },

    /// Unicast message addressed to a different node
    #[error("message for node {dest} delivered to node {node}")]
    Misaddressed {
        /// Node that received the message
        node: NodeId,
        /// Destination named in the message
        dest: NodeId,
    },
}

/// Errors from quorum table validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuorumError {
    /// Table has no quorums at all
    #[error("quorum table is empty")]
    NoNodes,

    /// A node was given an empty quorum
    #[error("quorum of node {node} is empty")]
    Empty {
        /// Owner of the empty quorum
        node: NodeId,
    },

    /// A quorum names a node outside `0..size`
    #[error("quorum of node {node} names node {member}, but the table has {size} nodes")]
    MemberOutOfRange {
        /// Owner of the quorum
        node: NodeId,
        /// Offending member
        member: NodeId,
        /// Number of nodes in the table
        size: usize,
    },

    /// Two quorums share no member, so mutual exclusion cannot hold
    #[error("quorums of nodes {a} and {b} do not intersect")]
    Disjoint {
        /// First node
        a: NodeId,
        /// Second node
        b: NodeId,
    },

    /// Table size does not match the requested cluster size
    #[error("quorum table has {actual} nodes, expected {expected}")]
    SizeMismatch {
        /// Expected node count
        expected: usize,
        /// Actual node count
        actual: usize,
    },
}

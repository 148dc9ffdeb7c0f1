//! Node and driver configuration.
//!
//! Both are read-only inputs validated at construction: the runtime never
//! mutates them.

use std::{collections::BTreeMap, time::Duration};

use maekawa_core::{Quorum, QuorumTable};
use maekawa_proto::NodeId;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A quorum member has no address to send to
    #[error("node {node} has no address for quorum member {peer}")]
    MissingAddress {
        /// Node being configured
        node: NodeId,
        /// Member without an address
        peer: NodeId,
    },

    /// Node id is not part of the quorum table
    #[error("node {node} is not in a quorum table of {size} nodes")]
    UnknownNode {
        /// Requested node
        node: NodeId,
        /// Table size
        size: usize,
    },

    /// Think-time bounds are inverted
    #[error("think time minimum {min:?} exceeds maximum {max:?}")]
    InvalidThinkTime {
        /// Lower bound
        min: Duration,
        /// Upper bound
        max: Duration,
    },
}

/// Static configuration of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    id: NodeId,
    quorum: Quorum,
    listen_addr: String,
    peers: BTreeMap<NodeId, String>,
}

impl NodeConfig {
    /// Build a configuration.
    ///
    /// `peers` maps node ids to their listening endpoints. It must cover every
    /// quorum member except the node itself; it may list more nodes, since a
    /// gatekeeper replies to requesters outside its own quorum.
    pub fn new(
        id: NodeId,
        quorum: Quorum,
        listen_addr: impl Into<String>,
        peers: BTreeMap<NodeId, String>,
    ) -> Result<Self, ConfigError> {
        if let Some(peer) =
            quorum.members().find(|&member| member != id && !peers.contains_key(&member))
        {
            return Err(ConfigError::MissingAddress { node: id, peer });
        }

        Ok(Self { id, quorum, listen_addr: listen_addr.into(), peers })
    }

    /// Build a configuration taking the node's quorum from `table`.
    pub fn from_table(
        id: NodeId,
        table: &QuorumTable,
        listen_addr: impl Into<String>,
        peers: BTreeMap<NodeId, String>,
    ) -> Result<Self, ConfigError> {
        let quorum = table
            .quorum_for(id)
            .ok_or(ConfigError::UnknownNode { node: id, size: table.len() })?
            .clone();
        Self::new(id, quorum, listen_addr, peers)
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Quorum this node asks for permission.
    pub fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    /// Address to bind the listening endpoint to.
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Address table, node id to endpoint.
    pub fn peers(&self) -> &BTreeMap<NodeId, String> {
        &self.peers
    }
}

/// Lifecycle parameters of the node driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    cycles: u32,
    think_min: Duration,
    think_max: Duration,
    hold_time: Duration,
}

impl DriverConfig {
    /// Build a driver configuration.
    pub fn new(
        cycles: u32,
        think_min: Duration,
        think_max: Duration,
        hold_time: Duration,
    ) -> Result<Self, ConfigError> {
        if think_min > think_max {
            return Err(ConfigError::InvalidThinkTime { min: think_min, max: think_max });
        }
        Ok(Self { cycles, think_min, think_max, hold_time })
    }

    /// Number of critical-section cycles to run.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Shortest think time before a request.
    pub fn think_min(&self) -> Duration {
        self.think_min
    }

    /// Longest think time before a request.
    pub fn think_max(&self) -> Duration {
        self.think_max
    }

    /// Time spent inside the critical section.
    pub fn hold_time(&self) -> Duration {
        self.hold_time
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cycles: 3,
            think_min: Duration::from_secs(2),
            think_max: Duration::from_secs(8),
            hold_time: Duration::from_secs(1),
        }
    }
}

/// Address table `host:base_port+id` for nodes `0..nodes`.
pub fn address_table(host: &str, base_port: u16, nodes: usize) -> BTreeMap<NodeId, String> {
    (0..nodes as NodeId)
        .map(|id| (id, format!("{host}:{}", u32::from(base_port) + id)))
        .collect()
}

//! Node runtime errors.

use std::io;

use maekawa_core::{CoreError, QuorumError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the node runtime and driver.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Listening endpoint could not be bound; the node cannot start
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed to bind
        addr: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The node's event loop is no longer running
    #[error("node runtime has stopped")]
    Stopped,

    /// Protocol precondition violated
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Invalid node or driver configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid quorum table
    #[error(transparent)]
    Quorum(#[from] QuorumError),

    /// Other I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

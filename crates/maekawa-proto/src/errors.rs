//! Protocol error types.

use thiserror::Error;

use crate::message::MessageKind;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Length prefix exceeds the payload limit
    #[error("frame payload of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Declared payload size
        size: usize,
        /// Maximum allowed payload size
        max: usize,
    },

    /// Payload is not a valid CBOR message record
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Payload decoded but names a message type this node does not know
    #[error("unknown message type {0:?}")]
    UnknownKind(String),

    /// A unicast message arrived without its destination
    #[error("{kind} message is missing its destination")]
    MissingDestination {
        /// Kind of the offending message
        kind: MessageKind,
    },

    /// Serialization failed
    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Whether the stream can no longer be trusted after this error.
    ///
    /// Payload-level errors consume exactly one frame, so decoding can resume
    /// at the next length prefix. A bad length prefix cannot be skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. })
    }
}

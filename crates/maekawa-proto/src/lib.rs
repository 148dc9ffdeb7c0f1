//! Wire format for the Maekawa mutual-exclusion protocol.
//!
//! Every message travels as a frame: a 4-byte big-endian length prefix
//! followed by a CBOR payload. The length prefix makes the stream
//! self-delimiting, so a reader can always split concatenated frames back into
//! exact records no matter how the transport chunks the bytes. CBOR keeps the
//! payload self-describing: receivers ignore fields they do not know, which
//! lets newer peers add fields without breaking older ones.
//!
//! # Security
//!
//! Payloads are capped at [`frame::MAX_PAYLOAD_SIZE`]. A larger length prefix
//! is treated as a desynchronized stream and is fatal for the connection.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod message;

pub use errors::{ProtocolError, Result};
pub use frame::{FrameDecoder, encode, encode_to_vec};
pub use message::{Message, MessageKind, NodeId, Timestamp};

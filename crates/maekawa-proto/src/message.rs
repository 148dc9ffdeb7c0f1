//! Protocol messages.
//!
//! A [`Message`] is immutable once constructed: fields are private and only
//! the typed constructors can build one, so a unicast kind can never be
//! created without a destination.
//!
//! # Message kinds
//!
//! - `REQUEST` / `RELEASE`: multicast by a requester to its quorum
//! - `REPLY`: a gatekeeper grants its token to one requester
//! - `INQUIRE`: a gatekeeper asks its current holder to give the token back
//! - `FAILED`: a gatekeeper tells a requester it is outranked
//! - `RELINQUISH`: a requester returns a token in answer to `INQUIRE`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Participant identifier, `0..N-1`.
pub type NodeId = u32;

/// Lamport logical timestamp.
pub type Timestamp = u64;

/// Type of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    /// Ask a gatekeeper for its token
    Request,
    /// Grant the token to a requester
    Reply,
    /// Give up the critical section
    Release,
    /// Ask the holder whether it can give the token back
    Inquire,
    /// Tell a requester that an older request outranks it
    Failed,
    /// Return a token to the gatekeeper that inquired about it
    Relinquish,
}

impl MessageKind {
    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Reply => "REPLY",
            Self::Release => "RELEASE",
            Self::Inquire => "INQUIRE",
            Self::Failed => "FAILED",
            Self::Relinquish => "RELINQUISH",
        }
    }

    /// Parse a wire name. Returns `None` for names this version does not know.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "REQUEST" => Some(Self::Request),
            "REPLY" => Some(Self::Reply),
            "RELEASE" => Some(Self::Release),
            "INQUIRE" => Some(Self::Inquire),
            "FAILED" => Some(Self::Failed),
            "RELINQUISH" => Some(Self::Relinquish),
            _ => None,
        }
    }

    /// Whether this kind is addressed to exactly one node.
    pub fn is_unicast(self) -> bool {
        !matches!(self, Self::Request | Self::Release)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    kind: MessageKind,
    src: NodeId,
    dest: Option<NodeId>,
    ts: Timestamp,
    request_ts: Option<Timestamp>,
}

impl Message {
    /// Permission request, multicast to the sender's quorum.
    ///
    /// The timestamp doubles as the request's identity: every copy of one
    /// multicast carries the same value.
    pub fn request(src: NodeId, ts: Timestamp) -> Self {
        Self { kind: MessageKind::Request, src, dest: None, ts, request_ts: None }
    }

    /// Release of the critical section, multicast to the sender's quorum.
    pub fn release(src: NodeId, ts: Timestamp) -> Self {
        Self { kind: MessageKind::Release, src, dest: None, ts, request_ts: None }
    }

    /// Grant for the request stamped `request_ts`.
    pub fn reply(src: NodeId, dest: NodeId, ts: Timestamp, request_ts: Timestamp) -> Self {
        Self::unicast(MessageKind::Reply, src, dest, ts, request_ts)
    }

    /// Inquiry about the grant held by the request stamped `request_ts`.
    pub fn inquire(src: NodeId, dest: NodeId, ts: Timestamp, request_ts: Timestamp) -> Self {
        Self::unicast(MessageKind::Inquire, src, dest, ts, request_ts)
    }

    /// Notice that the request stamped `request_ts` is outranked.
    pub fn failed(src: NodeId, dest: NodeId, ts: Timestamp, request_ts: Timestamp) -> Self {
        Self::unicast(MessageKind::Failed, src, dest, ts, request_ts)
    }

    /// Return of the grant obtained by the request stamped `request_ts`.
    pub fn relinquish(src: NodeId, dest: NodeId, ts: Timestamp, request_ts: Timestamp) -> Self {
        Self::unicast(MessageKind::Relinquish, src, dest, ts, request_ts)
    }

    fn unicast(
        kind: MessageKind,
        src: NodeId,
        dest: NodeId,
        ts: Timestamp,
        request_ts: Timestamp,
    ) -> Self {
        Self { kind, src, dest: Some(dest), ts, request_ts: Some(request_ts) }
    }

    /// Message type.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Sending node.
    pub fn src(&self) -> NodeId {
        self.src
    }

    /// Destination node (always set for unicast kinds).
    pub fn dest(&self) -> Option<NodeId> {
        self.dest
    }

    /// Sender's Lamport clock at the send event.
    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    /// Timestamp of the request a unicast refers to.
    pub fn request_ts(&self) -> Option<Timestamp> {
        self.request_ts
    }

    pub(crate) fn to_wire(&self) -> WireMessage {
        WireMessage {
            kind: self.kind.as_str().to_string(),
            src: self.src,
            dest: self.dest,
            ts: self.ts,
            req_ts: self.request_ts,
        }
    }

    pub(crate) fn from_wire(wire: WireMessage) -> Result<Self> {
        let kind = MessageKind::from_wire(&wire.kind).ok_or(ProtocolError::UnknownKind(wire.kind))?;
        if kind.is_unicast() && wire.dest.is_none() {
            return Err(ProtocolError::MissingDestination { kind });
        }
        Ok(Self { kind, src: wire.src, dest: wire.dest, ts: wire.ts, request_ts: wire.req_ts })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(src={}, ts={}", self.kind, self.src, self.ts)?;
        if let Some(dest) = self.dest {
            write!(f, ", dest={dest}")?;
        }
        if let Some(request_ts) = self.request_ts {
            write!(f, ", req_ts={request_ts}")?;
        }
        f.write_str(")")
    }
}

/// Serialized form. Unknown fields are ignored on decode.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) src: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) dest: Option<NodeId>,
    pub(crate) ts: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) req_ts: Option<Timestamp>,
}

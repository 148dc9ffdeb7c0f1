//! Maekawa protocol core logic
//!
//! Pure state machine logic for quorum-based mutual exclusion, completely
//! decoupled from I/O. This enables deterministic testing of every message
//! interleaving.
//!
//! # Architecture
//!
//! A [`MaekawaNode`] owns one participant's protocol state: its Lamport
//! clock, its gatekeeper role (who holds this node's token, who is queued for
//! it) and its requester role (which quorum members have granted). Operations
//! never touch sockets or timers. They return [`NodeAction`]s describing the
//! messages to send and the moment the critical section may be entered; a
//! runtime or test harness executes them.
//!
//! # Components
//!
//! - [`node`]: The node state machine and its actions
//! - [`grantor`]: Gatekeeper role (single token, sorted request queue)
//! - [`requester`]: Requester role (reply tracking, inquiry handling)
//! - [`clock`]: Lamport clock
//! - [`quorum`]: Quorums and quorum tables with intersection checks
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`transport`]: Transport abstraction (listeners, streams)
//! - [`error`]: Core error types

pub mod clock;
pub mod env;
pub mod error;
pub mod grantor;
pub mod node;
pub mod quorum;
pub mod requester;
pub mod transport;

pub use clock::LamportClock;
pub use env::Environment;
pub use error::{CoreError, QuorumError};
pub use grantor::{Grantor, RequestEntry};
pub use node::{MaekawaNode, NodeAction};
pub use quorum::{Quorum, QuorumTable};
pub use requester::RequesterState;
pub use transport::{Transport, TransportListener};

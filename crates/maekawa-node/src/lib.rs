//! Maekawa node runtime
//!
//! Runs the [`maekawa_core::MaekawaNode`] state machine over real streams.
//!
//! # Architecture
//!
//! Each node is one tokio event-loop task owning the protocol state. An accept
//! loop spawns a reader task per inbound connection; readers decode frames
//! and forward messages to the event loop. Outbound messages go through a
//! [`PeerSet`], which keeps one writer task and one lazily opened stream per
//! destination. Local callers talk to the node through a [`NodeHandle`].
//!
//! The [`NodeDriver`] exercises a node through repeated critical-section
//! cycles and then waits at a shared [`TerminationBarrier`] so that no node
//! stops serving peers while others still need its vote.
//!
//! # Components
//!
//! - [`runtime`]: Event loop, [`NodeHandle`], [`NodeSnapshot`]
//! - [`peers`]: Outbound writer tasks
//! - [`driver`]: Think / request / hold / release lifecycle
//! - [`barrier`]: Termination barrier
//! - [`config`]: Node and driver configuration
//! - [`tcp`]: TCP transport
//! - [`system_env`]: Real time and randomness

pub mod barrier;
pub mod config;
pub mod driver;
pub mod error;
mod inbound;
pub mod peers;
pub mod runtime;
pub mod system_env;
pub mod tcp;

pub use barrier::TerminationBarrier;
pub use config::{ConfigError, DriverConfig, NodeConfig, address_table};
pub use driver::{CriticalSectionObserver, DriverReport, NodeDriver};
pub use error::NodeError;
pub use peers::PeerSet;
pub use runtime::{NodeHandle, NodeRuntime, NodeSnapshot};
pub use system_env::SystemEnv;
pub use tcp::{TcpListener, TcpTransport};

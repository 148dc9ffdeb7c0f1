//! Deterministic simulation harness for Maekawa protocol testing.
//!
//! Two levels of simulation:
//!
//! - [`Cluster`]: bare state machines connected by in-memory FIFO links,
//!   delivered on an explicit schedule. Drives scenario and property tests.
//! - [`SimEnv`] / [`SimTransport`]: Turmoil-based implementations of the
//!   Environment and Transport traits, so the real node runtime and driver
//!   run under simulated latency and virtual time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod scenario;
pub mod sim_env;
pub mod sim_transport;

pub use cluster::{Cluster, ClusterError};
pub use sim_env::SimEnv;
pub use sim_transport::{SimListener, SimTransport};

//! Scenario framework.
//!
//! A scenario is a quorum table plus a scripted schedule of requests,
//! releases and deliveries, run against an in-memory [`Cluster`]. Running
//! requires an oracle: a scenario without verification cannot be built.

mod builder;
pub mod oracle;

pub use builder::{RunnableScenario, Scenario, Step};

use crate::cluster::Cluster;

/// Verification run against the final cluster state.
pub type OracleFn = Box<dyn Fn(&Cluster) -> Result<(), String>>;

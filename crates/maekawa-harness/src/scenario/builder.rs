//! Scenario builder API.

use maekawa_core::QuorumTable;
use maekawa_proto::NodeId;

use crate::{cluster::Cluster, scenario::OracleFn};

/// One scripted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Node asks for the critical section
    Request(NodeId),
    /// Node leaves the critical section
    Release(NodeId),
    /// Oldest message on a link arrives
    Deliver {
        /// Sending node
        from: NodeId,
        /// Receiving node
        to: NodeId,
    },
    /// Oldest message on a link is duplicated in flight
    Duplicate {
        /// Sending node
        from: NodeId,
        /// Receiving node
        to: NodeId,
    },
    /// Everything in flight arrives, until quiescent
    DeliverAll,
    /// Seeded random schedule in which every node completes `cycles`
    /// critical-section cycles
    Random {
        /// Schedule seed
        seed: u64,
        /// Cycles per node
        cycles: u32,
    },
}

/// Scenario builder.
///
/// Must call `.oracle()` to get a [`RunnableScenario`].
pub struct Scenario {
    name: String,
    table: QuorumTable,
    steps: Vec<Step>,
}

impl Scenario {
    /// New scenario over `table`.
    pub fn new(name: impl Into<String>, table: QuorumTable) -> Self {
        Self { name: name.into(), table, steps: Vec::new() }
    }

    /// Node `id` requests the critical section.
    pub fn request(self, id: NodeId) -> Self {
        self.step(Step::Request(id))
    }

    /// Node `id` releases the critical section.
    pub fn release(self, id: NodeId) -> Self {
        self.step(Step::Release(id))
    }

    /// Deliver the oldest message from `from` to `to`.
    pub fn deliver(self, from: NodeId, to: NodeId) -> Self {
        self.step(Step::Deliver { from, to })
    }

    /// Duplicate the oldest message from `from` to `to`.
    pub fn duplicate(self, from: NodeId, to: NodeId) -> Self {
        self.step(Step::Duplicate { from, to })
    }

    /// Deliver everything in flight.
    pub fn deliver_all(self) -> Self {
        self.step(Step::DeliverAll)
    }

    /// Run a seeded random schedule of `cycles` per node.
    pub fn random_schedule(self, seed: u64, cycles: u32) -> Self {
        self.step(Step::Random { seed, cycles })
    }

    /// Append an arbitrary step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the oracle and return a runnable scenario.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle, ready to execute.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute every step, then run the oracle on the final state.
    ///
    /// Fails at the first step the cluster rejects, including any step that
    /// violates mutual exclusion.
    pub fn run(self) -> Result<Cluster, String> {
        let Scenario { name, table, steps } = self.scenario;
        let mut cluster = Cluster::new(&table);

        for (index, step) in steps.into_iter().enumerate() {
            let outcome = match step {
                Step::Request(id) => cluster.request(id),
                Step::Release(id) => cluster.release(id),
                Step::Deliver { from, to } => cluster.deliver(from, to).map(drop),
                Step::Duplicate { from, to } => cluster.duplicate(from, to).map(drop),
                Step::DeliverAll => cluster.deliver_all().map(drop),
                Step::Random { seed, cycles } => cluster.run_random(seed, cycles),
            };
            outcome.map_err(|e| format!("Scenario '{name}': step {index} ({step:?}) failed: {e}"))?;
        }

        (self.oracle)(&cluster).map_err(|e| format!("Scenario '{name}': oracle failed: {e}"))?;
        Ok(cluster)
    }
}

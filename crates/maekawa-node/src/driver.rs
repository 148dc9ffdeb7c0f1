//! Node driver: the think / request / hold / release lifecycle.

use std::sync::Arc;

use maekawa_core::Environment;
use maekawa_proto::NodeId;
use tracing::info;

use crate::{
    barrier::TerminationBarrier, config::DriverConfig, error::NodeError, runtime::NodeHandle,
};

/// Hook invoked around every critical-section occupancy.
///
/// Tests use it to check that no two nodes are ever inside at once.
pub trait CriticalSectionObserver: Send + Sync {
    /// `node` has entered the critical section in `cycle`.
    fn entered(&self, node: NodeId, cycle: u32);

    /// `node` is about to leave the critical section in `cycle`.
    fn exited(&self, node: NodeId, cycle: u32);
}

impl CriticalSectionObserver for () {
    fn entered(&self, _node: NodeId, _cycle: u32) {}

    fn exited(&self, _node: NodeId, _cycle: u32) {}
}

/// Outcome of a finished driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverReport {
    /// Node that was driven
    pub node: NodeId,
    /// Critical-section cycles completed
    pub cycles: u32,
}

/// Runs the configured number of critical-section cycles on one node, then
/// waits at the termination barrier.
pub struct NodeDriver<E: Environment> {
    handle: NodeHandle,
    env: E,
    config: DriverConfig,
    barrier: Arc<TerminationBarrier>,
    observer: Arc<dyn CriticalSectionObserver>,
}

impl<E: Environment> NodeDriver<E> {
    /// Create a driver for the node behind `handle`.
    pub fn new(
        handle: NodeHandle,
        env: E,
        config: DriverConfig,
        barrier: Arc<TerminationBarrier>,
    ) -> Self {
        Self { handle, env, config, barrier, observer: Arc::new(()) }
    }

    /// Report critical-section entry and exit to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn CriticalSectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run all cycles, then wait until every participant of the barrier has
    /// finished.
    ///
    /// The node keeps serving peers throughout, including while waiting at
    /// the barrier.
    pub async fn run(self) -> Result<DriverReport, NodeError> {
        let node = self.handle.id();

        for cycle in 0..self.config.cycles() {
            let think = self.env.random_duration(self.config.think_min(), self.config.think_max());
            info!(node, cycle, think_ms = think.as_millis() as u64, "thinking");
            self.env.sleep(think).await;

            let asked = self.env.now();
            self.handle.request_access().await?;
            let waited = self.env.now().saturating_duration_since(asked);
            info!(node, cycle, waited_ms = waited.as_millis() as u64, "holding critical section");

            self.observer.entered(node, cycle);
            self.env.sleep(self.config.hold_time()).await;
            self.observer.exited(node, cycle);

            self.handle.release_access().await?;
        }

        info!(node, cycles = self.config.cycles(), "cycles complete; waiting for peers");
        self.barrier.arrive_and_wait().await;
        info!(node, "all nodes finished");

        Ok(DriverReport { node, cycles: self.config.cycles() })
    }
}

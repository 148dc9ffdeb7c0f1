//! Termination barrier.
//!
//! A node that finished its cycles must keep serving peers: they may still
//! need its vote. The barrier holds every finished node until all of them
//! have arrived, so no node exits while another still depends on it.

use tokio::sync::watch;

/// Counter shared by all participants, released once `parties` have arrived.
#[derive(Debug)]
pub struct TerminationBarrier {
    parties: usize,
    arrived: watch::Sender<usize>,
}

impl TerminationBarrier {
    /// Barrier for `parties` participants.
    pub fn new(parties: usize) -> Self {
        let (arrived, _) = watch::channel(0);
        Self { parties, arrived }
    }

    /// Number of participants the barrier waits for.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Number of participants that have arrived so far.
    pub fn arrived(&self) -> usize {
        *self.arrived.borrow()
    }

    /// Record arrival and wait until every participant has arrived.
    ///
    /// Each participant must call this exactly once.
    pub async fn arrive_and_wait(&self) {
        let mut released = self.arrived.subscribe();
        self.arrived.send_modify(|count| *count += 1);
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = released.wait_for(|count| *count >= self.parties).await;
    }
}

//! Lamport logical clock.

use maekawa_proto::Timestamp;

/// Lamport clock.
///
/// Strictly increases on every send ([`LamportClock::tick`]) and every
/// receive ([`LamportClock::observe`]); never goes backwards. Saturates at
/// `Timestamp::MAX` so a hostile peer cannot overflow it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LamportClock {
    value: Timestamp,
}

impl LamportClock {
    /// Clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value.
    pub fn value(&self) -> Timestamp {
        self.value
    }

    /// Advance for a send event and return the timestamp to stamp on it.
    pub fn tick(&mut self) -> Timestamp {
        self.value = self.value.saturating_add(1);
        self.value
    }

    /// Merge a received timestamp: `max(local, remote) + 1`.
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        self.value = self.value.max(remote).saturating_add(1);
        self.value
    }
}

//! Lamport logical clock.
//!
//! Each participant owns exactly one [`LamportClock`] and threads it through
//! its protocol loop; the clock is never shared between participants.

use crate::types::Timestamp;

/// Process-local Lamport clock.
///
/// - [`tick`](Self::tick) before every locally originated event
/// - [`observe`](Self::observe) exactly once per received message, with the
///   sender's timestamp, before the receive event is timestamped
///
/// If event A causally precedes event B then `time(A) < time(B)`.
///
/// # Examples
///
/// ```
/// use meshbank_core::LamportClock;
///
/// let mut clock = LamportClock::new();
/// assert_eq!(clock.tick(), 1);
/// assert_eq!(clock.observe(7), 8);
/// assert_eq!(clock.observe(2), 9);
/// assert_eq!(clock.now(), 9);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LamportClock {
    now: Timestamp,
}

impl LamportClock {
    /// Clock starting at time 0.
    pub const fn new() -> Self {
        Self { now: 0 }
    }

    /// Current value, without side effects.
    pub const fn now(&self) -> Timestamp {
        self.now
    }

    /// Advance by one and return the new value.
    pub fn tick(&mut self) -> Timestamp {
        self.now = self.now.saturating_add(1);
        self.now
    }

    /// Merge a received timestamp: `max(now, received) + 1`.
    pub fn observe(&mut self, received: Timestamp) -> Timestamp {
        self.now = self.now.max(received).saturating_add(1);
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_is_strictly_increasing() {
        let mut clock = LamportClock::new();
        let mut last = clock.now();
        for _ in 0..100 {
            let next = clock.tick();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_observe_never_decreases_and_passes_received() {
        let mut clock = LamportClock::new();
        let received = [5u64, 3, 3, 0, 42, 41, 100, 1];
        let mut last = clock.now();
        for t in received {
            let now = clock.observe(t);
            assert!(now >= last, "clock went backwards");
            assert!(now > t, "clock not past received timestamp");
            last = now;
        }
        assert_eq!(clock.now(), 104);
    }

    #[test]
    fn test_now_has_no_side_effect() {
        let mut clock = LamportClock::new();
        clock.tick();
        assert_eq!(clock.now(), 1);
        assert_eq!(clock.now(), 1);
    }
}

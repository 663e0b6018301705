//! Session status and reconnect backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No local endpoint registered yet.
    #[default]
    Idle,
    /// Registration or a reconnect attempt is in flight.
    Connecting,
    /// Registered; sends are attempted immediately.
    Ready,
    /// No open link (or registration lost); reconnect pending.
    Degraded,
    /// Logged out. Terminal.
    Closed,
}

impl SessionStatus {
    /// Get a human-readable string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Ready => "ready",
            SessionStatus::Degraded => "degraded",
            SessionStatus::Closed => "closed",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Closed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear-growth reconnect schedule with a hard attempt cap.
///
/// Attempt `n` (1-based) waits `base * n`. After `max_attempts` no further
/// attempt is handed out until [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    /// Create a schedule.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    /// Claim the next attempt, returning its number and delay.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, self.delay_for(self.attempts)))
    }

    /// Delay for attempt `n`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt)
    }

    /// Attempts handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the cap has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Re-arm the counter.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_linearly_and_stops() {
        let mut backoff = Backoff::new(Duration::from_millis(2000), 5);

        for n in 1..=5u32 {
            let (attempt, delay) = backoff.next_attempt().unwrap();
            assert_eq!(attempt, n);
            assert_eq!(delay, Duration::from_millis(2000 * n as u64));
        }

        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_attempt(), None);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_backoff_saturates() {
        let mut backoff = Backoff::new(Duration::MAX, 3);
        backoff.next_attempt();
        let (attempt, delay) = backoff.next_attempt().unwrap();
        assert_eq!(attempt, 2);
        assert_eq!(delay, Duration::MAX);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(2000), 5);
        while backoff.next_attempt().is_some() {}

        backoff.reset();
        assert_eq!(
            backoff.next_attempt(),
            Some((1, Duration::from_millis(2000)))
        );
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SessionStatus::Degraded.to_string(), "degraded");
        assert!(SessionStatus::Closed.is_terminal());
        assert!(!SessionStatus::Degraded.is_terminal());
        assert_eq!(
            serde_json::to_string(&SessionStatus::Ready).unwrap(),
            "\"ready\""
        );
    }
}

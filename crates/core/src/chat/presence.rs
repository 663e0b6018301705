//! Typing and presence state.
//!
//! All of this is ephemeral and never persisted. Deadlines are expressed in
//! [`tokio::time::Instant`] so the session loop can sleep on them and tests
//! can drive them with a paused clock.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for "never" when a deadline would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, saturating instead of panicking on overflow.
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Signal the local side should put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    /// Send `typing` with `isTyping: true`.
    Start,
    /// Send `typing` with `isTyping: false`.
    Stop,
}

/// Debounces local keystrokes into start/stop signals.
#[derive(Debug)]
pub struct TypingEmitter {
    idle: Duration,
    stop_at: Option<Instant>,
}

impl TypingEmitter {
    /// Stop signalling after `idle` without keystrokes.
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            stop_at: None,
        }
    }

    /// Record a keystroke. Returns `Start` only for the first one after idle.
    pub fn keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        let was_typing = self.stop_at.is_some();
        self.stop_at = Some(deadline_after(now, self.idle));
        if was_typing {
            None
        } else {
            Some(TypingSignal::Start)
        }
    }

    /// Stop right away (message sent, logout).
    pub fn stop(&mut self) -> Option<TypingSignal> {
        self.stop_at.take().map(|_| TypingSignal::Stop)
    }

    /// Fire the idle timeout if it is due.
    pub fn poll_idle(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.stop_at {
            Some(deadline) if now >= deadline => self.stop(),
            _ => None,
        }
    }

    /// When the idle timeout fires, if typing.
    pub fn deadline(&self) -> Option<Instant> {
        self.stop_at
    }

    /// Whether a start was sent without a stop yet.
    pub fn is_typing(&self) -> bool {
        self.stop_at.is_some()
    }
}

/// Remote typing indicator with a safety expiry.
#[derive(Debug)]
pub struct TypingTracker {
    expiry: Duration,
    active: Option<(String, Instant)>,
}

impl TypingTracker {
    /// Clear the indicator `expiry` after the last start signal.
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            active: None,
        }
    }

    /// Apply a remote signal. Returns `true` when the visible state changed.
    pub fn update(&mut self, user: &str, is_typing: bool, now: Instant) -> bool {
        if is_typing {
            let changed = self.active.is_none();
            self.active = Some((user.to_string(), deadline_after(now, self.expiry)));
            changed
        } else {
            self.active.take().is_some()
        }
    }

    /// Expire the indicator if due. Returns the user whose indicator cleared.
    pub fn poll_expired(&mut self, now: Instant) -> Option<String> {
        match &self.active {
            Some((_, deadline)) if now >= *deadline => self.active.take().map(|(user, _)| user),
            _ => None,
        }
    }

    /// Drop the indicator without waiting, returning who was typing.
    pub fn clear(&mut self) -> Option<String> {
        self.active.take().map(|(user, _)| user)
    }

    /// When the indicator expires, if shown.
    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|(_, deadline)| *deadline)
    }

    /// Who is currently shown as typing.
    pub fn typing_user(&self) -> Option<&str> {
        self.active.as_ref().map(|(user, _)| user.as_str())
    }
}

/// Visibility-derived presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Foreground.
    Online,
    /// Background.
    Away,
    /// No link. Never sent on the wire.
    #[default]
    Offline,
}

impl PresenceStatus {
    /// Get a human-readable string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Offline => "offline",
        }
    }
}

/// Last known presence of the counterpart.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    status: PresenceStatus,
}

impl PresenceTracker {
    /// Start as offline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status. Last value wins. Returns `true` if it changed.
    pub fn update(&mut self, status: PresenceStatus) -> bool {
        let changed = self.status != status;
        self.status = status;
        changed
    }

    /// Current status.
    pub fn status(&self) -> PresenceStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_secs(3);
    const EXPIRY: Duration = Duration::from_secs(5);

    #[test]
    fn test_emitter_debounces_keystrokes() {
        let t0 = Instant::now();
        let mut emitter = TypingEmitter::new(IDLE);

        assert_eq!(emitter.keystroke(t0), Some(TypingSignal::Start));
        assert_eq!(emitter.keystroke(t0 + Duration::from_secs(1)), None);
        assert_eq!(emitter.keystroke(t0 + Duration::from_secs(2)), None);

        // Deadline was pushed by the last keystroke
        assert_eq!(emitter.poll_idle(t0 + Duration::from_secs(4)), None);
        assert_eq!(
            emitter.poll_idle(t0 + Duration::from_secs(5)),
            Some(TypingSignal::Stop)
        );
        assert!(!emitter.is_typing());
    }

    #[test]
    fn test_huge_timeouts_do_not_overflow() {
        let t0 = Instant::now();
        let mut emitter = TypingEmitter::new(Duration::MAX);
        assert_eq!(emitter.keystroke(t0), Some(TypingSignal::Start));
        assert!(emitter.deadline().unwrap() > t0);
        assert_eq!(emitter.poll_idle(t0 + Duration::from_secs(3600)), None);

        let mut tracker = TypingTracker::new(Duration::MAX);
        assert!(tracker.update("Abhijit", true, t0));
        assert!(tracker.deadline().unwrap() > t0);
    }

    #[test]
    fn test_emitter_stop_on_send() {
        let mut emitter = TypingEmitter::new(IDLE);
        assert_eq!(emitter.stop(), None);
        emitter.keystroke(Instant::now());
        assert_eq!(emitter.stop(), Some(TypingSignal::Stop));
        assert_eq!(emitter.deadline(), None);
    }

    #[test]
    fn test_tracker_expires_without_stop() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new(EXPIRY);

        assert!(tracker.update("Abhijit", true, t0));
        assert_eq!(tracker.typing_user(), Some("Abhijit"));
        assert_eq!(tracker.poll_expired(t0 + Duration::from_millis(4_999)), None);
        assert_eq!(
            tracker.poll_expired(t0 + EXPIRY),
            Some("Abhijit".to_string())
        );
        assert_eq!(tracker.typing_user(), None);
    }

    #[test]
    fn test_tracker_refresh_and_stop() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new(EXPIRY);

        assert!(tracker.update("Abhijit", true, t0));
        // Repeated start only extends
        assert!(!tracker.update("Abhijit", true, t0 + Duration::from_secs(3)));
        assert_eq!(tracker.deadline(), Some(t0 + Duration::from_secs(8)));

        assert!(tracker.update("Abhijit", false, t0 + Duration::from_secs(4)));
        assert!(!tracker.update("Abhijit", false, t0 + Duration::from_secs(4)));
    }

    #[test]
    fn test_presence_last_value_wins() {
        let mut presence = PresenceTracker::new();
        assert_eq!(presence.status(), PresenceStatus::Offline);
        assert!(presence.update(PresenceStatus::Online));
        assert!(presence.update(PresenceStatus::Away));
        assert!(!presence.update(PresenceStatus::Away));
        assert_eq!(presence.status(), PresenceStatus::Away);
    }

    #[test]
    fn test_presence_wire_names() {
        assert_eq!(
            serde_json::to_string(&PresenceStatus::Away).unwrap(),
            "\"away\""
        );
        let parsed: PresenceStatus = serde_json::from_str("\"online\"").unwrap();
        assert_eq!(parsed, PresenceStatus::Online);
    }
}

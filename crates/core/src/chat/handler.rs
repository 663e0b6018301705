//! Protocol multiplexer: routes decoded payloads to their handlers.

use crate::chat::log::MessageLog;
use crate::chat::presence::{PresenceStatus, PresenceTracker, TypingTracker};
use crate::chat::types::Message;
use crate::error::{Error, Result};
use crate::events::{AudioSink, Direction, NotificationSink, SessionEvent};
use crate::identity::Identity;
use crate::protocol::Payload;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Handler for inbound payloads and the local message log.
pub struct ChatHandler {
    local: Identity,
    remote: Identity,
    log: MessageLog,
    typing: TypingTracker,
    presence: PresenceTracker,
    notifier: Arc<dyn NotificationSink>,
    audio: Arc<dyn AudioSink>,
    foreground: bool,
    max_message_length: usize,
}

impl ChatHandler {
    /// Create a new chat handler.
    pub fn new(
        local: Identity,
        remote: Identity,
        log: MessageLog,
        typing_expiry: Duration,
        max_message_length: usize,
        notifier: Arc<dyn NotificationSink>,
        audio: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            local,
            remote,
            log,
            typing: TypingTracker::new(typing_expiry),
            presence: PresenceTracker::new(),
            notifier,
            audio,
            foreground: true,
            max_message_length,
        }
    }

    // ==================== Sending Methods ====================

    /// Validate `text` and build an outgoing message.
    pub fn compose(&self, text: &str) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidMessage("message text cannot be empty".to_string()));
        }
        if text.chars().count() > self.max_message_length {
            return Err(Error::InvalidMessage(format!(
                "message text exceeds maximum length of {} characters",
                self.max_message_length
            )));
        }
        Ok(Message::new_outgoing(&self.local, text.to_string()))
    }

    /// Append a locally composed message to the log.
    pub fn record_outgoing(&mut self, message: Message) -> Option<SessionEvent> {
        if self.log.append(message.clone()) {
            Some(SessionEvent::MessageAppended {
                message,
                direction: Direction::Outgoing,
            })
        } else {
            None
        }
    }

    // ==================== Receiving Methods ====================

    /// Decode one link frame and dispatch it.
    ///
    /// Malformed frames are logged and yield no events.
    pub fn handle_frame(&mut self, data: &[u8], now: Instant) -> (Option<Payload>, Vec<SessionEvent>) {
        match Payload::decode(data) {
            Ok(payload) => {
                let events = self.dispatch(payload.clone(), now);
                (Some(payload), events)
            }
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                (None, Vec::new())
            }
        }
    }

    /// Route a payload by type.
    pub fn dispatch(&mut self, payload: Payload, now: Instant) -> Vec<SessionEvent> {
        match payload {
            Payload::Handshake { identity, .. } => {
                if identity.login_id != self.remote.login_id {
                    warn!(
                        "Handshake from unexpected identity '{}' (expected '{}')",
                        identity.login_id, self.remote.login_id
                    );
                }
                debug!("Handshake received from {}", identity.display_name);
                let mut events = Vec::new();
                // A fresh link means the peer is back; away/online is theirs to say.
                if self.presence.status() == PresenceStatus::Offline
                    && self.presence.update(PresenceStatus::Online)
                {
                    events.push(SessionEvent::PresenceChanged {
                        user: identity.display_name.clone(),
                        status: PresenceStatus::Online,
                    });
                }
                events.insert(
                    0,
                    SessionEvent::LinkConfirmed {
                        login_id: identity.login_id,
                        display_name: identity.display_name,
                    },
                );
                events
            }
            Payload::Message(message) => self.handle_message(message).into_iter().collect(),
            Payload::Typing { is_typing, user } => self.handle_typing(&user, is_typing, now),
            Payload::Presence { status, user, .. } => self.handle_presence(&user, status),
            Payload::Unknown => {
                debug!("Ignoring payload of unknown type");
                Vec::new()
            }
        }
    }

    /// Handle an incoming chat message. Duplicates by id are dropped.
    pub fn handle_message(&mut self, message: Message) -> Option<SessionEvent> {
        if self.log.contains(&message.id) {
            debug!("Duplicate message {} ignored", message.id);
            return None;
        }

        self.log.append(message.clone());

        if let Err(e) = self.audio.play_tone() {
            debug!("Audio sink failed: {}", e);
        }
        if !self.foreground {
            self.notifier.notify(&message);
        }

        Some(SessionEvent::MessageAppended {
            message,
            direction: Direction::Incoming,
        })
    }

    /// Handle typing indicator from the counterpart.
    pub fn handle_typing(&mut self, user: &str, is_typing: bool, now: Instant) -> Vec<SessionEvent> {
        if self.typing.update(user, is_typing, now) {
            vec![SessionEvent::TypingChanged {
                user: user.to_string(),
                is_typing,
            }]
        } else {
            Vec::new()
        }
    }

    /// Handle presence from the counterpart.
    pub fn handle_presence(&mut self, user: &str, status: PresenceStatus) -> Vec<SessionEvent> {
        if self.presence.update(status) {
            vec![SessionEvent::PresenceChanged {
                user: user.to_string(),
                status,
            }]
        } else {
            Vec::new()
        }
    }

    // ==================== Timer / Link Methods ====================

    /// Clear the remote typing indicator if its safety expiry passed.
    pub fn check_typing_expired(&mut self, now: Instant) -> Option<SessionEvent> {
        self.typing
            .poll_expired(now)
            .map(|user| SessionEvent::TypingChanged {
                user,
                is_typing: false,
            })
    }

    /// When the remote typing indicator expires, if shown.
    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.deadline()
    }

    /// The last link went away: the counterpart is implicitly offline.
    pub fn peer_unreachable(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if let Some(user) = self.typing.clear() {
            events.push(SessionEvent::TypingChanged {
                user,
                is_typing: false,
            });
        }
        if self.presence.update(PresenceStatus::Offline) {
            events.push(SessionEvent::PresenceChanged {
                user: self.remote.display_name.clone(),
                status: PresenceStatus::Offline,
            });
        }
        events
    }

    // ==================== Utility Methods ====================

    /// Record whether the UI is in foreground.
    pub fn set_foreground(&mut self, foreground: bool) {
        self.foreground = foreground;
    }

    /// Whether the UI is in foreground.
    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    /// Clear the local history.
    pub fn clear_history(&mut self) -> SessionEvent {
        self.log.clear();
        SessionEvent::HistoryCleared
    }

    /// Messages in log order.
    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    /// Counterpart presence.
    pub fn remote_presence(&self) -> PresenceStatus {
        self.presence.status()
    }

    /// Who is shown as typing, if anyone.
    pub fn remote_typing(&self) -> Option<&str> {
        self.typing.typing_user()
    }

    /// Our identity.
    pub fn local(&self) -> &Identity {
        &self.local
    }

    /// The counterpart.
    pub fn remote(&self) -> &Identity {
        &self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::MessageId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier(AtomicUsize);

    impl NotificationSink for CountingNotifier {
        fn notify(&self, _message: &Message) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct BrokenAudio;

    impl AudioSink for BrokenAudio {
        fn play_tone(&self) -> Result<()> {
            Err(Error::Io("no audio device".to_string()))
        }
    }

    fn identity(login_id: &str, name: &str) -> Identity {
        Identity {
            login_id: login_id.to_string(),
            display_name: name.to_string(),
            avatar: String::new(),
            network_address: format!("addr-{}", login_id),
        }
    }

    fn handler(notifier: Arc<CountingNotifier>) -> ChatHandler {
        ChatHandler::new(
            identity("khusbu", "Khusbu"),
            identity("abhijit", "Abhijit"),
            MessageLog::new(),
            Duration::from_secs(5),
            500,
            notifier,
            Arc::new(BrokenAudio),
        )
    }

    fn incoming(id: &str) -> Message {
        Message {
            id: MessageId::from(id),
            text: "Hello!".to_string(),
            sender_id: "abhijit".to_string(),
            sender_name: "Abhijit".to_string(),
            avatar: "👨".to_string(),
            timestamp: 1,
        }
    }

    #[test]
    fn test_handle_incoming_message_once() {
        let mut handler = handler(Arc::default());
        let now = Instant::now();

        let events = handler.dispatch(Payload::Message(incoming("msg123")), now);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            SessionEvent::MessageAppended { direction: Direction::Incoming, .. }
        ));

        let events = handler.dispatch(Payload::Message(incoming("msg123")), now);
        assert!(events.is_empty());
        assert_eq!(handler.messages().len(), 1);
    }

    #[test]
    fn test_notification_only_in_background() {
        let notifier = Arc::new(CountingNotifier::default());
        let mut handler = handler(notifier.clone());
        let now = Instant::now();

        handler.dispatch(Payload::Message(incoming("m1")), now);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 0);

        handler.set_foreground(false);
        handler.dispatch(Payload::Message(incoming("m2")), now);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_typing_indicator_and_expiry() {
        let mut handler = handler(Arc::default());
        let t0 = Instant::now();

        let events = handler.dispatch(
            Payload::Typing {
                is_typing: true,
                user: "Abhijit".to_string(),
            },
            t0,
        );
        assert!(matches!(
            &events[0],
            SessionEvent::TypingChanged { is_typing: true, .. }
        ));
        assert_eq!(handler.remote_typing(), Some("Abhijit"));

        assert!(handler.check_typing_expired(t0 + Duration::from_secs(4)).is_none());
        let expired = handler.check_typing_expired(t0 + Duration::from_secs(5));
        assert!(matches!(
            expired,
            Some(SessionEvent::TypingChanged { is_typing: false, .. })
        ));
    }

    #[test]
    fn test_unknown_and_malformed_frames_ignored() {
        let mut handler = handler(Arc::default());
        let now = Instant::now();

        let (payload, events) = handler.handle_frame(br#"{"type":"sticker"}"#, now);
        assert_eq!(payload, Some(Payload::Unknown));
        assert!(events.is_empty());

        let (payload, events) = handler.handle_frame(b"garbage", now);
        assert!(payload.is_none());
        assert!(events.is_empty());
    }

    #[test]
    fn test_handshake_confirms() {
        let mut handler = handler(Arc::default());
        let payload = Payload::handshake(&identity("abhijit", "Abhijit"), 5);
        let events = handler.dispatch(payload, Instant::now());
        assert!(matches!(
            &events[0],
            SessionEvent::LinkConfirmed { login_id, .. } if login_id == "abhijit"
        ));
        assert_eq!(handler.remote_presence(), PresenceStatus::Online);

        // Explicit away survives a second link's handshake.
        handler.handle_presence("Abhijit", PresenceStatus::Away);
        let payload = Payload::handshake(&identity("abhijit", "Abhijit"), 6);
        let events = handler.dispatch(payload, Instant::now());
        assert_eq!(events.len(), 1);
        assert_eq!(handler.remote_presence(), PresenceStatus::Away);
    }

    #[test]
    fn test_compose_validation() {
        let handler = handler(Arc::default());
        assert!(matches!(handler.compose("   "), Err(Error::InvalidMessage(_))));
        assert!(matches!(
            handler.compose(&"x".repeat(501)),
            Err(Error::InvalidMessage(_))
        ));

        let message = handler.compose("  hi there ").unwrap();
        assert_eq!(message.text, "hi there");
        assert_eq!(message.sender_id, "khusbu");
    }

    #[test]
    fn test_peer_unreachable_clears_state() {
        let mut handler = handler(Arc::default());
        let now = Instant::now();
        handler.handle_presence("Abhijit", PresenceStatus::Online);
        handler.handle_typing("Abhijit", true, now);

        let events = handler.peer_unreachable();
        assert_eq!(events.len(), 2);
        assert_eq!(handler.remote_presence(), PresenceStatus::Offline);
        assert_eq!(handler.remote_typing(), None);
    }
}

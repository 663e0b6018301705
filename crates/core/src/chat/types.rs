//! Core data types for the chat system.

use crate::identity::Identity;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a new random message ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single chat message.
///
/// Immutable once created. The timestamp is the sender's wall clock and is
/// only for display; ordering comes from the message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Message text.
    pub text: String,
    /// Sender's login id.
    #[serde(alias = "sender")]
    pub sender_id: String,
    /// Sender's display name.
    pub sender_name: String,
    /// Sender's avatar glyph.
    #[serde(default)]
    pub avatar: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl Message {
    /// Create a new outgoing message from `sender`.
    pub fn new_outgoing(sender: &Identity, text: String) -> Self {
        Self {
            id: MessageId::new(),
            text,
            sender_id: sender.login_id.clone(),
            sender_name: sender.display_name.clone(),
            avatar: sender.avatar.clone(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Check if this message was sent by us (vs received).
    pub fn is_outgoing(&self, our_login_id: &str) -> bool {
        self.sender_id == our_login_id
    }

    /// Sender's timestamp as a date, if representable.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// A message waiting for a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// The queued message.
    pub message: Message,
    /// When it was queued.
    pub enqueued_at: DateTime<Utc>,
}

impl PendingEntry {
    /// Queue `message` now.
    pub fn new(message: Message) -> Self {
        Self {
            message,
            enqueued_at: Utc::now(),
        }
    }
}

/// The last identity that logged in on this machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastLogin {
    /// Login id.
    pub login_id: String,
    /// Display name at login time.
    pub display_name: String,
    /// When the login happened.
    pub logged_in_at: DateTime<Utc>,
}

impl LastLogin {
    /// How long a remembered login id is offered for pre-filling.
    pub fn remember_for() -> chrono::Duration {
        chrono::Duration::hours(24)
    }

    /// Record a login of `identity` now.
    pub fn now(identity: &Identity) -> Self {
        Self {
            login_id: identity.login_id.clone(),
            display_name: identity.display_name.clone(),
            logged_in_at: Utc::now(),
        }
    }

    /// Whether the record is recent enough to pre-fill a login form.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.logged_in_at < Self::remember_for()
    }
}

//! Events emitted to the presentation layer, and the side-effect sinks.
//!
//! The session owns no UI. Everything a front end needs arrives as a
//! [`SessionEvent`]; notification and sound are narrow collaborator traits.

use crate::chat::presence::PresenceStatus;
use crate::chat::types::{Message, MessageId};
use crate::error::Result;
use crate::session::state::SessionStatus;
use std::time::Duration;
use tracing::{debug, info};

/// Which side authored a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Composed locally.
    Outgoing,
    /// Received over a link.
    Incoming,
}

/// Events emitted by the session for UI notification.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Status changed.
    StatusChanged {
        status: SessionStatus,
    },
    /// A message was appended to the log.
    MessageAppended {
        message: Message,
        direction: Direction,
    },
    /// The log was cleared locally.
    HistoryCleared,
    /// An outgoing message found no open link and was queued.
    MessageQueued {
        message_id: MessageId,
    },
    /// Queued messages were handed to a link.
    PendingFlushed {
        count: usize,
        remaining: usize,
    },
    /// Remote typing indicator changed.
    TypingChanged {
        user: String,
        is_typing: bool,
    },
    /// Remote presence changed.
    PresenceChanged {
        user: String,
        status: PresenceStatus,
    },
    /// A link to the counterpart opened.
    LinkOpened {
        remote_address: String,
        inbound: bool,
    },
    /// The counterpart's handshake arrived on a link.
    LinkConfirmed {
        login_id: String,
        display_name: String,
    },
    /// A link closed.
    LinkClosed {
        remote_address: String,
        open_links: usize,
    },
    /// A reconnect attempt was scheduled.
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    /// Automatic reconnects gave up; the user may refresh.
    ReconnectExhausted {
        attempts: u32,
    },
    /// Registration or dial failed. Informational; the session recovers.
    ConnectionFailed {
        error: String,
    },
}

/// Shows a system notification for an inbound message.
pub trait NotificationSink: Send + Sync {
    /// Called only while the UI is in background.
    fn notify(&self, message: &Message);
}

/// Plays the inbound-message tone.
pub trait AudioSink: Send + Sync {
    /// Failures are ignored by the caller.
    fn play_tone(&self) -> Result<()>;
}

/// Notification sink that writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, message: &Message) {
        info!("New message from {}: {}", message.sender_name, message.text);
    }
}

/// Audio sink that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAudio;

impl AudioSink for SilentAudio {
    fn play_tone(&self) -> Result<()> {
        debug!("Audio not available");
        Ok(())
    }
}

//! PairChat Core Library
//!
//! This crate provides the peer session manager behind PairChat, including:
//! - Identity registry and authentication
//! - Transport adapters (in-process hub, TCP signaling relay)
//! - Session state machine with reconnect backoff
//! - Offline delivery queue and message log
//! - Typed link payloads, typing and presence tracking
//! - Configuration management
//!
//! It is used by the `pairchat` command line front end.

pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod platform;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use chat::{Message, MessageId, PresenceStatus, SharedStore, SledStore};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{AudioSink, Direction, NotificationSink, SessionEvent};
pub use identity::{Authenticator, Identity, StaticRegistry};
pub use protocol::Payload;
pub use session::{
    login, remembered_login, SendReceipt, SessionContext, SessionEvents, SessionHandle,
    SessionStatus, Snapshot,
};
pub use transport::{MemoryHub, SignalingServer, TcpTransport, Transport};

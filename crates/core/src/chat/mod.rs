//! Chat state for one two-party session.
//!
//! This module provides:
//!
//! - Message types and the append-only, deduplicating message log
//! - The offline delivery queue
//! - Typing and presence tracking
//! - The protocol multiplexer for inbound payloads
//! - Key/value persistence via Sled

pub mod handler;
pub mod log;
pub mod presence;
pub mod queue;
pub mod store;
pub mod types;

pub use handler::ChatHandler;
pub use log::MessageLog;
pub use presence::{PresenceStatus, PresenceTracker, TypingEmitter, TypingSignal, TypingTracker};
pub use queue::{DeliveryQueue, FlushReport};
pub use store::{KeyValueStore, MemoryStore, Namespace, SharedStore, SledStore};
pub use types::*;

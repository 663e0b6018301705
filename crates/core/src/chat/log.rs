//! Append-only message log with id-based deduplication.

use crate::chat::store::Namespace;
use crate::chat::types::{Message, MessageId};
use std::collections::HashSet;
use tracing::warn;

/// Storage key of the persisted log.
pub const MESSAGES_KEY: &str = "messages";

/// Ordered history of one session.
///
/// Order is arrival/creation order. Timestamps come from unsynchronized
/// clocks and are never used for sorting. The set of seen ids outlives
/// [`MessageLog::clear`], so a message re-delivered after clearing history
/// is still recognised as a duplicate within the session.
pub struct MessageLog {
    entries: Vec<Message>,
    seen: HashSet<MessageId>,
    storage: Option<Namespace>,
}

impl MessageLog {
    /// Empty, memory-only log.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            seen: HashSet::new(),
            storage: None,
        }
    }

    /// Load the persisted log, falling back to empty on read failure.
    pub fn load(storage: Namespace) -> Self {
        let entries: Vec<Message> = match storage.get(MESSAGES_KEY) {
            Ok(Some(entries)) => entries,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to load chat history, starting empty: {}", e);
                Vec::new()
            }
        };

        let mut log = Self {
            entries: Vec::with_capacity(entries.len()),
            seen: HashSet::new(),
            storage: Some(storage),
        };
        for message in entries {
            if log.seen.insert(message.id.clone()) {
                log.entries.push(message);
            }
        }
        log
    }

    /// Append `message` unless its id was seen before.
    ///
    /// Returns `true` when the message was added.
    pub fn append(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.entries.push(message);
        self.save();
        true
    }

    /// Whether a message with `id` was seen in this session.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.save();
    }

    /// Messages in log order.
    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.set(MESSAGES_KEY, &self.entries) {
                warn!("Failed to save chat history: {}", e);
            }
        }
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::store::test_util::FailingStore;
    use crate::chat::store::{MemoryStore, SharedStore};
    use std::sync::Arc;

    fn message(id: &str, text: &str, timestamp: i64) -> Message {
        Message {
            id: MessageId::from(id),
            text: text.to_string(),
            sender_id: "abhijit".to_string(),
            sender_name: "Abhijit".to_string(),
            avatar: "👨".to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_duplicate_id_is_dropped() {
        let mut log = MessageLog::new();
        assert!(log.append(message("m1", "hello", 1)));
        assert!(!log.append(message("m1", "hello", 1)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_order_is_arrival_not_timestamp() {
        let mut log = MessageLog::new();
        log.append(message("late-clock", "first", 5_000));
        log.append(message("early-clock", "second", 1_000));

        let texts: Vec<_> = log.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_clear_keeps_dedup_memory() {
        let mut log = MessageLog::new();
        log.append(message("m1", "hello", 1));
        log.clear();
        assert!(log.is_empty());
        assert!(!log.append(message("m1", "hello", 1)));
        assert!(log.contains(&MessageId::from("m1")));
    }

    #[test]
    fn test_persisted_log_reloads() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        {
            let mut log = MessageLog::load(Namespace::new(store.clone(), "khusbu"));
            log.append(message("m1", "one", 1));
            log.append(message("m2", "two", 2));
        }

        let log = MessageLog::load(Namespace::new(store, "khusbu"));
        assert_eq!(log.len(), 2);
        assert!(log.contains(&MessageId::from("m2")));
        assert_eq!(log.messages()[0].text, "one");
    }

    #[test]
    fn test_failing_storage_keeps_memory_state() {
        let store: SharedStore = Arc::new(FailingStore);
        let mut log = MessageLog::load(Namespace::new(store, "khusbu"));
        assert!(log.is_empty());
        assert!(log.append(message("m1", "still works", 1)));
        assert_eq!(log.len(), 1);
    }
}

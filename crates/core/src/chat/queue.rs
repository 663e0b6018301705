//! Offline delivery queue.
//!
//! Messages composed while no link is open wait here and are re-sent, in
//! order, the next time a link opens. This is best-effort at-least-once
//! resend by the sender, not an acknowledged delivery protocol.

use crate::chat::store::Namespace;
use crate::chat::types::{Message, PendingEntry};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Storage key of the persisted queue.
pub const PENDING_KEY: &str = "pending";

/// Result of one flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Entries handed to the transport and removed.
    pub delivered: usize,
    /// Entries still queued.
    pub remaining: usize,
}

/// FIFO of messages waiting for a link.
pub struct DeliveryQueue {
    entries: VecDeque<PendingEntry>,
    storage: Option<Namespace>,
}

impl DeliveryQueue {
    /// Empty, memory-only queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            storage: None,
        }
    }

    /// Load the persisted queue, falling back to empty on read failure.
    pub fn load(storage: Namespace) -> Self {
        let entries: Vec<PendingEntry> = match storage.get(PENDING_KEY) {
            Ok(Some(entries)) => entries,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to load pending queue, starting empty: {}", e);
                Vec::new()
            }
        };
        if !entries.is_empty() {
            debug!("Loaded {} pending message(s)", entries.len());
        }

        Self {
            entries: entries.into(),
            storage: Some(storage),
        }
    }

    /// Append a message. Never fails; persistence errors are logged.
    pub fn enqueue(&mut self, message: Message) {
        debug!("Queuing message {} for later delivery", message.id);
        self.entries.push_back(PendingEntry::new(message));
        self.save();
    }

    /// Drain the queue front to back through `send`.
    ///
    /// An entry is removed only when `send` returns `true`. The first
    /// failure stops the pass and leaves that entry and everything behind it
    /// in place, in the same order.
    pub fn flush<F>(&mut self, mut send: F) -> FlushReport
    where
        F: FnMut(&Message) -> bool,
    {
        let mut delivered = 0;
        while let Some(entry) = self.entries.front() {
            if !send(&entry.message) {
                debug!("Flush stopped at message {}", entry.message.id);
                break;
            }
            self.entries.pop_front();
            delivered += 1;
        }

        if delivered > 0 {
            self.save();
        }

        FlushReport {
            delivered,
            remaining: self.entries.len(),
        }
    }

    /// Queued entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) {
        if let Some(storage) = &self.storage {
            let result = if self.entries.is_empty() {
                storage.remove(PENDING_KEY)
            } else {
                storage.set(PENDING_KEY, &self.entries)
            };
            if let Err(e) = result {
                warn!("Failed to persist pending queue: {}", e);
            }
        }
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::store::test_util::FailingStore;
    use crate::chat::store::{MemoryStore, SharedStore};
    use crate::chat::types::MessageId;
    use std::sync::Arc;

    fn message(id: &str) -> Message {
        Message {
            id: MessageId::from(id),
            text: format!("text of {}", id),
            sender_id: "khusbu".to_string(),
            sender_name: "Khusbu".to_string(),
            avatar: "👩".to_string(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_flush_is_fifo() {
        let mut queue = DeliveryQueue::new();
        queue.enqueue(message("s1"));
        queue.enqueue(message("s2"));
        queue.enqueue(message("s3"));

        let mut sent = Vec::new();
        let report = queue.flush(|m| {
            sent.push(m.id.0.clone());
            true
        });

        assert_eq!(sent, vec!["s1", "s2", "s3"]);
        assert_eq!(report, FlushReport { delivered: 3, remaining: 0 });
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failed_send_stops_without_skipping() {
        let mut queue = DeliveryQueue::new();
        queue.enqueue(message("s1"));
        queue.enqueue(message("s2"));
        queue.enqueue(message("s3"));

        let mut attempts = Vec::new();
        let report = queue.flush(|m| {
            attempts.push(m.id.0.clone());
            m.id.as_str() != "s2"
        });

        // s3 is never attempted once s2 fails
        assert_eq!(attempts, vec!["s1", "s2"]);
        assert_eq!(report, FlushReport { delivered: 1, remaining: 2 });

        let left: Vec<_> = queue.entries().map(|e| e.message.id.0.clone()).collect();
        assert_eq!(left, vec!["s2", "s3"]);
    }

    #[test]
    fn test_flush_with_no_link_keeps_everything() {
        let mut queue = DeliveryQueue::new();
        queue.enqueue(message("s1"));
        let report = queue.flush(|_| false);
        assert_eq!(report, FlushReport { delivered: 0, remaining: 1 });
    }

    #[test]
    fn test_queue_survives_restart() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        {
            let mut queue = DeliveryQueue::load(Namespace::new(store.clone(), "khusbu"));
            queue.enqueue(message("s1"));
            queue.enqueue(message("s2"));
        }

        let mut queue = DeliveryQueue::load(Namespace::new(store.clone(), "khusbu"));
        assert_eq!(queue.len(), 2);

        queue.flush(|_| true);
        let reloaded = DeliveryQueue::load(Namespace::new(store.clone(), "khusbu"));
        assert!(reloaded.is_empty());
        assert!(store.get_raw("khusbu/pending").unwrap().is_none());
    }

    #[test]
    fn test_queue_is_per_identity() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let mut queue = DeliveryQueue::load(Namespace::new(store.clone(), "khusbu"));
        queue.enqueue(message("s1"));

        let other = DeliveryQueue::load(Namespace::new(store, "abhijit"));
        assert!(other.is_empty());
    }

    #[test]
    fn test_enqueue_survives_storage_failure() {
        let store: SharedStore = Arc::new(FailingStore);
        let mut queue = DeliveryQueue::load(Namespace::new(store, "khusbu"));
        queue.enqueue(message("s1"));
        assert_eq!(queue.len(), 1);
    }
}

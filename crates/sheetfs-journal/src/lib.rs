//! Ordered journal bus shared by a primary/secondary group.
//!
//! Every mutation a primary commits is appended here before it becomes
//! visible; secondaries tail the log and apply entries in order. The bus
//! itself is an external collaborator (a Kafka-like service in production),
//! so this crate only fixes the contract — a totally ordered append log per
//! topic with dense offsets — and ships an in-memory implementation used by
//! tests and single-host deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;

/// Error variants for journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The bus rejected or lost the request.
    #[error("journal bus error: {0}")]
    Bus(String),
    /// The topic has been torn down.
    #[error("journal topic closed")]
    Closed,
}

/// Result type alias for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Appends entries to a group's totally ordered log.
#[async_trait]
pub trait JournalWriter: Send + Sync {
    /// Commit one entry, returning the offset it was assigned. The entry is
    /// durable (as durable as the bus is) once this returns.
    async fn commit(&self, entry: &[u8]) -> JournalResult<u64>;
}

/// Tails a group's log from a movable cursor.
#[async_trait]
pub trait JournalReceiver: Send + Sync {
    /// Position the cursor. Offset `n` means the next fetch returns the
    /// entry that was assigned offset `n`.
    fn set_offset(&self, offset: u64);

    /// The offset the next fetch will return.
    fn next_offset(&self) -> u64;

    /// Wait for the entry at the cursor and advance past it. Callers that
    /// need to abandon the wait race this against their own signal.
    async fn fetch(&self) -> JournalResult<Vec<u8>>;

    /// Return the entry at the cursor if it already exists, advancing past
    /// it; `None` means the cursor has caught up with the log tail.
    fn try_fetch(&self) -> JournalResult<Option<Vec<u8>>>;
}

struct Topic {
    entries: Mutex<Vec<Arc<[u8]>>>,
    notify: Notify,
}

/// In-memory journal bus: named topics, dense offsets, any number of
/// writers and independently positioned receivers per topic.
pub struct MemoryJournalBus {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
}

impl MemoryJournalBus {
    /// Create an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
        })
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Topic {
                    entries: Mutex::new(Vec::new()),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    /// Open a writer for `topic`, creating the topic on first use.
    pub fn writer(&self, topic: &str) -> MemoryJournalWriter {
        MemoryJournalWriter {
            topic: self.topic(topic),
        }
    }

    /// Open a receiver for `topic` with its cursor at offset 0.
    pub fn receiver(&self, topic: &str) -> MemoryJournalReceiver {
        MemoryJournalReceiver {
            topic: self.topic(topic),
            offset: AtomicU64::new(0),
        }
    }

    /// Number of entries currently in `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.topic(topic).entries.lock().unwrap().len()
    }
}

/// Writer half of the in-memory bus.
pub struct MemoryJournalWriter {
    topic: Arc<Topic>,
}

#[async_trait]
impl JournalWriter for MemoryJournalWriter {
    async fn commit(&self, entry: &[u8]) -> JournalResult<u64> {
        let offset = {
            let mut entries = self.topic.entries.lock().unwrap();
            entries.push(Arc::from(entry));
            (entries.len() - 1) as u64
        };
        self.topic.notify.notify_waiters();
        Ok(offset)
    }
}

/// Receiver half of the in-memory bus.
pub struct MemoryJournalReceiver {
    topic: Arc<Topic>,
    offset: AtomicU64,
}

#[async_trait]
impl JournalReceiver for MemoryJournalReceiver {
    fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::SeqCst);
    }

    fn next_offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    async fn fetch(&self) -> JournalResult<Vec<u8>> {
        loop {
            // Arm the wakeup before checking so an append between the check
            // and the await is not lost.
            let notified = self.topic.notify.notified();
            if let Some(entry) = self.try_fetch()? {
                return Ok(entry);
            }
            notified.await;
        }
    }

    fn try_fetch(&self) -> JournalResult<Option<Vec<u8>>> {
        let entries = self.topic.entries.lock().unwrap();
        let cursor = self.offset.load(Ordering::SeqCst) as usize;
        match entries.get(cursor) {
            Some(entry) => {
                self.offset.store(cursor as u64 + 1, Ordering::SeqCst);
                Ok(Some(entry.to_vec()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_commit_assigns_dense_offsets() {
        let bus = MemoryJournalBus::new();
        let writer = bus.writer("master");
        assert_eq!(writer.commit(b"a").await.unwrap(), 0);
        assert_eq!(writer.commit(b"b").await.unwrap(), 1);
        assert_eq!(writer.commit(b"c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_try_fetch_drains_in_order() {
        let bus = MemoryJournalBus::new();
        let writer = bus.writer("master");
        let receiver = bus.receiver("master");
        writer.commit(b"a").await.unwrap();
        writer.commit(b"b").await.unwrap();

        assert_eq!(receiver.try_fetch().unwrap().unwrap(), b"a");
        assert_eq!(receiver.try_fetch().unwrap().unwrap(), b"b");
        assert!(receiver.try_fetch().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_waits_for_append() {
        let bus = MemoryJournalBus::new();
        let writer = bus.writer("dn");
        let receiver = bus.receiver("dn");

        let waiter = tokio::spawn(async move { receiver.fetch().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.commit(b"late").await.unwrap();

        assert_eq!(waiter.await.unwrap(), b"late");
    }

    #[tokio::test]
    async fn test_set_offset_replays_from_position() {
        let bus = MemoryJournalBus::new();
        let writer = bus.writer("master");
        let receiver = bus.receiver("master");
        for entry in [&b"a"[..], b"b", b"c"] {
            writer.commit(entry).await.unwrap();
        }

        receiver.set_offset(1);
        assert_eq!(receiver.try_fetch().unwrap().unwrap(), b"b");
        assert_eq!(receiver.next_offset(), 2);
    }

    #[tokio::test]
    async fn test_receivers_have_independent_cursors() {
        let bus = MemoryJournalBus::new();
        let writer = bus.writer("master");
        let r1 = bus.receiver("master");
        let r2 = bus.receiver("master");
        writer.commit(b"x").await.unwrap();

        assert_eq!(r1.try_fetch().unwrap().unwrap(), b"x");
        assert_eq!(r2.try_fetch().unwrap().unwrap(), b"x");
        assert!(r1.try_fetch().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = MemoryJournalBus::new();
        bus.writer("a").commit(b"1").await.unwrap();
        let receiver = bus.receiver("b");
        assert!(receiver.try_fetch().unwrap().is_none());
        assert_eq!(bus.len("a"), 1);
    }
}

//! Record sinks: where a session delivers captured records
//!
//! The internal queue is a lock-free, unbounded `crossbeam::queue::SegQueue`:
//! any number of operation threads push concurrently (hot path) while a
//! single consumer drains it with [`RecordQueue::drain`] (cold path).
//!
//! ```text
//!  operation threads ──push()──▶ SegQueue ──drain()──▶ collect() / report
//! ```
//!
//! `drain` pops at most the number of records queued when it starts. A push
//! racing a drain either lands in that batch or stays queued for the next
//! one; it is never lost and never returned twice.

use crate::record::ExecutionRecord;
use crossbeam::queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Caller-supplied function that receives every record immediately
pub type CollectFn = Arc<dyn Fn(ExecutionRecord) + Send + Sync>;

/// Delivery mode of a session
pub enum Sink {
    /// Records accumulate until the owner drains them
    Queue(RecordQueue),
    /// Records are handed to the callback on the capturing thread
    Callback(CollectFn),
}

impl Sink {
    pub fn queue() -> Self {
        Sink::Queue(RecordQueue::new())
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(ExecutionRecord) + Send + Sync + 'static,
    {
        Sink::Callback(Arc::new(f))
    }

    pub(crate) fn deliver(&self, record: ExecutionRecord) {
        match self {
            Sink::Queue(queue) => queue.push(record),
            Sink::Callback(f) => f(record),
        }
    }

    pub fn as_queue(&self) -> Option<&RecordQueue> {
        match self {
            Sink::Queue(queue) => Some(queue),
            Sink::Callback(_) => None,
        }
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Queue(queue) => f.debug_tuple("Queue").field(queue).finish(),
            Sink::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Unbounded multi-producer queue of records
#[derive(Default)]
pub struct RecordQueue {
    queue: SegQueue<ExecutionRecord>,
    total_pushed: AtomicU64,
    total_drained: AtomicU64,
}

impl RecordQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a record (hot path, never blocks)
    pub fn push(&self, record: ExecutionRecord) {
        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        self.queue.push(record);
    }

    /// Remove and return every record queued at the time of the call
    pub fn drain(&self) -> Vec<ExecutionRecord> {
        let available = self.queue.len();
        let mut batch = Vec::with_capacity(available);
        while batch.len() < available {
            match self.queue.pop() {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        self.total_drained
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        batch
    }

    /// Discard every queued record, returning how many were dropped
    pub fn clear(&self) -> usize {
        self.drain().len()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_drained: self.total_drained.load(Ordering::Relaxed),
            current_size: self.queue.len(),
        }
    }
}

impl fmt::Debug for RecordQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordQueue")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub total_pushed: u64,
    pub total_drained: u64,
    pub current_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;

    fn record(i: usize) -> ExecutionRecord {
        ExecutionRecord::builder(format!("SELECT {}", i)).build()
    }

    #[test]
    fn test_queue_creation() {
        let queue = RecordQueue::new();
        assert!(queue.is_empty());
        assert_eq!(
            queue.stats(),
            QueueStats {
                total_pushed: 0,
                total_drained: 0,
                current_size: 0
            }
        );
    }

    #[test]
    fn test_drain_returns_in_push_order_and_empties() {
        let queue = RecordQueue::new();
        for i in 0..3 {
            queue.push(record(i));
        }
        let batch = queue.drain();
        let texts: Vec<_> = batch.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["SELECT 0", "SELECT 1", "SELECT 2"]);
        assert!(queue.drain().is_empty());

        let stats = queue.stats();
        assert_eq!(stats.total_pushed, 3);
        assert_eq!(stats.total_drained, 3);
    }

    #[test]
    fn test_clear_counts_dropped() {
        let queue = RecordQueue::new();
        queue.push(record(0));
        queue.push(record(1));
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let queue = Arc::new(RecordQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(record(t * 1000 + i));
                    }
                })
            })
            .collect();

        let mut seen = 0;
        while handles.iter().any(|h| !h.is_finished()) {
            seen += queue.drain().len();
        }
        for h in handles {
            h.join().unwrap();
        }
        seen += queue.drain().len();
        assert_eq!(seen, 2000);
    }

    #[test]
    fn test_callback_sink_delivers_immediately() {
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let got = Arc::clone(&got);
            Sink::callback(move |r| got.lock().unwrap().push(r))
        };
        sink.deliver(record(7));
        assert!(sink.as_queue().is_none());
        assert_eq!(got.lock().unwrap()[0].text, "SELECT 7");
    }
}

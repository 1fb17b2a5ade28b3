//! Internal and external event queues.
//!
//! The internal queue is a plain synchronous FIFO drained fully inside a
//! macrostep. The external queue is a tokio mpsc channel: producers (the
//! host, invoked children) post concurrently while the engine is suspended
//! in `wait`, the engine is the sole consumer. Events posted before the
//! channel closes are delivered before the closure is observed.

use crate::error::SessionClosed;
use crate::event::Event;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Synchronous, unbounded, strict-FIFO internal queue.
#[derive(Debug, Default)]
pub struct InternalQueue {
    items: VecDeque<Event>,
}

impl InternalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.items.push_back(event);
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Remaining events, for checkpoint capture.
    pub fn snapshot(&self) -> Vec<Event> {
        self.items.iter().cloned().collect()
    }

    pub fn restore(&mut self, events: Vec<Event>) {
        self.items = events.into();
    }
}

/// Creates a connected external sender/queue pair.
pub fn external_channel() -> (ExternalSender, ExternalQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ExternalSender { tx }, ExternalQueue { rx })
}

/// Producer half of the external queue. Clone freely; dropping every clone
/// closes the queue once buffered events drain.
#[derive(Debug, Clone)]
pub struct ExternalSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl ExternalSender {
    pub fn post(&self, event: Event) -> Result<(), SessionClosed> {
        self.tx.send(event).map_err(|_| SessionClosed)
    }
}

/// Consumer half of the external queue, owned by the engine.
#[derive(Debug)]
pub struct ExternalQueue {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl ExternalQueue {
    /// Non-blocking read.
    pub fn try_read(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Suspends until an event arrives. `None` means the queue closed and
    /// every buffered event has already been delivered.
    pub async fn wait(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn ev(name: &str) -> Event {
        Event::external(name, Value::Null)
    }

    #[test]
    fn test_internal_fifo_order() {
        let mut q = InternalQueue::new();
        q.push(ev("a"));
        q.push(ev("b"));
        q.push(ev("c"));

        assert_eq!(q.pop().unwrap().name, "a");
        assert_eq!(q.pop().unwrap().name, "b");
        assert_eq!(q.pop().unwrap().name, "c");
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_internal_snapshot_roundtrip() {
        let mut q = InternalQueue::new();
        q.push(ev("a"));
        q.push(ev("b"));

        let snap = q.snapshot();
        let mut restored = InternalQueue::new();
        restored.restore(snap);

        assert_eq!(restored.len(), 2);
        assert_eq!(restored.pop().unwrap().name, "a");
    }

    #[tokio::test]
    async fn test_external_delivers_before_close() {
        let (tx, mut rx) = external_channel();
        tx.post(ev("first")).unwrap();
        tx.post(ev("second")).unwrap();
        drop(tx);

        assert_eq!(rx.wait().await.unwrap().name, "first");
        assert_eq!(rx.wait().await.unwrap().name, "second");
        assert!(rx.wait().await.is_none());
    }

    #[tokio::test]
    async fn test_external_try_read() {
        let (tx, mut rx) = external_channel();
        assert!(rx.try_read().is_none());

        tx.post(ev("x")).unwrap();
        assert_eq!(rx.try_read().unwrap().name, "x");
        assert!(rx.try_read().is_none());
    }

    #[tokio::test]
    async fn test_post_after_close_fails() {
        let (tx, rx) = external_channel();
        drop(rx);
        assert!(tx.post(ev("late")).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_producers() {
        let (tx, mut rx) = external_channel();
        let mut handles = Vec::new();
        for i in 0..4 {
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                tx.post(ev(&format!("p{}", i))).unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        drop(tx);

        let mut seen = 0;
        while rx.wait().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 4);
    }
}

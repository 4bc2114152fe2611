//! In-process transports used by `prodline line --local` and the tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast, mpsc};
use tracing::debug;

use super::{ItemQueue, SignalChannel};
use crate::error::TransportError;
use crate::item::Item;

/// Unbounded FIFO queues keyed by name.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    severed: Mutex<HashSet<String>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every push to `queue` fail until [`reconnect`](Self::reconnect).
    #[cfg(test)]
    pub fn sever(&self, queue: &str) {
        lock(&self.severed).insert(queue.to_string());
    }

    #[cfg(test)]
    pub fn reconnect(&self, queue: &str) {
        lock(&self.severed).remove(queue);
    }

    fn try_pop(&self, queue: &str) -> Option<String> {
        lock(&self.queues).get_mut(queue).and_then(VecDeque::pop_front)
    }
}

// A poisoned lock only means another task panicked mid-update of a queue
// map; the data is still a valid map.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl ItemQueue for MemoryQueue {
    async fn push(&self, queue: &str, item: &Item) -> Result<(), TransportError> {
        if lock(&self.severed).contains(queue) {
            return Err(TransportError::Disconnected(queue.to_string()));
        }
        lock(&self.queues)
            .entry(queue.to_string())
            .or_default()
            .push_back(item.id().to_string());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str) -> Result<String, TransportError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(raw) = self.try_pop(queue) {
                return Ok(raw);
            }
            debug!(queue, "waiting for item");
            notified.await;
        }
    }

    async fn len(&self, queue: &str) -> Result<usize, TransportError> {
        Ok(lock(&self.queues).get(queue).map_or(0, VecDeque::len))
    }
}

/// Broadcast topics keyed by name.
#[derive(Debug, Default)]
pub struct MemorySignals {
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemorySignals {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, topic: &str) -> broadcast::Sender<String> {
        lock(&self.topics)
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .clone()
    }
}

#[async_trait]
impl SignalChannel for MemorySignals {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        // No subscribers is not an error: the message is simply lost, as
        // with any pub/sub broker.
        let _ = self.topic(topic).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        sender: mpsc::Sender<String>,
    ) -> Result<(), TransportError> {
        let mut rx = self.topic(topic).subscribe();
        let topic = topic.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if sender.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(%topic, skipped, "signal subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order_per_queue() {
        let q = MemoryQueue::new();
        q.push("P2-A", &Item::new("1")).await.unwrap();
        q.push("P2-A", &Item::new("2")).await.unwrap();
        q.push("P3", &Item::new("x")).await.unwrap();

        assert_eq!(q.len("P2-A").await.unwrap(), 2);
        assert_eq!(q.blocking_pop("P2-A").await.unwrap(), "1");
        assert_eq!(q.blocking_pop("P2-A").await.unwrap(), "2");
        assert_eq!(q.len("P3").await.unwrap(), 1);
        assert_eq!(q.len("unknown").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let q = Arc::new(MemoryQueue::new());
        let reader = Arc::clone(&q);
        let handle = tokio::spawn(async move { reader.blocking_pop("P3").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        q.push("P3", &Item::new("late")).await.unwrap();
        let popped = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(popped, "late");
    }

    #[tokio::test]
    async fn severed_queue_rejects_pushes() {
        let q = MemoryQueue::new();
        q.sever("P3");
        let err = q.push("P3", &Item::new("1")).await.unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(ref name) if name == "P3"));

        q.reconnect("P3");
        q.push("P3", &Item::new("1")).await.unwrap();
    }

    #[tokio::test]
    async fn signals_reach_subscribers() {
        let signals = MemorySignals::new();
        let (tx, mut rx) = mpsc::channel(4);
        signals.subscribe("P2-A_maintenance", tx).await.unwrap();

        signals.publish("P2-A_maintenance", "go").await.unwrap();
        signals.publish("P2-B_maintenance", "other").await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("go"));
        assert!(rx.try_recv().is_err());
    }
}

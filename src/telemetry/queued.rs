//! Fire-and-forget telemetry: events are handed to a background writer over a
//! bounded channel, so a slow or unreachable backend never holds up a stage.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{TelemetryEvent, TelemetrySink};
use crate::error::TelemetryError;

/// Events buffered ahead of the writer before new ones are dropped.
pub const DEFAULT_BUFFER: usize = 1024;

/// Front half of the writer: `write` only enqueues and never waits.
#[derive(Debug, Clone)]
pub struct QueuedSink {
    tx: mpsc::Sender<TelemetryEvent>,
}

impl QueuedSink {
    /// Spawns the writer draining into `inner`. The task ends once every
    /// clone of the returned sink is dropped and the buffer is empty.
    pub fn spawn(inner: Arc<dyn TelemetrySink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<TelemetryEvent>(capacity.max(1));
        let writer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = inner.write(&event).await {
                    warn!("telemetry write failed: {e}");
                }
            }
            debug!("telemetry writer stopped");
        });
        (Self { tx }, writer)
    }
}

#[async_trait]
impl TelemetrySink for QueuedSink {
    async fn write(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => TelemetryError::BufferFull,
            TrySendError::Closed(_) => TelemetryError::WriterStopped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::telemetry::{ItemEvent, ItemStatus, RecordingSink};

    fn event(item: &str) -> TelemetryEvent {
        TelemetryEvent::Item(ItemEvent {
            item: item.into(),
            stage: "P3".into(),
            status: ItemStatus::Arrival,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn writer_drains_in_order_after_the_sink_is_dropped() {
        let recording = Arc::new(RecordingSink::default());
        let (sink, writer) = QueuedSink::spawn(recording.clone(), 16);

        for id in ["1A", "2A", "3A"] {
            sink.write(&event(id)).await.unwrap();
        }
        drop(sink);
        writer.await.unwrap();

        let items: Vec<String> = recording
            .item_trail()
            .into_iter()
            .map(|(item, _, _)| item)
            .collect();
        assert_eq!(items, vec!["1A", "2A", "3A"]);
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_waiting() {
        let recording = Arc::new(RecordingSink::default());
        let (sink, writer) = QueuedSink::spawn(recording.clone(), 1);

        // The current-thread runtime has not polled the writer yet, so the
        // single slot stays taken.
        sink.write(&event("1A")).await.unwrap();
        let err = sink.write(&event("2A")).await.unwrap_err();
        assert!(matches!(err, TelemetryError::BufferFull));

        drop(sink);
        writer.await.unwrap();
        assert_eq!(recording.events().len(), 1);
    }

    #[tokio::test]
    async fn backend_errors_stay_in_the_writer() {
        let failing = Arc::new(RecordingSink::failing());
        let (sink, writer) = QueuedSink::spawn(failing.clone(), 4);

        sink.write(&event("1A")).await.unwrap();
        drop(sink);
        writer.await.unwrap();
        assert_eq!(failing.events().len(), 1);
    }
}

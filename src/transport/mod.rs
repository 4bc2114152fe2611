//! Item transport and maintenance signal channels.
//!
//! Queues are keyed by stage name: a stage pops from the queue named after
//! itself and pushes to the queue named after its downstream stage. The
//! maintenance channel of a stage is `<stage>_maintenance`.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::item::Item;

pub use self::memory::{MemoryQueue, MemorySignals};
pub use self::redis::{RedisQueue, RedisSignals};

/// Payload published on a maintenance channel. Receivers ignore it.
pub const MAINTENANCE_REQUEST: &str = "maintenance_request";

/// Name of the maintenance signal channel of `stage`.
pub fn maintenance_channel(stage: &str) -> String {
    format!("{stage}_maintenance")
}

/// A durable, shared FIFO per stage boundary.
#[async_trait]
pub trait ItemQueue: Send + Sync {
    /// Appends without blocking. Queues are unbounded.
    async fn push(&self, queue: &str, item: &Item) -> Result<(), TransportError>;

    /// Waits, without timeout, until an item is available.
    async fn blocking_pop(&self, queue: &str) -> Result<String, TransportError>;

    async fn len(&self, queue: &str) -> Result<usize, TransportError>;
}

/// A named publish/subscribe topic per stage.
#[async_trait]
pub trait SignalChannel: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError>;

    /// Forwards every message on `topic` into `sender` until the receiver
    /// is dropped or the channel closes.
    async fn subscribe(
        &self,
        topic: &str,
        sender: mpsc::Sender<String>,
    ) -> Result<(), TransportError>;
}

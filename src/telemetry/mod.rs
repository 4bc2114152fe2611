//! Telemetry events and the sinks that record them.
//!
//! The actor writes telemetry but never reads it back. Sink failures are
//! logged by the caller and never interrupt a cycle. Running lines put a
//! [`QueuedSink`] in front of the real backend so writes never block.

pub mod influx;
mod queued;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::TelemetryError;

pub use influx::InfluxSink;
pub use queued::{DEFAULT_BUFFER, QueuedSink};

/// What a status event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Step,
    Failure,
    Repair,
    Maintenance,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Step => write!(f, "step"),
            EventType::Failure => write!(f, "failure"),
            EventType::Repair => write!(f, "repair"),
            EventType::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Edge of a timed activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Start,
    Finish,
    Interrupt,
    /// Point events such as a failure carry no status.
    None,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Start => write!(f, "start"),
            EventStatus::Finish => write!(f, "finish"),
            EventStatus::Interrupt => write!(f, "interrupt"),
            EventStatus::None => Ok(()),
        }
    }
}

/// Where an item is in its journey through the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Input,
    Start,
    Finish,
    Interrupt,
    Arrival,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Input => "input",
            ItemStatus::Start => "start",
            ItemStatus::Finish => "finish",
            ItemStatus::Interrupt => "interrupt",
            ItemStatus::Arrival => "arrival",
        };
        f.write_str(s)
    }
}

/// Availability change of a stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub stage: String,
    /// Distinguishes restarts of the same stage.
    pub instance: String,
    pub event_type: EventType,
    pub event_status: EventStatus,
    pub available: bool,
    pub timestamp: DateTime<Utc>,
}

/// One hop of an item through a stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemEvent {
    pub item: String,
    pub stage: String,
    pub status: ItemStatus,
    pub timestamp: DateTime<Utc>,
}

/// Anything a stage writes to telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TelemetryEvent {
    Status(StatusEvent),
    Item(ItemEvent),
}

/// Append-only time-series log.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn write(&self, event: &TelemetryEvent) -> Result<(), TelemetryError>;
}

/// Writes telemetry through `tracing` when no time-series store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn write(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        match event {
            TelemetryEvent::Status(e) => info!(
                target: "prodline::telemetry",
                stage = %e.stage,
                event_type = %e.event_type,
                event_status = %e.event_status,
                available = e.available,
                "status_log"
            ),
            TelemetryEvent::Item(e) => info!(
                target: "prodline::telemetry",
                item = %e.item,
                stage = %e.stage,
                status = %e.status,
                "process_log"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
pub use recording::RecordingSink;

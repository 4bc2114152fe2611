//! Wires stage actors to their transports, telemetry and maintenance policy,
//! and runs them until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{Instrument, error, info, info_span};

use crate::actor::StageActor;
use crate::config::{StageConfig, TelemetryConfig, TelemetryKind};
use crate::error::{OracleError, TransportError};
use crate::maintenance::{HttpOracle, MaintenancePolicy, spawn_listener};
use crate::shutdown::Shutdown;
use crate::telemetry::{DEFAULT_BUFFER, InfluxSink, LogSink, QueuedSink, TelemetrySink};
use crate::transport::{
    ItemQueue, MAINTENANCE_REQUEST, MemoryQueue, MemorySignals, RedisQueue, RedisSignals,
    SignalChannel, maintenance_channel,
};

/// Queue and signal backends shared by every actor of a process.
#[derive(Clone)]
pub struct Transports {
    pub queue: Arc<dyn ItemQueue>,
    pub signals: Arc<dyn SignalChannel>,
}

impl Transports {
    /// In-process queues and channels, for `line --local`.
    pub fn memory() -> Self {
        Self {
            queue: Arc::new(MemoryQueue::new()),
            signals: Arc::new(MemorySignals::new()),
        }
    }

    /// Redis queues and pub/sub. `readers` is the number of stages in this
    /// process that will block on a queue, each of which holds a pooled
    /// connection while it waits.
    pub async fn redis(url: &str, readers: usize) -> Result<Self, TransportError> {
        Ok(Self {
            queue: Arc::new(RedisQueue::connect(url, readers).await?),
            signals: Arc::new(RedisSignals::connect(url).await?),
        })
    }
}

/// The configured telemetry backend.
pub fn telemetry_sink(config: &TelemetryConfig) -> Result<Arc<dyn TelemetrySink>> {
    match config.kind {
        TelemetryKind::Log => Ok(Arc::new(LogSink)),
        TelemetryKind::Influx => {
            let target = config.influx_target()?;
            info!(url = %target.url, org = %target.org, "writing telemetry to influxdb");
            let sink = InfluxSink::new(target).context("building influxdb client")?;
            Ok(Arc::new(sink))
        }
    }
}

/// The remote oracle when the stage names one, the local threshold otherwise.
pub fn policy_for(stage: &StageConfig) -> Result<MaintenancePolicy, OracleError> {
    match &stage.oracle_url {
        Some(url) => {
            let oracle = HttpOracle::new(url.clone(), stage.oracle_timeout)?;
            Ok(MaintenancePolicy::Remote(Arc::new(oracle)))
        }
        None => Ok(MaintenancePolicy::Threshold {
            threshold: stage.maintenance_threshold,
        }),
    }
}

/// Number of stages in `stages` that pop from an inbound queue.
pub fn blocking_readers(stages: &[StageConfig]) -> usize {
    stages.iter().filter(|s| s.role.has_inbound()).count()
}

/// Runs every stage until `shutdown` fires and all actors have stopped.
///
/// Telemetry goes through a [`QueuedSink`] in front of `telemetry`; the
/// buffered events are flushed before returning.
pub async fn run_stages(
    stages: Vec<StageConfig>,
    transports: &Transports,
    telemetry: Arc<dyn TelemetrySink>,
    shutdown: Shutdown,
) -> Result<()> {
    let (queued, writer) = QueuedSink::spawn(telemetry, DEFAULT_BUFFER);
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(queued);

    let mut actors = Vec::with_capacity(stages.len());
    for stage in stages {
        let name = stage.name.clone();
        let role = stage.role;
        let policy =
            policy_for(&stage).with_context(|| format!("building policy for stage {name}"))?;
        info!(stage = %name, %role, ?policy, "starting stage");

        let actor = StageActor::new(
            stage,
            transports.queue.clone(),
            telemetry.clone(),
            policy,
        );
        spawn_listener(
            transports.signals.clone(),
            &name,
            actor.flag(),
            shutdown.clone(),
        )
        .await
        .with_context(|| format!("subscribing stage {name} to its maintenance channel"))?;

        let span = info_span!("stage", name = %name, role = %role);
        let handle = tokio::spawn(actor.run(shutdown.clone()).instrument(span));
        actors.push((name, handle));
    }

    let (names, handles): (Vec<_>, Vec<_>) = actors.into_iter().unzip();
    for (name, joined) in names.iter().zip(join_all(handles).await) {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(stage = %name, "stage stopped: {e}"),
            Err(e) => error!(stage = %name, "stage task panicked: {e}"),
        }
    }
    drop(telemetry);
    if let Err(e) = writer.await {
        error!("telemetry writer panicked: {e}");
    }
    info!("line stopped");
    Ok(())
}

/// Current length of every queue in `names`, in order.
pub async fn queue_lengths(
    queue: &dyn ItemQueue,
    names: &[String],
) -> Result<Vec<(String, usize)>, TransportError> {
    let mut lengths = Vec::with_capacity(names.len());
    for name in names {
        lengths.push((name.clone(), queue.len(name).await?));
    }
    Ok(lengths)
}

/// Asks `stage` to maintain at its next checkpoint.
pub async fn request_maintenance(
    signals: &dyn SignalChannel,
    stage: &str,
) -> Result<(), TransportError> {
    let topic = maintenance_channel(stage);
    signals.publish(&topic, MAINTENANCE_REQUEST).await?;
    info!(stage, %topic, "maintenance requested");
    Ok(())
}

//! The stage actor: one control loop per stage of the line.
//!
//! Each cycle checks for a pending maintenance request, obtains an item
//! (generated or popped), runs one processing step with a failure trial, and
//! then either repairs (dropping the item) or delivers the item and asks the
//! maintenance policy whether to maintain.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use crate::config::StageConfig;
use crate::error::{ConfigError, ErrorClass, StageError};
use crate::item::{Item, ItemIdGenerator, line_suffix};
use crate::maintenance::{MaintenanceFlag, MaintenancePolicy};
use crate::shutdown::Shutdown;
use crate::state_machine::{Phase, Signal, StageMachine, StageRole, StageState, Transition};
use crate::telemetry::{
    EventStatus, EventType, ItemEvent, ItemStatus, StatusEvent, TelemetryEvent, TelemetrySink,
};
use crate::transport::ItemQueue;
use crate::wear::{DurationSpec, wall_clock};

/// Pause after a failed cycle before the next one, so an unreachable
/// transport does not turn the loop into a busy spin.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Result of the processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// The stage failed mid-step, was repaired, and the item was dropped.
    Failed,
}

/// Why maintenance ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTrigger {
    /// An out-of-band request on the signal channel.
    Requested,
    /// The threshold or oracle policy.
    Policy,
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub item: Option<Item>,
    pub step: Option<StepOutcome>,
    pub maintenance: Option<MaintenanceTrigger>,
}

/// One stage of the line, owning its wear state and its phase.
pub struct StageActor {
    config: StageConfig,
    /// Distinguishes restarts of the same stage in telemetry.
    instance: String,
    phase: Phase,
    state: StageState,
    policy: MaintenancePolicy,
    flag: MaintenanceFlag,
    queue: Arc<dyn ItemQueue>,
    telemetry: Arc<dyn TelemetrySink>,
    ids: ItemIdGenerator,
    rng: StdRng,
}

impl StageActor {
    /// A fresh stage in its resting phase with zero wear. Seeds its RNG from
    /// `config.seed` when set.
    pub fn new(
        config: StageConfig,
        queue: Arc<dyn ItemQueue>,
        telemetry: Arc<dyn TelemetrySink>,
        policy: MaintenancePolicy,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            phase: config.role.resting_phase(),
            config,
            instance: uuid::Uuid::new_v4().to_string(),
            state: StageState::new(),
            policy,
            flag: MaintenanceFlag::new(),
            queue,
            telemetry,
            ids: ItemIdGenerator::new(),
            rng,
        }
    }

    /// Handle for the signal listener.
    pub fn flag(&self) -> MaintenanceFlag {
        self.flag.clone()
    }

    /// Runs cycles until `shutdown` fires. Only fatal errors end the loop
    /// early; everything else is logged and the next cycle starts from rest.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<(), StageError> {
        info!(
            stage = %self.config.name,
            role = %self.config.role,
            instance = %self.instance,
            tau = self.config.wear.tau(),
            speed = self.config.speed,
            "stage started"
        );
        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.cycle() => result,
            };

            match result {
                Ok(report) => debug!(stage = %self.config.name, ?report, "cycle complete"),
                Err(e) if e.class() == ErrorClass::Fatal => {
                    error!(stage = %self.config.name, "{e}; stopping stage");
                    return Err(e);
                }
                Err(e) => {
                    warn!(stage = %self.config.name, class = %e.class(), "{e}; continuing");
                    self.advance(Signal::Aborted);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!(stage = %self.config.name, "stage stopped");
        Ok(())
    }

    /// One pass through the state machine.
    pub async fn cycle(&mut self) -> Result<CycleReport, StageError> {
        if self.flag.take() {
            self.maintain().await;
            return Ok(CycleReport {
                item: None,
                step: None,
                maintenance: Some(MaintenanceTrigger::Requested),
            });
        }

        let item = self.acquire().await?;
        let outcome = self.process(&item).await;
        if outcome == StepOutcome::Failed {
            return Ok(CycleReport {
                item: Some(item),
                step: Some(outcome),
                maintenance: None,
            });
        }

        self.deliver(&item).await?;
        let maintenance = self.maintenance_checkpoint().await;
        Ok(CycleReport {
            item: Some(item),
            step: Some(outcome),
            maintenance,
        })
    }

    async fn acquire(&mut self) -> Result<Item, StageError> {
        match self.config.role {
            StageRole::Producer => {
                let suffix = self.config.next.as_deref().and_then(line_suffix);
                let item = self.ids.next_item(suffix);
                self.advance(Signal::ItemGenerated);
                self.trace(&item, &self.config.name, ItemStatus::Input).await;
                Ok(item)
            }
            StageRole::Relay | StageRole::Consumer => {
                let queue = &self.config.name;
                let raw = self.queue.blocking_pop(queue).await?;
                let item = Item::parse(&raw).ok_or_else(|| StageError::MalformedItem {
                    queue: queue.clone(),
                    raw,
                })?;
                self.advance(Signal::ItemReceived);
                Ok(item)
            }
        }
    }

    /// The `PROCESSING` phase: step, wear, failure trial, and repair on
    /// failure.
    async fn process(&mut self, item: &Item) -> StepOutcome {
        self.status(EventType::Step, EventStatus::Start).await;
        self.trace(item, &self.config.name, ItemStatus::Start).await;

        let step = self.sleep_for(self.config.timings.step).await;
        self.state.accumulate(step, &self.config.wear);
        let p = self.state.failure_probability();

        if self.config.wear.should_fail(p, &mut self.rng) {
            self.state.mark_broken();
            self.advance(Signal::StepFailed);
            warn!(
                stage = %self.config.name,
                item = %item,
                runtime = self.state.runtime(),
                p,
                "stage failed, dropping item"
            );
            self.status(EventType::Failure, EventStatus::None).await;
            self.status(EventType::Step, EventStatus::Interrupt).await;
            self.trace(item, &self.config.name, ItemStatus::Interrupt).await;
            self.repair().await;
            return StepOutcome::Failed;
        }

        self.status(EventType::Step, EventStatus::Finish).await;
        self.trace(item, &self.config.name, ItemStatus::Finish).await;
        self.advance(Signal::StepSucceeded);
        StepOutcome::Completed
    }

    async fn deliver(&self, item: &Item) -> Result<(), StageError> {
        if !self.config.role.has_outbound() {
            self.trace(item, &self.config.name, ItemStatus::Arrival).await;
            debug!(stage = %self.config.name, item = %item, "item delivered");
            return Ok(());
        }
        let Some(next) = &self.config.next else {
            return Err(ConfigError::MissingNext {
                stage: self.config.name.clone(),
                role: self.config.role.to_string(),
            }
            .into());
        };
        self.queue.push(next, item).await?;
        self.trace(item, next, ItemStatus::Arrival).await;
        Ok(())
    }

    /// Post-step checkpoint: an external request wins over the policy.
    async fn maintenance_checkpoint(&mut self) -> Option<MaintenanceTrigger> {
        let trigger = if self.flag.take() {
            Some(MaintenanceTrigger::Requested)
        } else if self
            .policy
            .needs_maintenance(&self.config.name, &self.state)
            .await
        {
            Some(MaintenanceTrigger::Policy)
        } else {
            None
        };

        if let Some(trigger) = trigger {
            info!(stage = %self.config.name, ?trigger, p = self.state.failure_probability(), "maintenance due");
            self.maintain().await;
        }
        trigger
    }

    async fn repair(&mut self) {
        self.advance(Signal::RepairStarted);
        self.status(EventType::Repair, EventStatus::Start).await;
        self.sleep_for(self.config.timings.repair).await;
        self.state.reset();
        self.status(EventType::Repair, EventStatus::Finish).await;
        self.advance(Signal::Recovered);
    }

    async fn maintain(&mut self) {
        self.advance(Signal::MaintenanceDue);
        self.status(EventType::Maintenance, EventStatus::Start).await;
        self.sleep_for(self.config.timings.maintenance).await;
        self.state.reset();
        self.advance(Signal::Recovered);
        self.status(EventType::Maintenance, EventStatus::Finish).await;
    }

    /// Draws a duration, sleeps its wall-clock equivalent, and returns the
    /// simulated seconds.
    async fn sleep_for(&mut self, spec: DurationSpec) -> f64 {
        let simulated = spec.sample(&mut self.rng);
        tokio::time::sleep(wall_clock(simulated, self.config.speed)).await;
        simulated
    }

    fn advance(&mut self, signal: Signal) {
        match StageMachine::next(self.config.role, self.phase, signal) {
            Transition::Next(next) => {
                debug!(stage = %self.config.name, from = %self.phase, to = %next, "transition");
                self.phase = next;
            }
            Transition::Rejected { phase, signal } => {
                warn!(stage = %self.config.name, %phase, ?signal, "transition rejected");
            }
        }
    }

    /// A stage is unavailable while broken and while under maintenance.
    fn available(&self) -> bool {
        !self.state.is_broken() && self.phase != Phase::Maintaining
    }

    async fn status(&self, event_type: EventType, event_status: EventStatus) {
        let event = TelemetryEvent::Status(StatusEvent {
            stage: self.config.name.clone(),
            instance: self.instance.clone(),
            event_type,
            event_status,
            available: self.available(),
            timestamp: Utc::now(),
        });
        self.record(event).await;
    }

    async fn trace(&self, item: &Item, stage: &str, status: ItemStatus) {
        let event = TelemetryEvent::Item(ItemEvent {
            item: item.id().to_string(),
            stage: stage.to_string(),
            status,
            timestamp: Utc::now(),
        });
        self.record(event).await;
    }

    async fn record(&self, event: TelemetryEvent) {
        if let Err(e) = self.telemetry.write(&event).await {
            warn!(stage = %self.config.name, "telemetry write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use crate::maintenance::spawn_listener;
    use crate::telemetry::{QueuedSink, RecordingSink};
    use crate::transport::{
        MAINTENANCE_REQUEST, MemoryQueue, MemorySignals, SignalChannel, maintenance_channel,
    };
    use crate::wear::{StageTimings, WearModel};

    const NEVER_FAILS: f64 = f64::INFINITY;
    const ALWAYS_FAILS: f64 = 1e-9;

    fn timings(step: f64) -> StageTimings {
        StageTimings {
            step: DurationSpec::new(step, 0.0, 0.0),
            maintenance: DurationSpec::new(100.0, 0.0, 0.0),
            repair: DurationSpec::new(60.0, 0.0, 0.0),
        }
    }

    fn config(name: &str, role: StageRole, next: Option<&str>, tau: f64) -> StageConfig {
        StageConfig {
            name: name.into(),
            role,
            next: next.map(Into::into),
            oracle_url: None,
            oracle_timeout: Duration::from_secs(5),
            speed: 1.0,
            timings: timings(10.0),
            wear: WearModel::new(tau).unwrap(),
            maintenance_threshold: 0.15,
            seed: Some(7),
        }
    }

    struct Rig {
        queue: Arc<MemoryQueue>,
        sink: Arc<RecordingSink>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                queue: Arc::new(MemoryQueue::new()),
                sink: Arc::new(RecordingSink::default()),
            }
        }

        fn actor(&self, config: StageConfig, policy: MaintenancePolicy) -> StageActor {
            StageActor::new(config, self.queue.clone(), self.sink.clone(), policy)
        }
    }

    fn no_maintenance() -> MaintenancePolicy {
        MaintenancePolicy::Threshold { threshold: 1.0 }
    }

    #[tokio::test(start_paused = true)]
    async fn relay_forwards_exactly_one_item_per_successful_step() {
        let rig = Rig::new();
        rig.queue.push("P2-A", &Item::new("1A")).await.unwrap();
        let mut actor = rig.actor(
            config("P2-A", StageRole::Relay, Some("P3"), NEVER_FAILS),
            no_maintenance(),
        );
        assert_eq!(actor.phase, Phase::AwaitItem);

        let report = actor.cycle().await.unwrap();
        assert_eq!(report.item, Some(Item::new("1A")));
        assert_eq!(report.step, Some(StepOutcome::Completed));
        assert_eq!(report.maintenance, None);
        assert_eq!(rig.queue.len("P3").await.unwrap(), 1);
        assert_eq!(rig.queue.blocking_pop("P3").await.unwrap(), "1A");
        assert_eq!(actor.phase, Phase::AwaitItem);
        assert_eq!(actor.state.runtime(), 10.0);

        assert_eq!(
            rig.sink.status_trail(),
            vec![
                (EventType::Step, EventStatus::Start),
                (EventType::Step, EventStatus::Finish)
            ]
        );
        assert_eq!(
            rig.sink.item_trail(),
            vec![
                ("1A".into(), "P2-A".into(), ItemStatus::Start),
                ("1A".into(), "P2-A".into(), ItemStatus::Finish),
                ("1A".into(), "P3".into(), ItemStatus::Arrival),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_repairs_once_and_drops_the_item() {
        let rig = Rig::new();
        rig.queue.push("P2-A", &Item::new("1A")).await.unwrap();
        let mut actor = rig.actor(
            config("P2-A", StageRole::Relay, Some("P3"), ALWAYS_FAILS),
            MaintenancePolicy::default(),
        );

        let report = actor.cycle().await.unwrap();
        assert_eq!(report.step, Some(StepOutcome::Failed));
        assert_eq!(report.maintenance, None);
        assert_eq!(rig.queue.len("P3").await.unwrap(), 0);
        assert_eq!(actor.state, StageState::new());
        assert_eq!(actor.phase, Phase::AwaitItem);

        assert_eq!(
            rig.sink.status_trail(),
            vec![
                (EventType::Step, EventStatus::Start),
                (EventType::Failure, EventStatus::None),
                (EventType::Step, EventStatus::Interrupt),
                (EventType::Repair, EventStatus::Start),
                (EventType::Repair, EventStatus::Finish),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repair_takes_the_drawn_repair_duration() {
        let rig = Rig::new();
        rig.queue.push("P3", &Item::new("9")).await.unwrap();
        let mut actor = rig.actor(
            config("P3", StageRole::Consumer, None, ALWAYS_FAILS),
            no_maintenance(),
        );

        let started = tokio::time::Instant::now();
        actor.cycle().await.unwrap();
        // 10s step + 60s repair at speed 1.
        assert_eq!(started.elapsed(), Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn producer_emits_one_new_item_per_step() {
        let rig = Rig::new();
        let mut actor = rig.actor(
            config("P1-A", StageRole::Producer, Some("P2-A"), NEVER_FAILS),
            no_maintenance(),
        );
        assert_eq!(actor.phase, Phase::Idle);

        for _ in 0..3 {
            let report = actor.cycle().await.unwrap();
            assert_eq!(report.step, Some(StepOutcome::Completed));
            assert!(report.item.unwrap().id().ends_with('A'));
        }
        assert_eq!(rig.queue.len("P2-A").await.unwrap(), 3);

        let statuses: Vec<ItemStatus> = rig.sink.item_trail().into_iter().map(|t| t.2).collect();
        assert_eq!(
            &statuses[..4],
            &[
                ItemStatus::Input,
                ItemStatus::Start,
                ItemStatus::Finish,
                ItemStatus::Arrival
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_consumes_exactly_one_item() {
        let rig = Rig::new();
        rig.queue.push("P3", &Item::new("1A")).await.unwrap();
        rig.queue.push("P3", &Item::new("2A")).await.unwrap();
        let mut actor = rig.actor(
            config("P3", StageRole::Consumer, None, NEVER_FAILS),
            no_maintenance(),
        );

        let report = actor.cycle().await.unwrap();
        assert_eq!(report.item, Some(Item::new("1A")));
        assert_eq!(rig.queue.len("P3").await.unwrap(), 1);
        assert_eq!(
            rig.sink.item_trail().last().cloned(),
            Some(("1A".into(), "P3".into(), ItemStatus::Arrival))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn worn_stage_is_maintained_by_threshold_policy() {
        let rig = Rig::new();
        let mut actor = rig.actor(
            config("P2-A", StageRole::Relay, Some("P3"), 120.0),
            MaintenancePolicy::default(),
        );
        actor.state.accumulate(138.6, &actor.config.wear);
        assert!(actor.state.failure_probability() > 0.15);

        let trigger = actor.maintenance_checkpoint().await;
        assert_eq!(trigger, Some(MaintenanceTrigger::Policy));
        assert_eq!(actor.state.runtime(), 0.0);
        assert_eq!(actor.state.failure_probability(), 0.0);
        assert_eq!(actor.phase, Phase::AwaitItem);
        assert_eq!(
            rig.sink.status_trail(),
            vec![
                (EventType::Maintenance, EventStatus::Start),
                (EventType::Maintenance, EventStatus::Finish)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_stage_is_not_maintained() {
        let rig = Rig::new();
        let mut actor = rig.actor(
            config("P2-A", StageRole::Relay, Some("P3"), 120.0),
            MaintenancePolicy::default(),
        );
        actor.state.accumulate(10.0, &actor.config.wear);
        assert_eq!(actor.maintenance_checkpoint().await, None);
        assert_eq!(actor.state.runtime(), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn request_during_processing_is_consumed_exactly_once() {
        let rig = Rig::new();
        let signals = Arc::new(MemorySignals::new());
        rig.queue.push("P3", &Item::new("1A")).await.unwrap();
        rig.queue.push("P3", &Item::new("2A")).await.unwrap();

        let mut actor = rig.actor(
            config("P3", StageRole::Consumer, None, NEVER_FAILS),
            no_maintenance(),
        );
        let flag = actor.flag();
        let shutdown = Shutdown::new();
        let _listener = spawn_listener(signals.clone(), "P3", flag.clone(), shutdown.clone())
            .await
            .unwrap();

        let inject = async {
            // Halfway through the 10s step.
            tokio::time::sleep(Duration::from_secs(5)).await;
            signals
                .publish(&maintenance_channel("P3"), MAINTENANCE_REQUEST)
                .await
                .unwrap();
            while !flag.is_requested() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        let (report, ()) = tokio::join!(actor.cycle(), inject);

        let report = report.unwrap();
        assert_eq!(report.step, Some(StepOutcome::Completed));
        assert_eq!(report.maintenance, Some(MaintenanceTrigger::Requested));
        assert!(!flag.is_requested());

        let second = actor.cycle().await.unwrap();
        assert_eq!(second.maintenance, None);

        let maintenance_starts = rig
            .sink
            .status_trail()
            .into_iter()
            .filter(|&t| t == (EventType::Maintenance, EventStatus::Start))
            .count();
        assert_eq!(maintenance_starts, 1);
        shutdown.trigger();
    }

    #[tokio::test(start_paused = true)]
    async fn pending_request_runs_before_waiting_for_items() {
        let rig = Rig::new();
        let mut actor = rig.actor(
            config("P2-A", StageRole::Relay, Some("P3"), NEVER_FAILS),
            no_maintenance(),
        );
        actor.flag().request();

        // The inbound queue is empty: a cycle that waited would never return.
        let report = actor.cycle().await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                item: None,
                step: None,
                maintenance: Some(MaintenanceTrigger::Requested)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repair_does_not_consume_a_pending_request() {
        let rig = Rig::new();
        rig.queue.push("P3", &Item::new("1A")).await.unwrap();
        let mut actor = rig.actor(
            config("P3", StageRole::Consumer, None, ALWAYS_FAILS),
            no_maintenance(),
        );
        let flag = actor.flag();

        let inject = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.request();
        };
        let (report, ()) = tokio::join!(actor.cycle(), inject);
        assert_eq!(report.unwrap().step, Some(StepOutcome::Failed));
        assert!(flag.is_requested());

        let next = actor.cycle().await.unwrap();
        assert_eq!(next.maintenance, Some(MaintenanceTrigger::Requested));
    }

    #[tokio::test(start_paused = true)]
    async fn relay_keeps_processing_when_outbound_is_disconnected() {
        let rig = Rig::new();
        for i in 0..4 {
            rig.queue.push("P2-A", &Item::new(format!("{i}A"))).await.unwrap();
        }
        rig.queue.sever("P3");

        let actor = rig.actor(
            config("P2-A", StageRole::Relay, Some("P3"), NEVER_FAILS),
            no_maintenance(),
        );
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(actor.run(shutdown.clone()));

        for _ in 0..100 {
            if rig.queue.len("P2-A").await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        // Let the last step finish.
        tokio::time::sleep(Duration::from_secs(20)).await;
        shutdown.trigger();
        handle.await.unwrap().unwrap();

        assert_eq!(rig.queue.len("P2-A").await.unwrap(), 0);
        let finished = rig
            .sink
            .status_trail()
            .into_iter()
            .filter(|&t| t == (EventType::Step, EventStatus::Finish))
            .count();
        assert_eq!(finished, 4);
        assert_eq!(rig.queue.len("P3").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_failures_never_reach_the_loop() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push("P3", &Item::new("1A")).await.unwrap();
        let sink = Arc::new(RecordingSink::failing());
        let mut actor = StageActor::new(
            config("P3", StageRole::Consumer, None, NEVER_FAILS),
            queue,
            sink.clone(),
            no_maintenance(),
        );

        let report = actor.cycle().await.unwrap();
        assert_eq!(report.step, Some(StepOutcome::Completed));
        assert!(!sink.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_items_are_transport_errors() {
        let rig = Rig::new();
        rig.queue.push("P3", &Item::new("   ")).await.unwrap();
        let mut actor = rig.actor(
            config("P3", StageRole::Consumer, None, NEVER_FAILS),
            no_maintenance(),
        );
        let err = actor.cycle().await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transport);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_blocked_dequeue() {
        let rig = Rig::new();
        let actor = rig.actor(
            config("P3", StageRole::Consumer, None, NEVER_FAILS),
            no_maintenance(),
        );
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(actor.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!handle.is_finished());
        shutdown.trigger();
        handle.await.unwrap().unwrap();
        assert!(rig.sink.events().is_empty());
    }

    fn availability(sink: &RecordingSink) -> Vec<(EventType, EventStatus, bool)> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::Status(s) => Some((s.event_type, s.event_status, s.available)),
                TelemetryEvent::Item(_) => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn stage_is_unavailable_while_broken_or_maintained() {
        let rig = Rig::new();
        rig.queue.push("P3", &Item::new("1A")).await.unwrap();
        let mut actor = rig.actor(
            config("P3", StageRole::Consumer, None, ALWAYS_FAILS),
            no_maintenance(),
        );
        actor.cycle().await.unwrap();
        actor.flag().request();
        actor.cycle().await.unwrap();

        assert_eq!(
            availability(&rig.sink),
            vec![
                (EventType::Step, EventStatus::Start, true),
                (EventType::Failure, EventStatus::None, false),
                (EventType::Step, EventStatus::Interrupt, false),
                (EventType::Repair, EventStatus::Start, false),
                (EventType::Repair, EventStatus::Finish, true),
                (EventType::Maintenance, EventStatus::Start, false),
                (EventType::Maintenance, EventStatus::Finish, true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn relay_without_downstream_stops_with_a_fatal_error() {
        let rig = Rig::new();
        rig.queue.push("P2-A", &Item::new("1A")).await.unwrap();
        let actor = rig.actor(
            config("P2-A", StageRole::Relay, None, NEVER_FAILS),
            no_maintenance(),
        );

        let err = actor.run(Shutdown::new()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(matches!(
            err,
            StageError::Config(ConfigError::MissingNext { ref stage, .. }) if stage == "P2-A"
        ));
    }

    /// Backend that takes 5s per write and then fails.
    struct StallingSink;

    #[async_trait::async_trait]
    impl TelemetrySink for StallingSink {
        async fn write(&self, _event: &TelemetryEvent) -> Result<(), TelemetryError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(TelemetryError::Rejected {
                status: 504,
                message: "gateway timeout".into(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_telemetry_backend_does_not_stretch_the_cycle() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push("P3", &Item::new("1A")).await.unwrap();
        let (sink, _writer) = QueuedSink::spawn(Arc::new(StallingSink), 64);
        let mut actor = StageActor::new(
            config("P3", StageRole::Consumer, None, NEVER_FAILS),
            queue,
            Arc::new(sink),
            no_maintenance(),
        );

        let started = tokio::time::Instant::now();
        let report = actor.cycle().await.unwrap();
        assert_eq!(report.step, Some(StepOutcome::Completed));
        // Five events were written during the cycle; only the 10s step counts.
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }
}

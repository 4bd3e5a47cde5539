use crate::config::HeartbeatMode;
use crate::reporter::Reporter;
use fleetmon_collector::Collector;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Lifecycle of the collection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, loop not entered yet.
    Idle,
    /// Waiting for the next tick.
    Armed,
    /// A collection and send cycle is in flight.
    Running,
    /// The loop has exited. Terminal.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleOptions {
    pub interval: Duration,
    pub metrics_enabled: bool,
    pub heartbeat: HeartbeatMode,
}

/// Drives one collector and one reporter on a fixed cadence.
///
/// Cycles never overlap. A cycle that overruns the interval causes the
/// missed ticks to be skipped, so the next cycle starts on the following
/// interval boundary.
pub struct Scheduler {
    collector: Box<dyn Collector>,
    reporter: Box<dyn Reporter>,
    options: ScheduleOptions,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(
        collector: Box<dyn Collector>,
        reporter: Box<dyn Reporter>,
        options: ScheduleOptions,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            collector,
            reporter,
            options,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }

    /// Runs until `cancel` fires and hands the collector and reporter back.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
    ) -> (Box<dyn Collector>, Box<dyn Reporter>) {
        let mut ticker = interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            collector = self.collector.name(),
            interval_secs = self.options.interval.as_secs(),
            metrics_enabled = self.options.metrics_enabled,
            heartbeat = ?self.options.heartbeat,
            "Starting collection loop"
        );

        loop {
            self.set_state(SchedulerState::Armed);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.set_state(SchedulerState::Running);
            self.run_cycle(&cancel).await;
        }

        self.set_state(SchedulerState::Cancelled);
        tracing::info!("Collection loop stopped");
        (self.collector, self.reporter)
    }

    /// One tick: collect and send when metrics are enabled, then the
    /// standalone heartbeat. Failures are logged and never end the loop.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) {
        if self.options.metrics_enabled {
            let outcome = self.collector.collect(cancel).await;
            if cancel.is_cancelled() {
                return;
            }

            tracing::debug!(
                collector = self.collector.name(),
                count = outcome.metrics.len(),
                errors = outcome.errors.len(),
                fallback = outcome.fallback,
                backfilled = outcome.backfilled.len(),
                "Collection complete"
            );

            if let Err(e) = self.reporter.send(outcome.metrics, cancel).await {
                tracing::warn!(error = %e, "Failed to send metrics, next tick carries fresh data");
            }
        }

        if self.options.heartbeat == HeartbeatMode::Standalone && !cancel.is_cancelled() {
            if let Err(e) = self.reporter.heartbeat(cancel).await {
                tracing::warn!(error = %e, "Failed to send heartbeat");
            }
        }
    }
}

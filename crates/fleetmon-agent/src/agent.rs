use crate::config::AgentConfig;
use crate::error::{AgentError, ShutdownError};
use crate::reporter::{HttpReporter, Reporter};
use crate::scheduler::{ScheduleOptions, Scheduler, SchedulerState};
use fleetmon_collector::{Collector, CollectorRegistry, Platform};
use fleetmon_common::types::AgentIdentity;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type SchedulerParts = (Box<dyn Collector>, Box<dyn Reporter>);

enum Lifecycle {
    Ready(Box<dyn Collector>, Box<dyn Reporter>),
    Running {
        handle: JoinHandle<SchedulerParts>,
        state: watch::Receiver<SchedulerState>,
    },
    Stopped,
}

/// Owns the identity, collector, reporter and cancellation token of one
/// agent process.
pub struct Agent {
    config: AgentConfig,
    identity: AgentIdentity,
    cancel: CancellationToken,
    lifecycle: Lifecycle,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        collector: Box<dyn Collector>,
        reporter: Box<dyn Reporter>,
    ) -> Self {
        let identity = config.identity();
        Self {
            config,
            identity,
            cancel: CancellationToken::new(),
            lifecycle: Lifecycle::Ready(collector, reporter),
        }
    }

    /// Wires the platform collector from the default registry and an
    /// [`HttpReporter`].
    pub fn from_config(config: AgentConfig) -> Result<Self, AgentError> {
        let platform = Platform::current();
        let collector = CollectorRegistry::with_defaults().build(
            config.agent.monitor_type,
            platform,
            &config.collector_settings(),
        );
        let reporter = HttpReporter::from_config(&config).map_err(AgentError::HttpClient)?;
        Ok(Self::new(config, collector, Box::new(reporter)))
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Token cancelled by [`Agent::stop`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Scheduler state, once started.
    pub fn state(&self) -> Option<watch::Receiver<SchedulerState>> {
        match &self.lifecycle {
            Lifecycle::Running { state, .. } => Some(state.clone()),
            _ => None,
        }
    }

    /// Registers with the collection service and spawns the scheduler.
    ///
    /// # Errors
    ///
    /// [`AgentError::Registration`] when the handshake fails, after which the
    /// process should exit. [`AgentError::AlreadyStarted`] when called twice.
    pub async fn start(&mut self) -> Result<(), AgentError> {
        let (collector, mut reporter) =
            match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
                Lifecycle::Ready(collector, reporter) => (collector, reporter),
                other => {
                    self.lifecycle = other;
                    return Err(AgentError::AlreadyStarted);
                }
            };

        if let Err(e) = reporter.register(&self.identity, &self.cancel).await {
            self.lifecycle = Lifecycle::Ready(collector, reporter);
            return Err(e.into());
        }

        let scheduler = Scheduler::new(
            collector,
            reporter,
            ScheduleOptions {
                interval: self.config.interval(),
                metrics_enabled: self.config.metrics.enabled,
                heartbeat: self.config.server.heartbeat,
            },
        );
        let state = scheduler.subscribe();
        let handle = tokio::spawn(scheduler.run(self.cancel.clone()));
        self.lifecycle = Lifecycle::Running { handle, state };

        tracing::info!(
            agent_id = self.identity.id(),
            monitor_type = %self.identity.monitor_type(),
            "Agent started"
        );
        Ok(())
    }

    /// Longest `stop` waits for the scheduler before aborting it.
    pub fn shutdown_bound(&self) -> Duration {
        self.config.interval() + self.config.timeout()
    }

    /// Cancels the scheduler, waits for it within [`Agent::shutdown_bound`]
    /// and closes the reporter.
    pub async fn stop(&mut self) -> Result<(), ShutdownError> {
        let mut handle = match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running { handle, .. } => handle,
            Lifecycle::Stopped => return Err(ShutdownError::AlreadyStopped),
            ready @ Lifecycle::Ready(..) => {
                self.lifecycle = ready;
                return Err(ShutdownError::NotStarted);
            }
        };

        self.cancel.cancel();
        let bound = self.shutdown_bound();

        match tokio::time::timeout(bound, &mut handle).await {
            Ok(Ok((_collector, mut reporter))) => {
                reporter.close().await;
                tracing::info!(agent_id = self.identity.id(), "Agent stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Scheduler task failed");
                Err(ShutdownError::TaskFailed(e.to_string()))
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(bound_secs = bound.as_secs(), "Scheduler did not stop in time, aborted");
                Err(ShutdownError::Timeout(bound))
            }
        }
    }
}

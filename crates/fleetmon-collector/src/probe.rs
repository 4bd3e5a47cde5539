use crate::baseline::Baseline;
use crate::fallback;
use crate::Collector;
use async_trait::async_trait;
use fleetmon_common::error::ProbeError;
use fleetmon_common::types::{CollectionOutcome, MetricSet, MonitorType};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// One independent unit of collection (e.g. `"status"`, `"version"`).
///
/// Probes are run in order by [`run_probes`]; a failing probe never prevents
/// the others from running.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Source name recorded alongside any error this probe produces.
    fn name(&self) -> &str;

    /// Queries the target and returns the metrics this probe owns.
    ///
    /// # Errors
    ///
    /// Returns a [`ProbeError`] when the target is unreachable, refuses
    /// access, or answers with something that cannot be parsed.
    async fn run(&self) -> Result<MetricSet, ProbeError>;
}

/// Runs every probe in order, merging successes and recording failures.
///
/// Each probe is bounded by `per_call` and races `cancel`. Once `cancel`
/// fires the remaining probes are skipped.
pub async fn run_probes(
    probes: &[Box<dyn Probe>],
    per_call: Duration,
    cancel: &CancellationToken,
) -> CollectionOutcome {
    let mut outcome = CollectionOutcome::default();

    for probe in probes {
        if cancel.is_cancelled() {
            break;
        }
        outcome.attempted += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProbeError::Cancelled),
            res = timeout(per_call, probe.run()) => match res {
                Ok(res) => res,
                Err(_) => Err(ProbeError::Timeout(per_call)),
            },
        };

        match result {
            Ok(metrics) => {
                tracing::debug!(probe = probe.name(), count = metrics.len(), "Probe succeeded");
                outcome.metrics.merge(metrics);
            }
            Err(e) => {
                tracing::warn!(probe = probe.name(), error = %e, "Probe failed");
                outcome.record_error(probe.name(), e);
            }
        }
    }

    outcome
}

/// A platform collector assembled from a list of probes.
///
/// Wraps the monitor type's [`Baseline`]: probe results are merged, then the
/// fallback policy decides between the collected data (backfilled to the
/// canonical key set) and the baseline snapshot.
pub struct ProbeCollector {
    name: String,
    baseline: Baseline,
    probes: Vec<Box<dyn Probe>>,
    per_call: Duration,
}

impl ProbeCollector {
    pub fn new(
        name: impl Into<String>,
        monitor_type: MonitorType,
        probes: Vec<Box<dyn Probe>>,
        per_call: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            baseline: Baseline::for_type(monitor_type),
            probes,
            per_call,
        }
    }

    /// Overrides the fallback threshold of the monitor type.
    pub fn with_min_keys(mut self, min_keys: usize) -> Self {
        self.baseline.min_keys = min_keys;
        self
    }
}

#[async_trait]
impl Collector for ProbeCollector {
    fn monitor_type(&self) -> MonitorType {
        self.baseline.monitor_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, cancel: &CancellationToken) -> CollectionOutcome {
        let outcome = run_probes(&self.probes, self.per_call, cancel).await;
        fallback::apply(outcome, &self.baseline, &self.name)
    }
}

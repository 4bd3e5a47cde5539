//! Collector framework for fleetmon agents.
//!
//! Every monitor type has a [`baseline::BaselineCollector`] that produces the
//! canonical key set from fixed values, plus zero or more platform collectors
//! that query the real subsystem through named [`probe::Probe`]s. The
//! [`registry::CollectorRegistry`] picks the implementation for the running
//! platform; the scheduler and reporter only ever see `dyn Collector`.

pub mod apm;
pub mod baseline;
pub mod command;
pub mod fallback;
pub mod http;
pub mod mysql;
pub mod nginx;
pub mod probe;
pub mod process;
pub mod rabbitmq;
pub mod redis;
pub mod registry;
pub mod vmware;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use fleetmon_common::types::{CollectionOutcome, MonitorType};
use tokio_util::sync::CancellationToken;

pub use probe::{run_probes, Probe, ProbeCollector};
pub use registry::{BuildError, CollectorRegistry, CollectorSettings, Platform, TargetConfig};

/// Produces one [`CollectionOutcome`] per tick for a single monitor type.
///
/// Implementations must always return the full canonical key set of their
/// monitor type (real, backfilled or baseline) and must observe `cancel`
/// so shutdown is never held up by a slow target.
#[async_trait]
pub trait Collector: Send {
    /// The monitor type whose canonical snapshot this collector produces.
    fn monitor_type(&self) -> MonitorType;

    /// Returns the collector name (e.g., `"nginx-linux"`), used for logging.
    fn name(&self) -> &str;

    /// Collects one snapshot. Never fails: per-source failures are recorded
    /// in the outcome.
    async fn collect(&mut self, cancel: &CancellationToken) -> CollectionOutcome;
}

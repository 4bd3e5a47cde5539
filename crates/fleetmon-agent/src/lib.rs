//! fleetmon agent runtime: configuration, registration and reporting, the
//! collection scheduler and the agent lifecycle.

pub mod agent;
pub mod config;
pub mod error;
pub mod reporter;
pub mod scheduler;

pub use agent::Agent;
pub use config::{AgentConfig, HeartbeatMode};
pub use reporter::{HttpReporter, Reporter};
pub use scheduler::{ScheduleOptions, Scheduler, SchedulerState};

//! Error taxonomy of the agent runtime.
//!
//! Collection failures live in [`fleetmon_common::error::ProbeError`] and
//! never reach this layer: they are recorded in the tick's outcome.

use std::path::PathBuf;
use std::time::Duration;

/// Failure to load or validate the agent configuration. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A value parsed but is outside its allowed range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure of the registration handshake. Fatal at startup.
///
/// # Examples
///
/// ```rust
/// use fleetmon_agent::error::RegistrationError;
///
/// let err = RegistrationError::Status { status: 401, body: "bad key".to_string() };
/// assert!(err.to_string().contains("401"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("registration request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("registration rejected: status={status}, body={body}")]
    Status { status: u16, body: String },

    #[error("invalid registration response: {0}")]
    Decode(String),

    /// Every attempt failed; `last` is the final failure.
    #[error("registration failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<RegistrationError>,
    },

    #[error("registration cancelled")]
    Cancelled,

    #[error("reporter is closed")]
    Closed,
}

impl RegistrationError {
    /// Transport failures, 5xx, 408 and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistrationError::Network(_) => true,
            RegistrationError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

/// Failure to deliver a metrics report or heartbeat. Logged; the next tick
/// carries fresh data.
#[derive(Debug, thiserror::Error)]
pub enum TransmissionError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("collection service answered status={status}, body={body}")]
    Status { status: u16, body: String },

    /// The reporter was closed.
    #[error("reporter is closed")]
    Closed,

    #[error("agent is not registered")]
    NotRegistered,

    #[error("transmission cancelled")]
    Cancelled,
}

/// Problems while stopping the agent. Logged, never blocks process exit.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("agent already stopped")]
    AlreadyStopped,

    #[error("agent was never started")]
    NotStarted,

    /// The scheduler did not finish within the bound and was aborted.
    #[error("scheduler did not stop within {0:?}, task aborted")]
    Timeout(Duration),

    #[error("scheduler task failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),

    #[error("agent already started")]
    AlreadyStarted,
}

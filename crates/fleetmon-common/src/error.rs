use std::time::Duration;

/// Failure of a single sub-probe.
///
/// A probe error is always recovered locally: it is recorded in the tick's
/// [`CollectionOutcome`](crate::types::CollectionOutcome), logged, and counted
/// toward the fallback threshold. It never aborts the tick.
///
/// # Examples
///
/// ```rust
/// use fleetmon_common::error::ProbeError;
///
/// let err = ProbeError::parse("stub_status", "missing 'Active connections' line");
/// assert!(err.to_string().contains("stub_status"));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    /// The target could not be reached (connection refused, DNS, TLS).
    #[error("target unreachable: {0}")]
    Unreachable(String),

    /// The probe did not finish within the per-call timeout.
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    /// An external command could not be spawned or exited non-zero.
    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    /// The target answered but the payload could not be understood.
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// The OS or the target refused access (bad credentials, file mode).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The management API returned a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    /// The agent is shutting down.
    #[error("probe cancelled")]
    Cancelled,
}

impl ProbeError {
    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        ProbeError::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        ProbeError::Command {
            command: command.into(),
            message: message.into(),
        }
    }
}

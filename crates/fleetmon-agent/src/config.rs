use crate::error::ConfigError;
use fleetmon_collector::{CollectorSettings, TargetConfig};
use fleetmon_common::types::{AgentIdentity, MonitorType};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Agent configuration, loaded once from TOML at startup.
///
/// ```toml
/// [server]
/// endpoint = "https://collector.example.com/api/v1"
/// api_key = "secret"
///
/// [agent]
/// type = "nginx"
/// name = "web01"
///
/// [metrics]
/// interval = 30
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub agent: AgentSection,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Connection details of the observed subsystem, handed to the collector.
    #[serde(default)]
    pub target: TargetConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub endpoint: String,
    pub api_key: String,
    #[serde(default)]
    pub heartbeat: HeartbeatMode,
    #[serde(default = "default_register_attempts")]
    pub register_attempts: u32,
    /// Delay between registration attempts, in seconds.
    #[serde(default = "default_register_backoff")]
    pub register_backoff: u64,
}

/// How liveness is signalled to the collection service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatMode {
    /// Every metrics submission doubles as a heartbeat.
    #[default]
    Folded,
    /// A separate `POST /heartbeat` every tick, even with metrics disabled.
    Standalone,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// Defaults to `<type>-<hostname>`.
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub monitor_type: MonitorType,
    /// Defaults to the hostname.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Tick interval in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Per-call bound for probes and HTTP requests, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval: default_interval(),
            timeout: default_timeout(),
        }
    }
}

fn default_register_attempts() -> u32 {
    3
}

fn default_register_backoff() -> u64 {
    2
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    10
}

impl AgentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.server.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "server.endpoint must be an http(s) URL, got {endpoint:?}"
            )));
        }
        if self.server.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("server.api_key must not be empty".into()));
        }
        if self.server.register_attempts == 0 {
            return Err(ConfigError::Invalid(
                "server.register_attempts must be at least 1".into(),
            ));
        }
        if self.metrics.interval == 0 {
            return Err(ConfigError::Invalid("metrics.interval must be greater than 0".into()));
        }
        if self.metrics.timeout == 0 {
            return Err(ConfigError::Invalid("metrics.timeout must be greater than 0".into()));
        }
        if matches!(&self.agent.id, Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::Invalid("agent.id must not be empty".into()));
        }
        Ok(())
    }

    /// Endpoint without trailing slash.
    pub fn endpoint(&self) -> &str {
        self.server.endpoint.trim().trim_end_matches('/')
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.metrics.interval)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.metrics.timeout)
    }

    pub fn register_backoff(&self) -> Duration {
        Duration::from_secs(self.server.register_backoff)
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            target: self.target.clone(),
            timeout: self.timeout(),
        }
    }

    /// Builds the immutable identity presented at registration.
    pub fn identity(&self) -> AgentIdentity {
        let monitor_type = self.agent.monitor_type;
        let hostname = hostname();
        let id = self
            .agent
            .id
            .clone()
            .unwrap_or_else(|| format!("{monitor_type}-{hostname}"));
        let name = self.agent.name.clone().unwrap_or(hostname);
        AgentIdentity::new(id, monitor_type, name, env!("CARGO_PKG_VERSION"))
    }
}

fn hostname() -> String {
    sysinfo::System::host_name()
        .map(|h| h.to_lowercase())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

use crate::baseline::BaselineCollector;
use crate::{apm, mysql, nginx, rabbitmq, redis, vmware, Collector};
use fleetmon_common::types::MonitorType;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Operating system family a collector implementation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Windows,
    Other,
}

impl Platform {
    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Other
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::Windows => write!(f, "windows"),
            Platform::Other => write!(f, "other"),
        }
    }
}

/// Connection details of the observed subsystem (`[target]` config section).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Base URL of the management/status endpoint, when the integration
    /// talks HTTP.
    pub url: Option<String>,
    /// Overrides the process name used for OS process inspection.
    pub process_name: Option<String>,
    /// Overrides the CLI binary used by command-based probes.
    pub binary: Option<String>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl TargetConfig {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    /// Configured base URL without trailing slash, or `scheme://host:port`.
    pub fn base_url(&self, scheme: &str, default_port: u16) -> String {
        match &self.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{scheme}://{}:{}", self.host(), self.port_or(default_port)),
        }
    }

    pub fn process_or(&self, default: &str) -> String {
        self.process_name
            .clone()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn binary_or(&self, default: &str) -> String {
        self.binary.clone().unwrap_or_else(|| default.to_string())
    }

    pub fn credentials(&self) -> Option<(String, String)> {
        self.username
            .as_ref()
            .map(|u| (u.clone(), self.password.clone().unwrap_or_default()))
    }
}

/// Everything a collector factory needs.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub target: TargetConfig,
    /// Per-call bound applied to every probe.
    pub timeout: Duration,
}

/// Failure to construct a platform collector.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("invalid target configuration: {0}")]
    InvalidTarget(String),
}

pub type Factory = fn(&CollectorSettings) -> Result<Box<dyn Collector>, BuildError>;

/// Maps `(monitor type, platform)` to a collector factory.
///
/// Entries registered without a platform apply to every platform that has
/// no dedicated entry. Types with no matching entry get a
/// [`BaselineCollector`].
pub struct CollectorRegistry {
    factories: HashMap<(MonitorType, Option<Platform>), Factory>,
}

impl CollectorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry populated with the built-in integrations.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(MonitorType::Nginx, Some(Platform::Linux), nginx::linux);
        registry.register(MonitorType::Nginx, Some(Platform::Windows), nginx::windows);
        registry.register(MonitorType::Redis, Some(Platform::Linux), redis::linux);
        registry.register(MonitorType::Redis, Some(Platform::Windows), redis::windows);
        registry.register(MonitorType::Mysql, Some(Platform::Linux), mysql::linux);
        registry.register(MonitorType::Mysql, Some(Platform::Windows), mysql::windows);
        registry.register(MonitorType::Rabbitmq, Some(Platform::Linux), rabbitmq::linux);
        registry.register(MonitorType::Rabbitmq, None, rabbitmq::generic);
        registry.register(MonitorType::Vmware, None, vmware::generic);
        registry.register(MonitorType::Apm, None, apm::generic);
        registry
    }

    pub fn register(&mut self, monitor_type: MonitorType, platform: Option<Platform>, factory: Factory) {
        self.factories.insert((monitor_type, platform), factory);
    }

    fn lookup(&self, monitor_type: MonitorType, platform: Platform) -> Option<Factory> {
        self.factories
            .get(&(monitor_type, Some(platform)))
            .or_else(|| self.factories.get(&(monitor_type, None)))
            .copied()
    }

    pub fn has_platform_collector(&self, monitor_type: MonitorType, platform: Platform) -> bool {
        self.lookup(monitor_type, platform).is_some()
    }

    /// Builds the collector for `monitor_type` on `platform`.
    ///
    /// Never fails: when no implementation exists or construction fails the
    /// baseline collector is returned and the reason is logged.
    pub fn build(
        &self,
        monitor_type: MonitorType,
        platform: Platform,
        settings: &CollectorSettings,
    ) -> Box<dyn Collector> {
        let Some(factory) = self.lookup(monitor_type, platform) else {
            tracing::warn!(
                monitor_type = %monitor_type,
                platform = %platform,
                "No platform collector available, reporting baseline snapshot"
            );
            return Box::new(BaselineCollector::new(monitor_type));
        };

        match factory(settings) {
            Ok(collector) => {
                tracing::info!(
                    collector = collector.name(),
                    platform = %platform,
                    "Collector selected"
                );
                collector
            }
            Err(e) => {
                tracing::error!(
                    monitor_type = %monitor_type,
                    platform = %platform,
                    error = %e,
                    "Failed to build platform collector, reporting baseline snapshot"
                );
                Box::new(BaselineCollector::new(monitor_type))
            }
        }
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

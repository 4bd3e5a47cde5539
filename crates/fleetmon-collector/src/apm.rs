//! APM backend over HTTP: a health document at the base URL and aggregate
//! service statistics at `/api/stats`.

use crate::http;
use crate::probe::{Probe, ProbeCollector};
use crate::registry::{BuildError, CollectorSettings, TargetConfig};
use crate::Collector;
use async_trait::async_trait;
use fleetmon_common::error::ProbeError;
use fleetmon_common::types::{MetricSet, MonitorType};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_PORT: u16 = 8200;

struct Api {
    client: Client,
    base_url: String,
    target: TargetConfig,
}

#[derive(Debug, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub publish_ready: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub services: i64,
    #[serde(default)]
    pub throughput_rpm: f64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub avg_response_ms: f64,
    #[serde(default)]
    pub p95_response_ms: f64,
}

/// `apm_status` is taken from `status` when present, otherwise derived from
/// `publish_ready`.
pub fn health_metrics(health: &Health) -> MetricSet {
    let status = match (&health.status, health.publish_ready) {
        (Some(status), _) => status.to_lowercase(),
        (None, Some(true)) => "ready".to_string(),
        (None, Some(false)) => "not_ready".to_string(),
        (None, None) => "unknown".to_string(),
    };
    let mut metrics = MetricSet::new();
    metrics.insert("up", true);
    metrics.insert("version", health.version.as_deref().unwrap_or("unknown"));
    metrics.insert("apm_status", status);
    metrics
}

pub fn stats_metrics(stats: &Stats) -> MetricSet {
    let mut metrics = MetricSet::new();
    metrics.insert("services_total", stats.services);
    metrics.insert("throughput_rpm", stats.throughput_rpm);
    metrics.insert("error_rate", stats.error_rate);
    metrics.insert("avg_response_ms", stats.avg_response_ms);
    metrics.insert("p95_response_ms", stats.p95_response_ms);
    metrics
}

struct HealthProbe(Arc<Api>);

#[async_trait]
impl Probe for HealthProbe {
    fn name(&self) -> &str {
        "health"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let url = format!("{}/", self.0.base_url);
        let health: Health =
            http::fetch_json(http::get(&self.0.client, &url, &self.0.target), &url).await?;
        Ok(health_metrics(&health))
    }
}

struct StatsProbe(Arc<Api>);

#[async_trait]
impl Probe for StatsProbe {
    fn name(&self) -> &str {
        "stats"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let url = format!("{}/api/stats", self.0.base_url);
        let stats: Stats =
            http::fetch_json(http::get(&self.0.client, &url, &self.0.target), &url).await?;
        Ok(stats_metrics(&stats))
    }
}

pub fn generic(settings: &CollectorSettings) -> Result<Box<dyn Collector>, BuildError> {
    let api = Arc::new(Api {
        client: http::build_client(settings.timeout, &settings.target)?,
        base_url: settings.target.base_url("http", DEFAULT_PORT),
        target: settings.target.clone(),
    });
    let probes: Vec<Box<dyn Probe>> = vec![
        Box::new(HealthProbe(api.clone())),
        Box::new(StatsProbe(api)),
    ];
    Ok(Box::new(ProbeCollector::new(
        "apm-http",
        MonitorType::Apm,
        probes,
        settings.timeout,
    )))
}

//! RabbitMQ management API (`/api/overview`, `/api/nodes`, `/api/queues`).
//!
//! Per-queue metrics are emitted as `queue_<name>_messages` and
//! `queue_<name>_consumers`. They are dynamic and not part of the canonical
//! key set.

use crate::http;
use crate::probe::{Probe, ProbeCollector};
use crate::process::ProcessProbe;
use crate::registry::{BuildError, CollectorSettings, TargetConfig};
use crate::Collector;
use async_trait::async_trait;
use fleetmon_common::error::ProbeError;
use fleetmon_common::types::{MetricSet, MonitorType};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_MANAGEMENT_PORT: u16 = 15672;

struct Api {
    client: Client,
    base_url: String,
    target: TargetConfig,
}

impl Api {
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProbeError> {
        let url = format!("{}{path}", self.base_url);
        http::fetch_json(http::get(&self.client, &url, &self.target), &url).await
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Overview {
    #[serde(default)]
    pub rabbitmq_version: Option<String>,
    #[serde(default)]
    pub queue_totals: QueueTotals,
    #[serde(default)]
    pub object_totals: ObjectTotals,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueTotals {
    #[serde(default)]
    pub messages_ready: i64,
    #[serde(default)]
    pub messages_unacknowledged: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ObjectTotals {
    #[serde(default)]
    pub connections: i64,
    #[serde(default)]
    pub channels: i64,
    #[serde(default)]
    pub consumers: i64,
    #[serde(default)]
    pub exchanges: i64,
    #[serde(default)]
    pub queues: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub mem_used: i64,
    #[serde(default)]
    pub fd_used: i64,
    #[serde(default)]
    pub sockets_used: i64,
    #[serde(default)]
    pub disk_free: i64,
    #[serde(default)]
    pub partitions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Queue {
    pub name: String,
    #[serde(default)]
    pub vhost: String,
    #[serde(default)]
    pub messages: i64,
    #[serde(default)]
    pub consumers: i64,
}

pub fn overview_metrics(overview: &Overview) -> MetricSet {
    let mut metrics = MetricSet::new();
    metrics.insert("up", true);
    metrics.insert(
        "version",
        overview.rabbitmq_version.as_deref().unwrap_or("unknown"),
    );
    metrics.insert("messages_ready", overview.queue_totals.messages_ready);
    metrics.insert(
        "messages_unacknowledged",
        overview.queue_totals.messages_unacknowledged,
    );
    metrics.insert("connections", overview.object_totals.connections);
    metrics.insert("channels", overview.object_totals.channels);
    metrics.insert("consumers", overview.object_totals.consumers);
    metrics.insert("exchanges", overview.object_totals.exchanges);
    metrics.insert("total_queues", overview.object_totals.queues);
    metrics
}

/// Cluster-wide node totals.
pub fn node_metrics(nodes: &[Node]) -> MetricSet {
    let mut metrics = MetricSet::new();
    metrics.insert("node_count", nodes.len());
    metrics.insert("node_running", nodes.iter().filter(|n| n.running).count());
    metrics.insert("node_mem_used_bytes", nodes.iter().map(|n| n.mem_used).sum::<i64>());
    metrics.insert("node_fd_used", nodes.iter().map(|n| n.fd_used).sum::<i64>());
    metrics.insert("node_sockets_used", nodes.iter().map(|n| n.sockets_used).sum::<i64>());
    // The smallest free disk is the one that trips the disk alarm first.
    metrics.insert(
        "node_disk_free_bytes",
        nodes.iter().map(|n| n.disk_free).min().unwrap_or(0),
    );
    metrics.insert(
        "node_partitions",
        nodes.iter().map(|n| n.partitions.len()).sum::<usize>(),
    );
    metrics
}

/// `queue_<vhost>_<name>` with anything outside `[a-z0-9_]` replaced. The
/// default vhost `/` is left out.
pub fn queue_key(queue: &Queue) -> String {
    let raw = if queue.vhost.is_empty() || queue.vhost == "/" {
        queue.name.clone()
    } else {
        format!("{}_{}", queue.vhost, queue.name)
    };
    let sanitized: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("queue_{}", sanitized.trim_matches('_'))
}

pub fn queue_metrics(queues: &[Queue]) -> MetricSet {
    let mut metrics = MetricSet::new();
    for queue in queues {
        let key = queue_key(queue);
        metrics.insert(format!("{key}_messages"), queue.messages);
        metrics.insert(format!("{key}_consumers"), queue.consumers);
    }
    metrics
}

struct OverviewProbe(Arc<Api>);

#[async_trait]
impl Probe for OverviewProbe {
    fn name(&self) -> &str {
        "overview"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let overview: Overview = self.0.get("/api/overview").await?;
        Ok(overview_metrics(&overview))
    }
}

struct NodesProbe(Arc<Api>);

#[async_trait]
impl Probe for NodesProbe {
    fn name(&self) -> &str {
        "nodes"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let nodes: Vec<Node> = self.0.get("/api/nodes").await?;
        if nodes.is_empty() {
            return Err(ProbeError::parse("/api/nodes", "no nodes reported"));
        }
        Ok(node_metrics(&nodes))
    }
}

struct QueuesProbe(Arc<Api>);

#[async_trait]
impl Probe for QueuesProbe {
    fn name(&self) -> &str {
        "queues"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let queues: Vec<Queue> = self.0.get("/api/queues").await?;
        Ok(queue_metrics(&queues))
    }
}

/// The management API probes, in collection order.
pub fn api_probes(settings: &CollectorSettings) -> Result<Vec<Box<dyn Probe>>, BuildError> {
    let api = Arc::new(Api {
        client: http::build_client(settings.timeout, &settings.target)?,
        base_url: settings.target.base_url("http", DEFAULT_MANAGEMENT_PORT),
        target: settings.target.clone(),
    });
    Ok(vec![
        Box::new(OverviewProbe(api.clone())),
        Box::new(NodesProbe(api.clone())),
        Box::new(QueuesProbe(api)),
    ])
}

pub fn linux(settings: &CollectorSettings) -> Result<Box<dyn Collector>, BuildError> {
    let mut probes = api_probes(settings)?;
    probes.push(Box::new(ProcessProbe::new([settings.target.process_or("beam.smp")])));
    Ok(Box::new(ProbeCollector::new(
        "rabbitmq-linux",
        MonitorType::Rabbitmq,
        probes,
        settings.timeout,
    )))
}

/// Any platform: the management API alone.
pub fn generic(settings: &CollectorSettings) -> Result<Box<dyn Collector>, BuildError> {
    Ok(Box::new(ProbeCollector::new(
        "rabbitmq-api",
        MonitorType::Rabbitmq,
        api_probes(settings)?,
        settings.timeout,
    )))
}

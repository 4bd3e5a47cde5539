//! Baseline snapshots: the canonical key set of each monitor type populated
//! with fixed default values.

use crate::Collector;
use async_trait::async_trait;
use fleetmon_common::types::{CollectionOutcome, MetricSet, MonitorType};
use tokio_util::sync::CancellationToken;

/// Populated-key threshold below which a tick's data is discarded in favour
/// of the baseline. Tuned per monitor type.
pub const fn min_keys(monitor_type: MonitorType) -> usize {
    match monitor_type {
        MonitorType::Nginx => 4,
        MonitorType::Redis => 6,
        MonitorType::Mysql => 6,
        MonitorType::Rabbitmq => 5,
        MonitorType::Vmware => 7,
        MonitorType::Apm => 4,
    }
}

/// Canonical snapshot of a monitor type plus its fallback threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub monitor_type: MonitorType,
    pub min_keys: usize,
    pub snapshot: MetricSet,
}

impl Baseline {
    pub fn for_type(monitor_type: MonitorType) -> Self {
        Self {
            monitor_type,
            min_keys: min_keys(monitor_type),
            snapshot: snapshot(monitor_type),
        }
    }
}

/// Returns the baseline snapshot of `monitor_type`.
///
/// # Examples
///
/// ```
/// use fleetmon_collector::baseline::snapshot;
/// use fleetmon_common::types::MonitorType;
///
/// let nginx = snapshot(MonitorType::Nginx);
/// assert!(nginx.contains_key("active_connections"));
/// assert_eq!(nginx, snapshot(MonitorType::Nginx));
/// ```
pub fn snapshot(monitor_type: MonitorType) -> MetricSet {
    let mut set = MetricSet::new();
    set.insert("up", false);
    match monitor_type {
        MonitorType::Nginx => {
            set.insert("version", "unknown");
            set.insert("active_connections", 0);
            set.insert("accepts", 0);
            set.insert("handled", 0);
            set.insert("requests", 0);
            set.insert("reading", 0);
            set.insert("writing", 0);
            set.insert("waiting", 0);
            set.insert("config_valid", false);
            insert_process_defaults(&mut set);
        }
        MonitorType::Redis => {
            set.insert("version", "unknown");
            set.insert("role", "unknown");
            set.insert("uptime_secs", 0);
            set.insert("connected_clients", 0);
            set.insert("blocked_clients", 0);
            set.insert("used_memory_bytes", 0);
            set.insert("used_memory_peak_bytes", 0);
            set.insert("maxmemory_bytes", 0);
            set.insert("ops_per_sec", 0);
            set.insert("keyspace_hits", 0);
            set.insert("keyspace_misses", 0);
            set.insert("hit_rate", 0.0);
            set.insert("keys_total", 0);
            insert_process_defaults(&mut set);
        }
        MonitorType::Mysql => {
            set.insert("version", "unknown");
            set.insert("uptime_secs", 0);
            set.insert("threads_connected", 0);
            set.insert("threads_running", 0);
            set.insert("questions", 0);
            set.insert("slow_queries", 0);
            set.insert("aborted_connects", 0);
            set.insert("bytes_received", 0);
            set.insert("bytes_sent", 0);
            set.insert("max_connections", 0);
            set.insert("innodb_buffer_pool_size_bytes", 0);
            insert_process_defaults(&mut set);
        }
        MonitorType::Rabbitmq => {
            set.insert("version", "unknown");
            set.insert("messages_ready", 0);
            set.insert("messages_unacknowledged", 0);
            set.insert("connections", 0);
            set.insert("channels", 0);
            set.insert("consumers", 0);
            set.insert("exchanges", 0);
            set.insert("total_queues", 0);
            set.insert("node_count", 0);
            set.insert("node_running", 0);
            set.insert("node_mem_used_bytes", 0);
            set.insert("node_fd_used", 0);
            set.insert("node_sockets_used", 0);
            set.insert("node_disk_free_bytes", 0);
            set.insert("node_partitions", 0);
        }
        MonitorType::Vmware => {
            set.insert("host_count", 0);
            set.insert("hosts_connected", 0);
            set.insert("hosts_powered_on", 0);
            set.insert("vm_count", 0);
            set.insert("vms_powered_on", 0);
            set.insert("vms_powered_off", 0);
            set.insert("datastore_count", 0);
            set.insert("datastore_capacity_bytes", 0);
            set.insert("datastore_free_bytes", 0);
        }
        MonitorType::Apm => {
            set.insert("version", "unknown");
            set.insert("apm_status", "unknown");
            set.insert("services_total", 0);
            set.insert("throughput_rpm", 0.0);
            set.insert("error_rate", 0.0);
            set.insert("avg_response_ms", 0.0);
            set.insert("p95_response_ms", 0.0);
        }
    }
    set
}

fn insert_process_defaults(set: &mut MetricSet) {
    set.insert("process_count", 0);
    set.insert("cpu_percent", 0.0);
    set.insert("memory_bytes", 0);
    set.insert("process_uptime_secs", 0);
}

/// Collector that always answers with the baseline snapshot.
///
/// Used for monitor types without an implementation on the running
/// platform, and when a platform collector cannot be constructed.
pub struct BaselineCollector {
    name: String,
    baseline: Baseline,
}

impl BaselineCollector {
    pub fn new(monitor_type: MonitorType) -> Self {
        Self {
            name: format!("{monitor_type}-baseline"),
            baseline: Baseline::for_type(monitor_type),
        }
    }
}

#[async_trait]
impl Collector for BaselineCollector {
    fn monitor_type(&self) -> MonitorType {
        self.baseline.monitor_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, _cancel: &CancellationToken) -> CollectionOutcome {
        CollectionOutcome::from_metrics(self.baseline.snapshot.clone())
    }
}

use crate::baseline::{self, BaselineCollector};
use crate::probe::{run_probes, Probe, ProbeCollector};
use crate::rabbitmq;
use crate::registry::{CollectorRegistry, CollectorSettings, Platform, TargetConfig};
use crate::Collector;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use fleetmon_common::error::ProbeError;
use fleetmon_common::types::{MetricSet, MonitorType};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct StaticProbe {
    name: &'static str,
    result: Result<MetricSet, ProbeError>,
    calls: Arc<AtomicUsize>,
}

impl StaticProbe {
    fn ok(name: &'static str, keys: &[&str]) -> Box<dyn Probe> {
        let metrics = keys.iter().map(|k| (*k, 1)).collect();
        Box::new(Self {
            name,
            result: Ok(metrics),
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn failing(name: &'static str) -> Box<dyn Probe> {
        Box::new(Self {
            name,
            result: Err(ProbeError::Unreachable("connection refused".into())),
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Probe for StaticProbe {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

struct SlowProbe;

#[async_trait]
impl Probe for SlowProbe {
    fn name(&self) -> &str {
        "slow"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(MetricSet::new())
    }
}

fn key_set(metrics: &MetricSet) -> BTreeSet<String> {
    metrics.keys().map(str::to_string).collect()
}

fn settings_for(url: Option<String>) -> CollectorSettings {
    CollectorSettings {
        target: TargetConfig {
            url,
            ..TargetConfig::default()
        },
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn baseline_collector_reports_full_snapshot_for_every_type() {
    let cancel = CancellationToken::new();
    for kind in MonitorType::ALL {
        let mut collector = BaselineCollector::new(kind);
        let outcome = collector.collect(&cancel).await;
        assert_eq!(outcome.metrics, baseline::snapshot(kind), "{kind}");
        assert!(outcome.errors.is_empty());
        assert!(
            outcome.metrics.len() >= baseline::min_keys(kind),
            "{kind} baseline must clear its own threshold"
        );
    }
}

#[tokio::test]
async fn all_probes_failing_yields_exact_baseline() {
    let cancel = CancellationToken::new();
    for kind in MonitorType::ALL {
        let probes = vec![
            StaticProbe::failing("status"),
            StaticProbe::failing("version"),
            StaticProbe::failing("process"),
        ];
        let mut collector = ProbeCollector::new("test", kind, probes, Duration::from_secs(1));
        let outcome = collector.collect(&cancel).await;

        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.errors.len(), outcome.attempted);
        assert!(outcome.fallback);
        assert_eq!(outcome.metrics, baseline::snapshot(kind), "{kind}");
    }
}

#[tokio::test]
async fn partial_failure_keeps_live_data_and_backfills_canonical_keys() {
    let cancel = CancellationToken::new();
    let probes = vec![
        StaticProbe::ok(
            "status",
            &["up", "active_connections", "accepts", "handled", "requests"],
        ),
        StaticProbe::failing("version"),
    ];
    let mut collector = ProbeCollector::new("nginx-test", MonitorType::Nginx, probes, Duration::from_secs(1));
    let outcome = collector.collect(&cancel).await;

    assert!(!outcome.fallback);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].source, "version");
    assert!(outcome.metrics.covers(&baseline::snapshot(MonitorType::Nginx)));
    assert_eq!(
        outcome.metrics.get("active_connections").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert!(outcome.backfilled.contains(&"version".to_string()));
    assert!(!outcome.backfilled.contains(&"accepts".to_string()));
}

#[tokio::test]
async fn too_few_keys_substitutes_baseline() {
    let cancel = CancellationToken::new();
    let probes = vec![
        StaticProbe::ok("process", &["process_count", "cpu_percent"]),
        StaticProbe::failing("info"),
    ];
    let mut collector = ProbeCollector::new("redis-test", MonitorType::Redis, probes, Duration::from_secs(1));
    let outcome = collector.collect(&cancel).await;

    assert!(outcome.fallback);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.metrics, baseline::snapshot(MonitorType::Redis));
}

#[tokio::test]
async fn collected_key_set_is_stable_across_calls() {
    let cancel = CancellationToken::new();
    let probes = vec![
        StaticProbe::ok("status", &["up", "active_connections", "accepts", "handled"]),
        StaticProbe::failing("config"),
    ];
    let mut collector = ProbeCollector::new("nginx-test", MonitorType::Nginx, probes, Duration::from_secs(1));
    let first = collector.collect(&cancel).await;
    let second = collector.collect(&cancel).await;
    assert_eq!(key_set(&first.metrics), key_set(&second.metrics));
}

#[tokio::test(start_paused = true)]
async fn slow_probe_times_out_without_blocking_the_rest() {
    let cancel = CancellationToken::new();
    let probes: Vec<Box<dyn Probe>> = vec![
        Box::new(SlowProbe),
        StaticProbe::ok("status", &["a", "b"]),
    ];
    let outcome = run_probes(&probes, Duration::from_secs(2), &cancel).await;

    assert_eq!(outcome.attempted, 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].source, "slow");
    assert_eq!(outcome.errors[0].error, ProbeError::Timeout(Duration::from_secs(2)));
    assert!(outcome.metrics.contains_key("a"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_in_flight_probe_and_skips_the_rest() {
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let probes: Vec<Box<dyn Probe>> = vec![
        Box::new(SlowProbe),
        Box::new(StaticProbe {
            name: "status",
            result: Ok(MetricSet::new()),
            calls: calls.clone(),
        }),
    ];

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let outcome = run_probes(&probes, Duration::from_secs(600), &cancel).await;
    assert_eq!(outcome.attempted, 1);
    assert_eq!(outcome.errors[0].error, ProbeError::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn registry_selects_platform_then_generic_then_baseline() {
    let registry = CollectorRegistry::with_defaults();
    assert!(registry.has_platform_collector(MonitorType::Nginx, Platform::Linux));
    assert!(registry.has_platform_collector(MonitorType::Nginx, Platform::Windows));
    assert!(!registry.has_platform_collector(MonitorType::Nginx, Platform::Other));
    assert!(registry.has_platform_collector(MonitorType::Rabbitmq, Platform::Other));
    assert!(registry.has_platform_collector(MonitorType::Apm, Platform::Windows));

    let settings = settings_for(None);
    assert_eq!(
        registry.build(MonitorType::Nginx, Platform::Linux, &settings).name(),
        "nginx-linux"
    );
    assert_eq!(
        registry.build(MonitorType::Rabbitmq, Platform::Windows, &settings).name(),
        "rabbitmq-api"
    );
    assert_eq!(
        registry.build(MonitorType::Redis, Platform::Other, &settings).name(),
        "redis-baseline"
    );
    // vmware without credentials cannot be built and degrades to baseline
    assert_eq!(
        registry.build(MonitorType::Vmware, Platform::Linux, &settings).name(),
        "vmware-baseline"
    );
}

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn nodes() -> Json<serde_json::Value> {
    Json(serde_json::json!([
        {"name": "rabbit@mq1", "running": true, "mem_used": 104857600, "fd_used": 40,
         "sockets_used": 12, "disk_free": 50000000000i64, "partitions": []}
    ]))
}

#[tokio::test]
async fn rabbitmq_queue_probe_failure_keeps_node_metrics() {
    let app = Router::new()
        .route(
            "/api/overview",
            get(|| async {
                Json(serde_json::json!({
                    "rabbitmq_version": "3.12.10",
                    "queue_totals": {"messages_ready": 7, "messages_unacknowledged": 1},
                    "object_totals": {"connections": 3, "channels": 5, "consumers": 2, "exchanges": 9, "queues": 4}
                }))
            }),
        )
        .route("/api/nodes", get(nodes))
        .route(
            "/api/queues",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
    let base = spawn_server(app).await;

    let mut collector = rabbitmq::generic(&settings_for(Some(base))).unwrap();
    let outcome = collector.collect(&CancellationToken::new()).await;

    assert!(!outcome.fallback);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].source, "queues");
    assert!(matches!(
        outcome.errors[0].error,
        ProbeError::Http { status: 500, .. }
    ));
    assert_eq!(outcome.metrics.get("node_count").and_then(|v| v.as_i64()), Some(1));
    assert!(outcome.metrics.keys().any(|k| k.starts_with("node_")));
    assert!(!outcome.metrics.keys().any(|k| k.starts_with("queue_")));
    assert!(outcome.backfilled.is_empty());
}

#[tokio::test]
async fn rabbitmq_below_threshold_reports_baseline() {
    let app = Router::new()
        .route(
            "/api/overview",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        )
        .route("/api/nodes", get(nodes))
        .route(
            "/api/queues",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
    let base = spawn_server(app).await;
    let settings = settings_for(Some(base));

    let probes = rabbitmq::api_probes(&settings).unwrap();
    let mut collector = ProbeCollector::new("rabbitmq-test", MonitorType::Rabbitmq, probes, settings.timeout)
        .with_min_keys(8);
    let outcome = collector.collect(&CancellationToken::new()).await;

    assert_eq!(outcome.errors.len(), 2);
    assert!(outcome.fallback);
    assert_eq!(outcome.metrics, baseline::snapshot(MonitorType::Rabbitmq));
}

#[tokio::test]
async fn rabbitmq_queue_keys_do_not_count_towards_the_threshold() {
    let app = Router::new()
        .route(
            "/api/overview",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        )
        .route(
            "/api/nodes",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        )
        .route(
            "/api/queues",
            get(|| async {
                Json(serde_json::json!([
                    {"name": "orders", "vhost": "/", "messages": 4, "consumers": 1},
                    {"name": "billing", "vhost": "/", "messages": 0, "consumers": 2},
                    {"name": "audit", "vhost": "/", "messages": 9, "consumers": 0}
                ]))
            }),
        );
    let base = spawn_server(app).await;

    let mut collector = rabbitmq::generic(&settings_for(Some(base))).unwrap();
    let outcome = collector.collect(&CancellationToken::new()).await;

    assert_eq!(outcome.errors.len(), 2);
    assert!(outcome.fallback);
    assert!(outcome.backfilled.is_empty());
    assert_eq!(outcome.metrics, baseline::snapshot(MonitorType::Rabbitmq));
    assert_eq!(outcome.metrics.get("up").and_then(|v| v.as_bool()), Some(false));
}

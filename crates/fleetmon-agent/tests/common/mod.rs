#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use fleetmon_agent::error::{RegistrationError, TransmissionError};
use fleetmon_agent::{AgentConfig, Reporter};
use fleetmon_collector::baseline;
use fleetmon_collector::Collector;
use fleetmon_common::types::{AgentIdentity, CollectionOutcome, MetricSet, MonitorType};
use fleetmon_common::wire::RegisterResponse;
use serde_json::Value;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Writes `content` to a temp file and loads it as agent configuration.
pub fn load_config(content: &str) -> AgentConfig {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    AgentConfig::load(file.path()).expect("config should load")
}

pub fn agent_config(endpoint: &str, interval: u64, timeout: u64, enabled: bool, heartbeat: &str) -> AgentConfig {
    load_config(&format!(
        r#"
[server]
endpoint = "{endpoint}"
api_key = "test-key"
heartbeat = "{heartbeat}"
register_attempts = 1

[agent]
id = "nginx-test01"
type = "nginx"
name = "test01"

[metrics]
enabled = {enabled}
interval = {interval}
timeout = {timeout}
"#
    ))
}

// ---- mock collection service ----

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Debug, Default)]
struct Behavior {
    register_status: Option<StatusCode>,
    register_failures: usize,
    register_body: Option<Value>,
    metrics_failures: usize,
}

/// In-process stand-in for the collection service. Records every request.
#[derive(Clone, Default)]
pub struct MockServer {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    behavior: Arc<Mutex<Behavior>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registration answers `status`.
    pub fn reject_registration(self, status: StatusCode) -> Self {
        self.behavior.lock().unwrap().register_status = Some(status);
        self
    }

    /// The first `n` registrations answer 503.
    pub fn fail_registrations(self, n: usize) -> Self {
        self.behavior.lock().unwrap().register_failures = n;
        self
    }

    pub fn with_session_token(self, token: &str) -> Self {
        self.behavior.lock().unwrap().register_body =
            Some(serde_json::json!({ "sessionToken": token }));
        self
    }

    /// Registration answers `body` verbatim.
    pub fn with_register_body(self, body: Value) -> Self {
        self.behavior.lock().unwrap().register_body = Some(body);
        self
    }

    /// The first `n` metrics submissions answer 500.
    pub fn fail_metrics(self, n: usize) -> Self {
        self.behavior.lock().unwrap().metrics_failures = n;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    fn record(&self, path: &str, headers: &HeaderMap, body: Value) {
        let authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().unwrap().push(RecordedRequest {
            path: path.to_string(),
            authorization,
            body,
        });
    }

    /// Serves the mock on an ephemeral port and returns its base URL.
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/register", post(register))
            .route("/metrics", post(metrics))
            .route("/heartbeat", post(heartbeat))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

async fn register(State(mock): State<MockServer>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    mock.record("/register", &headers, body);
    let mut behavior = mock.behavior.lock().unwrap();
    if let Some(status) = behavior.register_status {
        return (status, "registration rejected").into_response();
    }
    if behavior.register_failures > 0 {
        behavior.register_failures -= 1;
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }
    match &behavior.register_body {
        Some(body) => Json(body.clone()).into_response(),
        None => StatusCode::OK.into_response(),
    }
}

async fn metrics(State(mock): State<MockServer>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    mock.record("/metrics", &headers, body);
    let mut behavior = mock.behavior.lock().unwrap();
    if behavior.metrics_failures > 0 {
        behavior.metrics_failures -= 1;
        return (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable").into_response();
    }
    StatusCode::ACCEPTED.into_response()
}

async fn heartbeat(State(mock): State<MockServer>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    mock.record("/heartbeat", &headers, body);
    StatusCode::NO_CONTENT.into_response()
}

// ---- in-memory collector and reporter ----

/// Collector returning the nginx baseline and recording when it ran.
pub struct CountingCollector {
    pub calls: Arc<Mutex<Vec<Instant>>>,
    delay: Duration,
    honor_cancel: bool,
}

impl CountingCollector {
    pub fn new() -> Self {
        Self {
            calls: Arc::default(),
            delay: Duration::ZERO,
            honor_cancel: true,
        }
    }

    /// Each collection takes `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Each collection takes `delay` and ignores cancellation.
    pub fn stuck(delay: Duration) -> Self {
        Self {
            delay,
            honor_cancel: false,
            ..Self::new()
        }
    }
}

#[async_trait]
impl Collector for CountingCollector {
    fn monitor_type(&self) -> MonitorType {
        MonitorType::Nginx
    }

    fn name(&self) -> &str {
        "counting"
    }

    async fn collect(&mut self, cancel: &CancellationToken) -> CollectionOutcome {
        self.calls.lock().unwrap().push(Instant::now());
        if self.honor_cancel {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.delay) => {}
            }
        } else {
            tokio::time::sleep(self.delay).await;
        }
        CollectionOutcome::from_metrics(baseline::snapshot(MonitorType::Nginx))
    }
}

#[derive(Debug, Default)]
pub struct ReporterLog {
    pub registrations: usize,
    /// One entry per send: `true` when it succeeded.
    pub sends: Vec<bool>,
    pub sent_keys: Vec<usize>,
    pub heartbeats: usize,
    pub closed: bool,
}

/// Reporter that fails the first `fail_sends` submissions.
pub struct ScriptedReporter {
    pub log: Arc<Mutex<ReporterLog>>,
    fail_sends: usize,
}

impl ScriptedReporter {
    pub fn new() -> Self {
        Self::failing_sends(0)
    }

    pub fn failing_sends(fail_sends: usize) -> Self {
        Self {
            log: Arc::default(),
            fail_sends,
        }
    }
}

#[async_trait]
impl Reporter for ScriptedReporter {
    async fn register(
        &mut self,
        _identity: &AgentIdentity,
        _cancel: &CancellationToken,
    ) -> Result<RegisterResponse, RegistrationError> {
        self.log.lock().unwrap().registrations += 1;
        Ok(RegisterResponse::default())
    }

    async fn heartbeat(&mut self, _cancel: &CancellationToken) -> Result<(), TransmissionError> {
        self.log.lock().unwrap().heartbeats += 1;
        Ok(())
    }

    async fn send(&mut self, metrics: MetricSet, _cancel: &CancellationToken) -> Result<(), TransmissionError> {
        let mut log = self.log.lock().unwrap();
        log.sent_keys.push(metrics.len());
        if self.fail_sends > 0 {
            self.fail_sends -= 1;
            log.sends.push(false);
            return Err(TransmissionError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        log.sends.push(true);
        Ok(())
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}

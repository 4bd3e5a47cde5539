//! VMware vCenter through the vSphere Automation REST API.
//!
//! A session is created with `POST /api/session` (basic auth) and reused by
//! all probes through the `vmware-api-session-id` header. An expired session
//! (401) is re-established once per request.

use crate::http;
use crate::probe::{Probe, ProbeCollector};
use crate::registry::{BuildError, CollectorSettings};
use crate::Collector;
use async_trait::async_trait;
use fleetmon_common::error::ProbeError;
use fleetmon_common::types::{MetricSet, MonitorType};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

const SESSION_HEADER: &str = "vmware-api-session-id";

struct Session {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl Session {
    async fn login(&self) -> Result<String, ProbeError> {
        let url = format!("{}/api/session", self.base_url);
        let request = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password));
        let token: String = http::fetch_json(request, &url).await?;
        tracing::debug!(url = %url, "vSphere session established");
        Ok(token)
    }

    async fn token(&self) -> Result<String, ProbeError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.token.lock().await = None;
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProbeError> {
        let url = format!("{}{path}", self.base_url);
        for attempt in 0..2 {
            let token = self.token().await?;
            let response = self
                .client
                .get(&url)
                .header(SESSION_HEADER, token)
                .send()
                .await
                .map_err(|e| ProbeError::Unreachable(format!("{url}: {e}")))?;

            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                self.invalidate().await;
                continue;
            }
            let status = response.status();
            if !status.is_success() {
                return Err(if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
                    ProbeError::PermissionDenied(format!("{url} answered {status}"))
                } else {
                    ProbeError::Http {
                        url,
                        status: status.as_u16(),
                    }
                });
            }
            let body = response
                .text()
                .await
                .map_err(|e| ProbeError::Unreachable(format!("{url}: {e}")))?;
            return serde_json::from_str(&body).map_err(|e| ProbeError::parse(&url, e.to_string()));
        }
        Err(ProbeError::PermissionDenied(format!(
            "{url}: session rejected after re-login"
        )))
    }
}

#[derive(Debug, Deserialize)]
pub struct HostSummary {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub connection_state: String,
    #[serde(default)]
    pub power_state: String,
}

#[derive(Debug, Deserialize)]
pub struct VmSummary {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub power_state: String,
}

#[derive(Debug, Deserialize)]
pub struct DatastoreSummary {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub capacity: i64,
    #[serde(default)]
    pub free_space: i64,
}

pub fn host_metrics(hosts: &[HostSummary]) -> MetricSet {
    let mut metrics = MetricSet::new();
    metrics.insert("up", true);
    metrics.insert("host_count", hosts.len());
    metrics.insert(
        "hosts_connected",
        hosts.iter().filter(|h| h.connection_state == "CONNECTED").count(),
    );
    metrics.insert(
        "hosts_powered_on",
        hosts.iter().filter(|h| h.power_state == "POWERED_ON").count(),
    );
    metrics
}

pub fn vm_metrics(vms: &[VmSummary]) -> MetricSet {
    let mut metrics = MetricSet::new();
    metrics.insert("vm_count", vms.len());
    metrics.insert(
        "vms_powered_on",
        vms.iter().filter(|v| v.power_state == "POWERED_ON").count(),
    );
    metrics.insert(
        "vms_powered_off",
        vms.iter().filter(|v| v.power_state == "POWERED_OFF").count(),
    );
    metrics
}

pub fn datastore_metrics(datastores: &[DatastoreSummary]) -> MetricSet {
    let mut metrics = MetricSet::new();
    metrics.insert("datastore_count", datastores.len());
    metrics.insert(
        "datastore_capacity_bytes",
        datastores.iter().map(|d| d.capacity).sum::<i64>(),
    );
    metrics.insert(
        "datastore_free_bytes",
        datastores.iter().map(|d| d.free_space).sum::<i64>(),
    );
    metrics
}

struct HostsProbe(Arc<Session>);

#[async_trait]
impl Probe for HostsProbe {
    fn name(&self) -> &str {
        "hosts"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let hosts: Vec<HostSummary> = self.0.get("/api/vcenter/host").await?;
        Ok(host_metrics(&hosts))
    }
}

struct VmsProbe(Arc<Session>);

#[async_trait]
impl Probe for VmsProbe {
    fn name(&self) -> &str {
        "vms"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let vms: Vec<VmSummary> = self.0.get("/api/vcenter/vm").await?;
        Ok(vm_metrics(&vms))
    }
}

struct DatastoresProbe(Arc<Session>);

#[async_trait]
impl Probe for DatastoresProbe {
    fn name(&self) -> &str {
        "datastores"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let datastores: Vec<DatastoreSummary> = self.0.get("/api/vcenter/datastore").await?;
        Ok(datastore_metrics(&datastores))
    }
}

pub fn generic(settings: &CollectorSettings) -> Result<Box<dyn Collector>, BuildError> {
    let (username, password) = settings.target.credentials().ok_or_else(|| {
        BuildError::InvalidTarget("vmware requires target.username and target.password".into())
    })?;
    let session = Arc::new(Session {
        client: http::build_client(settings.timeout, &settings.target)?,
        base_url: settings.target.base_url("https", 443),
        username,
        password,
        token: Mutex::new(None),
    });
    let probes: Vec<Box<dyn Probe>> = vec![
        Box::new(HostsProbe(session.clone())),
        Box::new(VmsProbe(session.clone())),
        Box::new(DatastoresProbe(session)),
    ];
    Ok(Box::new(ProbeCollector::new(
        "vmware-vsphere",
        MonitorType::Vmware,
        probes,
        settings.timeout,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_metrics() {
        let hosts: Vec<HostSummary> = serde_json::from_str(
            r#"[{"host":"host-1","name":"esx01","connection_state":"CONNECTED","power_state":"POWERED_ON"},
                {"host":"host-2","name":"esx02","connection_state":"DISCONNECTED","power_state":"POWERED_OFF"}]"#,
        )
        .unwrap();
        let metrics = host_metrics(&hosts);
        assert_eq!(metrics.get("host_count").and_then(|v| v.as_i64()), Some(2));
        assert_eq!(metrics.get("hosts_connected").and_then(|v| v.as_i64()), Some(1));

        let vms: Vec<VmSummary> = serde_json::from_str(
            r#"[{"vm":"vm-1","name":"web","power_state":"POWERED_ON"},
                {"vm":"vm-2","name":"db","power_state":"SUSPENDED"}]"#,
        )
        .unwrap();
        let metrics = vm_metrics(&vms);
        assert_eq!(metrics.get("vms_powered_on").and_then(|v| v.as_i64()), Some(1));
        assert_eq!(metrics.get("vms_powered_off").and_then(|v| v.as_i64()), Some(0));

        let datastores: Vec<DatastoreSummary> = serde_json::from_str(
            r#"[{"datastore":"ds-1","name":"ssd","type":"VMFS","capacity":1000,"free_space":400}]"#,
        )
        .unwrap();
        let metrics = datastore_metrics(&datastores);
        assert_eq!(metrics.get("datastore_free_bytes").and_then(|v| v.as_i64()), Some(400));
    }

    #[test]
    fn test_missing_credentials_is_a_build_error() {
        let settings = CollectorSettings {
            target: Default::default(),
            timeout: std::time::Duration::from_secs(5),
        };
        assert!(matches!(generic(&settings), Err(BuildError::InvalidTarget(_))));
    }
}

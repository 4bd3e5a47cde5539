//! nginx: `stub_status` page, `nginx -v`, `nginx -t` and process inspection.

use crate::command::CliCommand;
use crate::http;
use crate::probe::{Probe, ProbeCollector};
use crate::process::ProcessProbe;
use crate::registry::{BuildError, CollectorSettings};
use crate::Collector;
use async_trait::async_trait;
use fleetmon_common::error::ProbeError;
use fleetmon_common::types::{MetricSet, MonitorType};
use reqwest::Client;

const DEFAULT_STATUS_PATH: &str = "/nginx_status";

struct StatusProbe {
    client: Client,
    url: String,
    settings: CollectorSettings,
}

#[async_trait]
impl Probe for StatusProbe {
    fn name(&self) -> &str {
        "status"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let body = http::fetch_text(
            http::get(&self.client, &self.url, &self.settings.target),
            &self.url,
        )
        .await?;
        let mut metrics = parse_stub_status(&body)?;
        metrics.insert("up", true);
        Ok(metrics)
    }
}

struct VersionProbe {
    binary: String,
}

#[async_trait]
impl Probe for VersionProbe {
    fn name(&self) -> &str {
        "version"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        // nginx prints its version banner on stderr.
        let output = CliCommand::new(&self.binary).arg("-v").output().await?;
        let banner = format!("{}{}", output.stderr, output.stdout);
        let version = parse_version(&banner)
            .ok_or_else(|| ProbeError::parse("nginx -v", banner.trim().to_string()))?;
        let mut metrics = MetricSet::new();
        metrics.insert("version", version);
        Ok(metrics)
    }
}

struct ConfigProbe {
    binary: String,
}

#[async_trait]
impl Probe for ConfigProbe {
    fn name(&self) -> &str {
        "config"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let output = CliCommand::new(&self.binary).arg("-t").output().await?;
        if output.stderr.contains("Permission denied") {
            return Err(ProbeError::PermissionDenied(
                "nginx -t cannot read its configuration".to_string(),
            ));
        }
        let mut metrics = MetricSet::new();
        metrics.insert("config_valid", output.success);
        Ok(metrics)
    }
}

/// Parses the body of the `stub_status` page:
///
/// ```text
/// Active connections: 291
/// server accepts handled requests
///  16630948 16630948 31070465
/// Reading: 6 Writing: 179 Waiting: 106
/// ```
pub fn parse_stub_status(body: &str) -> Result<MetricSet, ProbeError> {
    let err = |msg: &str| ProbeError::parse("stub_status", msg);
    let lines: Vec<&str> = body.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let active = lines
        .iter()
        .find_map(|l| l.strip_prefix("Active connections:"))
        .ok_or_else(|| err("missing 'Active connections' line"))?;
    let active: i64 = active
        .trim()
        .parse()
        .map_err(|_| err("invalid active connection count"))?;

    let header = lines
        .iter()
        .position(|l| l.starts_with("server accepts"))
        .ok_or_else(|| err("missing 'server accepts handled requests' header"))?;
    let counters: Vec<i64> = lines
        .get(header + 1)
        .ok_or_else(|| err("missing counters line"))?
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| err("invalid counters line"))?;
    let [accepts, handled, requests] = counters.as_slice() else {
        return Err(err("expected three counters"));
    };

    let mut metrics = MetricSet::new();
    metrics.insert("active_connections", active);
    metrics.insert("accepts", *accepts);
    metrics.insert("handled", *handled);
    metrics.insert("requests", *requests);

    let states = lines
        .iter()
        .find(|l| l.starts_with("Reading:"))
        .ok_or_else(|| err("missing 'Reading/Writing/Waiting' line"))?;
    let tokens: Vec<&str> = states.split_whitespace().collect();
    for pair in tokens.chunks(2) {
        if let [label, value] = pair {
            let key = label.trim_end_matches(':').to_lowercase();
            let value: i64 = value.parse().map_err(|_| err("invalid connection state count"))?;
            metrics.insert(key, value);
        }
    }

    Ok(metrics)
}

/// Extracts `1.25.3` from `nginx version: nginx/1.25.3`.
pub fn parse_version(banner: &str) -> Option<String> {
    let rest = banner.split("nginx/").nth(1)?;
    let version = rest.split_whitespace().next()?.trim();
    (!version.is_empty()).then(|| version.to_string())
}

fn status_probe(settings: &CollectorSettings) -> Result<Box<dyn Probe>, BuildError> {
    let client = http::build_client(settings.timeout, &settings.target)?;
    let base = settings.target.base_url("http", 80);
    let url = if settings.target.url.is_some() {
        base
    } else {
        format!("{base}{DEFAULT_STATUS_PATH}")
    };
    Ok(Box::new(StatusProbe {
        client,
        url,
        settings: settings.clone(),
    }))
}

pub fn linux(settings: &CollectorSettings) -> Result<Box<dyn Collector>, BuildError> {
    let binary = settings.target.binary_or("nginx");
    let probes: Vec<Box<dyn Probe>> = vec![
        status_probe(settings)?,
        Box::new(ProcessProbe::new([settings.target.process_or("nginx")])),
        Box::new(VersionProbe {
            binary: binary.clone(),
        }),
        Box::new(ConfigProbe { binary }),
    ];
    Ok(Box::new(ProbeCollector::new(
        "nginx-linux",
        MonitorType::Nginx,
        probes,
        settings.timeout,
    )))
}

pub fn windows(settings: &CollectorSettings) -> Result<Box<dyn Collector>, BuildError> {
    let probes: Vec<Box<dyn Probe>> = vec![
        status_probe(settings)?,
        Box::new(ProcessProbe::new([settings.target.process_or("nginx.exe")])),
    ];
    Ok(Box::new(ProbeCollector::new(
        "nginx-windows",
        MonitorType::Nginx,
        probes,
        settings.timeout,
    )))
}

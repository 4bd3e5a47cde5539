//! Redis: `redis-cli INFO`, `CONFIG GET maxmemory` and process inspection.

use crate::command::CliCommand;
use crate::probe::{Probe, ProbeCollector};
use crate::process::ProcessProbe;
use crate::registry::{BuildError, CollectorSettings};
use crate::Collector;
use async_trait::async_trait;
use fleetmon_common::error::ProbeError;
use fleetmon_common::types::{MetricSet, MonitorType};
use std::collections::HashMap;

const DEFAULT_PORT: u16 = 6379;

fn cli(settings: &CollectorSettings, binary: &str) -> CliCommand {
    let target = &settings.target;
    let mut cmd = CliCommand::new(target.binary_or(binary))
        .arg("-h")
        .arg(target.host())
        .arg("-p")
        .arg(target.port_or(DEFAULT_PORT).to_string());
    if let Some(user) = &target.username {
        cmd = cmd.arg("--user").arg(user.clone());
    }
    if let Some(password) = &target.password {
        cmd = cmd.env("REDISCLI_AUTH", password.clone());
    }
    cmd
}

struct InfoProbe {
    cmd: CliCommand,
}

#[async_trait]
impl Probe for InfoProbe {
    fn name(&self) -> &str {
        "info"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let output = self.cmd.clone().arg("INFO").stdout().await?;
        // redis-cli exits 0 even when the server rejects the command.
        if let Some(line) = output.lines().find(|l| l.starts_with("NOAUTH") || l.starts_with("WRONGPASS")) {
            return Err(ProbeError::PermissionDenied(line.trim().to_string()));
        }
        let mut metrics = parse_info(&output)?;
        metrics.insert("up", true);
        Ok(metrics)
    }
}

struct ConfigProbe {
    cmd: CliCommand,
}

#[async_trait]
impl Probe for ConfigProbe {
    fn name(&self) -> &str {
        "config"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let output = self
            .cmd
            .clone()
            .arg("CONFIG")
            .arg("GET")
            .arg("maxmemory")
            .stdout()
            .await?;
        let value = parse_config_get(&output, "maxmemory")?;
        let mut metrics = MetricSet::new();
        metrics.insert("maxmemory_bytes", value);
        Ok(metrics)
    }
}

/// Parses `INFO` output (`key:value` lines grouped under `# Section`
/// headers) into the canonical redis metrics.
pub fn parse_info(output: &str) -> Result<MetricSet, ProbeError> {
    let fields: HashMap<&str, &str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once(':'))
        .collect();

    let version = fields
        .get("redis_version")
        .ok_or_else(|| ProbeError::parse("redis INFO", "missing redis_version"))?;

    let int = |key: &str| -> i64 {
        fields
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
    };

    let mut metrics = MetricSet::new();
    metrics.insert("version", *version);
    metrics.insert("role", fields.get("role").copied().unwrap_or("unknown"));
    metrics.insert("uptime_secs", int("uptime_in_seconds"));
    metrics.insert("connected_clients", int("connected_clients"));
    metrics.insert("blocked_clients", int("blocked_clients"));
    metrics.insert("used_memory_bytes", int("used_memory"));
    metrics.insert("used_memory_peak_bytes", int("used_memory_peak"));
    metrics.insert("ops_per_sec", int("instantaneous_ops_per_sec"));

    let hits = int("keyspace_hits");
    let misses = int("keyspace_misses");
    metrics.insert("keyspace_hits", hits);
    metrics.insert("keyspace_misses", misses);
    let hit_rate = if hits + misses > 0 {
        hits as f64 / (hits + misses) as f64
    } else {
        0.0
    };
    metrics.insert("hit_rate", hit_rate);

    // db0:keys=10,expires=0,avg_ttl=0
    let keys_total: i64 = fields
        .iter()
        .filter(|(k, _)| k.len() > 2 && k.starts_with("db") && k[2..].chars().all(|c| c.is_ascii_digit()))
        .filter_map(|(_, v)| {
            v.split(',')
                .find_map(|kv| kv.strip_prefix("keys="))
                .and_then(|n| n.parse::<i64>().ok())
        })
        .sum();
    metrics.insert("keys_total", keys_total);

    Ok(metrics)
}

/// Parses the two-line answer of `CONFIG GET <name>`.
pub fn parse_config_get(output: &str, name: &str) -> Result<i64, ProbeError> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), lines.next()) {
        (Some(key), Some(value)) if key == name => value
            .parse()
            .map_err(|_| ProbeError::parse("redis CONFIG GET", format!("invalid {name}: {value}"))),
        _ => Err(ProbeError::parse(
            "redis CONFIG GET",
            format!("unexpected answer for {name}"),
        )),
    }
}

pub fn linux(settings: &CollectorSettings) -> Result<Box<dyn Collector>, BuildError> {
    let cmd = cli(settings, "redis-cli");
    let probes: Vec<Box<dyn Probe>> = vec![
        Box::new(InfoProbe { cmd: cmd.clone() }),
        Box::new(ConfigProbe { cmd }),
        Box::new(ProcessProbe::new([settings.target.process_or("redis-server")])),
    ];
    Ok(Box::new(ProbeCollector::new(
        "redis-linux",
        MonitorType::Redis,
        probes,
        settings.timeout,
    )))
}

pub fn windows(settings: &CollectorSettings) -> Result<Box<dyn Collector>, BuildError> {
    let cmd = cli(settings, "redis-cli.exe");
    let probes: Vec<Box<dyn Probe>> = vec![
        Box::new(InfoProbe { cmd }),
        Box::new(ProcessProbe::new([settings.target.process_or("redis-server.exe")])),
    ];
    Ok(Box::new(ProbeCollector::new(
        "redis-windows",
        MonitorType::Redis,
        probes,
        settings.timeout,
    )))
}

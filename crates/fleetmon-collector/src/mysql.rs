//! MySQL / MariaDB through the `mysql` command-line client.

use crate::command::CliCommand;
use crate::probe::{Probe, ProbeCollector};
use crate::process::ProcessProbe;
use crate::registry::{BuildError, CollectorSettings};
use crate::Collector;
use async_trait::async_trait;
use fleetmon_common::error::ProbeError;
use fleetmon_common::types::{MetricSet, MonitorType};
use std::collections::HashMap;

const DEFAULT_PORT: u16 = 3306;

const STATUS_FIELDS: &[(&str, &str)] = &[
    ("Uptime", "uptime_secs"),
    ("Threads_connected", "threads_connected"),
    ("Threads_running", "threads_running"),
    ("Questions", "questions"),
    ("Slow_queries", "slow_queries"),
    ("Aborted_connects", "aborted_connects"),
    ("Bytes_received", "bytes_received"),
    ("Bytes_sent", "bytes_sent"),
];

const VARIABLE_FIELDS: &[(&str, &str)] = &[
    ("max_connections", "max_connections"),
    ("innodb_buffer_pool_size", "innodb_buffer_pool_size_bytes"),
];

/// Variables reported verbatim. `version` is the server's, not the client's.
const VARIABLE_TEXT_FIELDS: &[(&str, &str)] = &[("version", "version")];

const VARIABLES_SQL: &str =
    "SHOW GLOBAL VARIABLES WHERE Variable_name IN ('max_connections','innodb_buffer_pool_size','version')";

/// `mysql` in batch mode (`-N -B`) with the password passed via `MYSQL_PWD`.
fn query(settings: &CollectorSettings, binary: &str, sql: &str) -> CliCommand {
    let target = &settings.target;
    let mut cmd = CliCommand::new(target.binary_or(binary))
        .arg("-h")
        .arg(target.host())
        .arg("-P")
        .arg(target.port_or(DEFAULT_PORT).to_string())
        .arg("-N")
        .arg("-B");
    if let Some(user) = &target.username {
        cmd = cmd.arg("-u").arg(user.clone());
    }
    if let Some(password) = &target.password {
        cmd = cmd.env("MYSQL_PWD", password.clone());
    }
    cmd.arg("-e").arg(sql)
}

/// Runs a `SHOW ...` query and maps selected variables to metric names.
struct ShowProbe {
    name: &'static str,
    cmd: CliCommand,
    fields: &'static [(&'static str, &'static str)],
    text_fields: &'static [(&'static str, &'static str)],
    marks_up: bool,
}

#[async_trait]
impl Probe for ShowProbe {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let output = self.cmd.stdout().await?;
        let rows = parse_tab_rows(&output);
        let mut metrics = map_fields(&rows, self.fields, self.text_fields);
        if metrics.is_empty() {
            return Err(ProbeError::parse(
                self.cmd.display(),
                "none of the expected variables were returned",
            ));
        }
        if self.marks_up {
            metrics.insert("up", true);
        }
        Ok(metrics)
    }
}

/// Parses `Variable_name<TAB>Value` rows.
pub fn parse_tab_rows(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|l| l.split_once('\t'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn map_fields(
    rows: &HashMap<String, String>,
    fields: &[(&str, &str)],
    text_fields: &[(&str, &str)],
) -> MetricSet {
    let mut metrics = MetricSet::new();
    for (variable, metric) in fields {
        if let Some(value) = rows.get(*variable).and_then(|v| v.parse::<i64>().ok()) {
            metrics.insert(*metric, value);
        }
    }
    for (variable, metric) in text_fields {
        if let Some(value) = rows.get(*variable).filter(|v| !v.is_empty()) {
            metrics.insert(*metric, value.as_str());
        }
    }
    metrics
}

fn status_probe(settings: &CollectorSettings, binary: &str) -> Box<dyn Probe> {
    Box::new(ShowProbe {
        name: "status",
        cmd: query(settings, binary, "SHOW GLOBAL STATUS"),
        fields: STATUS_FIELDS,
        text_fields: &[],
        marks_up: true,
    })
}

fn variables_probe(settings: &CollectorSettings, binary: &str) -> Box<dyn Probe> {
    Box::new(ShowProbe {
        name: "variables",
        cmd: query(settings, binary, VARIABLES_SQL),
        fields: VARIABLE_FIELDS,
        text_fields: VARIABLE_TEXT_FIELDS,
        marks_up: false,
    })
}

pub fn linux(settings: &CollectorSettings) -> Result<Box<dyn Collector>, BuildError> {
    let probes: Vec<Box<dyn Probe>> = vec![
        status_probe(settings, "mysql"),
        variables_probe(settings, "mysql"),
        Box::new(ProcessProbe::new([
            settings.target.process_or("mysqld"),
            "mariadbd".to_string(),
        ])),
    ];
    Ok(Box::new(ProbeCollector::new(
        "mysql-linux",
        MonitorType::Mysql,
        probes,
        settings.timeout,
    )))
}

pub fn windows(settings: &CollectorSettings) -> Result<Box<dyn Collector>, BuildError> {
    let probes: Vec<Box<dyn Probe>> = vec![
        status_probe(settings, "mysql.exe"),
        variables_probe(settings, "mysql.exe"),
        Box::new(ProcessProbe::new([settings.target.process_or("mysqld.exe")])),
    ];
    Ok(Box::new(ProbeCollector::new(
        "mysql-windows",
        MonitorType::Mysql,
        probes,
        settings.timeout,
    )))
}

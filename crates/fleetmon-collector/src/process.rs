//! OS process inspection probe.

use crate::probe::Probe;
use async_trait::async_trait;
use fleetmon_common::error::ProbeError;
use fleetmon_common::types::MetricSet;
use std::sync::{Arc, Mutex, PoisonError};
use sysinfo::{Process, ProcessesToUpdate, System};

/// Linux truncates the kernel process name to this many bytes.
const COMM_LEN: usize = 15;

/// Aggregates every running process whose name matches one of `names`.
///
/// Matching ignores ASCII case and a trailing `.exe`, so `"nginx"` also
/// finds `nginx.exe` on Windows. The executable file name is checked as well,
/// which covers names longer than the kernel keeps.
///
/// The `System` is kept between runs: CPU usage is a delta between two
/// refreshes, so the first run always reports 0.
pub struct ProcessProbe {
    names: Vec<String>,
    system: Arc<Mutex<System>>,
}

impl ProcessProbe {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(|n| normalize(&n.into())).collect(),
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

fn normalize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    lower
        .strip_suffix(".exe")
        .map(str::to_string)
        .unwrap_or(lower)
}

/// Totals over the matched processes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessStats {
    pub count: usize,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub uptime_secs: u64,
}

impl ProcessStats {
    pub fn into_metrics(self) -> MetricSet {
        let mut set = MetricSet::new();
        set.insert("process_count", self.count);
        set.insert("cpu_percent", self.cpu_percent);
        set.insert("memory_bytes", self.memory_bytes);
        set.insert("process_uptime_secs", self.uptime_secs);
        set
    }
}

fn matches(target: &str, name: &str, exe: Option<&str>) -> bool {
    target == name
        || exe == Some(target)
        || (name.len() == COMM_LEN && target.len() > COMM_LEN && target.starts_with(name))
}

fn is_wanted(names: &[String], process: &Process) -> bool {
    let name = normalize(&process.name().to_string_lossy());
    let exe = process
        .exe()
        .and_then(|path| path.file_name())
        .map(|file| normalize(&file.to_string_lossy()));
    names
        .iter()
        .any(|target| matches(target, &name, exe.as_deref()))
}

fn scan(system: &mut System, names: &[String]) -> ProcessStats {
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut stats = ProcessStats::default();
    for process in system.processes().values() {
        if !is_wanted(names, process) {
            continue;
        }
        stats.count += 1;
        stats.cpu_percent += f64::from(process.cpu_usage());
        stats.memory_bytes += process.memory();
        stats.uptime_secs = stats.uptime_secs.max(process.run_time());
    }
    stats
}

#[async_trait]
impl Probe for ProcessProbe {
    fn name(&self) -> &str {
        "process"
    }

    async fn run(&self) -> Result<MetricSet, ProbeError> {
        let names = self.names.clone();
        let system = Arc::clone(&self.system);
        let stats = tokio::task::spawn_blocking(move || {
            let mut system = system.lock().unwrap_or_else(PoisonError::into_inner);
            scan(&mut system, &names)
        })
            .await
            .map_err(|e| ProbeError::Unreachable(format!("process scan aborted: {e}")))?;

        if stats.count == 0 {
            return Err(ProbeError::Unreachable(format!(
                "no running process named {}",
                self.names.join(" or ")
            )));
        }
        Ok(stats.into_metrics())
    }
}

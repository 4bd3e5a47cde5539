use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind of subsystem an agent observes.
///
/// # Examples
///
/// ```
/// use fleetmon_common::types::MonitorType;
///
/// let kind: MonitorType = "rabbitmq".parse().unwrap();
/// assert_eq!(kind, MonitorType::Rabbitmq);
/// assert_eq!(kind.to_string(), "rabbitmq");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    Nginx,
    Redis,
    Mysql,
    Rabbitmq,
    Vmware,
    Apm,
}

impl MonitorType {
    pub const ALL: [MonitorType; 6] = [
        MonitorType::Nginx,
        MonitorType::Redis,
        MonitorType::Mysql,
        MonitorType::Rabbitmq,
        MonitorType::Vmware,
        MonitorType::Apm,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            MonitorType::Nginx => "nginx",
            MonitorType::Redis => "redis",
            MonitorType::Mysql => "mysql",
            MonitorType::Rabbitmq => "rabbitmq",
            MonitorType::Vmware => "vmware",
            MonitorType::Apm => "apm",
        }
    }
}

impl std::fmt::Display for MonitorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MonitorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nginx" => Ok(MonitorType::Nginx),
            "redis" => Ok(MonitorType::Redis),
            "mysql" => Ok(MonitorType::Mysql),
            "rabbitmq" => Ok(MonitorType::Rabbitmq),
            "vmware" => Ok(MonitorType::Vmware),
            "apm" => Ok(MonitorType::Apm),
            _ => Err(format!("unknown monitor type: {s}")),
        }
    }
}

/// A single metric value.
///
/// Serialized untagged so a [`MetricSet`] renders as a plain JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<MetricValue>),
    Set(MetricSet),
}

impl MetricValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetricValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of integer and float values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Int(i64::from(v))
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        MetricValue::Int(i64::from(v))
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        MetricValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Float(f64::from(v))
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Str(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Str(v)
    }
}

impl From<Vec<MetricValue>> for MetricValue {
    fn from(v: Vec<MetricValue>) -> Self {
        MetricValue::List(v)
    }
}

impl From<MetricSet> for MetricValue {
    fn from(v: MetricSet) -> Self {
        MetricValue::Set(v)
    }
}

/// Canonical snapshot of one monitor type: metric name to value.
///
/// Keys are unique and their order carries no meaning; storage is ordered so
/// that serialized snapshots are stable.
///
/// # Examples
///
/// ```
/// use fleetmon_common::types::MetricSet;
///
/// let mut base = MetricSet::new();
/// base.insert("active_connections", 0);
/// base.insert("version", "unknown");
///
/// let mut live = MetricSet::new();
/// live.insert("active_connections", 12);
///
/// assert_eq!(live.missing_from(&base), vec!["version".to_string()]);
/// base.merge(live);
/// assert_eq!(base.get("active_connections").and_then(|v| v.as_i64()), Some(12));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSet(BTreeMap<String, MetricValue>);

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a metric, returning the previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<MetricValue>,
    ) -> Option<MetricValue> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.0.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merges `other` into `self`; values from `other` win on key collision.
    pub fn merge(&mut self, other: MetricSet) {
        self.0.extend(other.0);
    }

    /// Keys present in `canonical` but absent from `self`.
    pub fn missing_from(&self, canonical: &MetricSet) -> Vec<String> {
        canonical
            .0
            .keys()
            .filter(|k| !self.0.contains_key(k.as_str()))
            .cloned()
            .collect()
    }

    /// True when every key of `canonical` is present in `self`.
    pub fn covers(&self, canonical: &MetricSet) -> bool {
        canonical.0.keys().all(|k| self.0.contains_key(k))
    }
}

impl<K: Into<String>, V: Into<MetricValue>> FromIterator<(K, V)> for MetricSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for MetricSet {
    type Item = (String, MetricValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, MetricValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A probe failure attributed to the sub-probe that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceError {
    pub source: String,
    pub error: ProbeError,
}

/// Result of one collection tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionOutcome {
    pub metrics: MetricSet,
    /// One entry per failed sub-probe.
    pub errors: Vec<SourceError>,
    /// Number of sub-probes that were run.
    pub attempted: usize,
    /// The baseline snapshot replaced the collected metrics.
    pub fallback: bool,
    /// Canonical keys filled in from the baseline.
    pub backfilled: Vec<String>,
}

impl CollectionOutcome {
    /// An outcome that carries `metrics` as-is with no probe accounting.
    pub fn from_metrics(metrics: MetricSet) -> Self {
        Self {
            metrics,
            ..Self::default()
        }
    }

    pub fn record_error(&mut self, source: impl Into<String>, error: ProbeError) {
        self.errors.push(SourceError {
            source: source.into(),
            error,
        });
    }

    /// True when probes ran and every one of them failed.
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.errors.len() >= self.attempted
    }
}

/// Who this agent is. Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    id: String,
    monitor_type: MonitorType,
    display_name: String,
    version: String,
}

impl AgentIdentity {
    pub fn new(
        id: impl Into<String>,
        monitor_type: MonitorType,
        display_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            monitor_type,
            display_name: display_name.into(),
            version: version.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn monitor_type(&self) -> MonitorType {
        self.monitor_type
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

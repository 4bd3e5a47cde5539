//! JSON payloads exchanged with the collection service.

use crate::types::{AgentIdentity, MetricSet, MonitorType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /register`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub monitor_type: MonitorType,
    pub name: String,
    pub version: String,
}

impl From<&AgentIdentity> for RegisterRequest {
    fn from(identity: &AgentIdentity) -> Self {
        Self {
            id: identity.id().to_string(),
            monitor_type: identity.monitor_type(),
            name: identity.display_name().to_string(),
            version: identity.version().to_string(),
        }
    }
}

/// Response of `POST /register`. The server answers with either a session
/// token or a bare acknowledgement. `ack` is kept as raw JSON since servers
/// disagree on its shape (`true`, `"ok"`, an object).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(default, alias = "session_token", skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<serde_json::Value>,
}

/// Body of `POST /metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: MetricSet,
}

/// Body of `POST /heartbeat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_uses_type_field() {
        let identity = AgentIdentity::new("nginx-web01", MonitorType::Nginx, "web01", "0.1.0");
        let json = serde_json::to_value(RegisterRequest::from(&identity)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "nginx-web01",
                "type": "nginx",
                "name": "web01",
                "version": "0.1.0"
            })
        );
    }

    #[test]
    fn test_register_response_accepts_either_shape() {
        let token: RegisterResponse =
            serde_json::from_str(r#"{"sessionToken":"abc"}"#).unwrap();
        assert_eq!(token.session_token.as_deref(), Some("abc"));

        let snake: RegisterResponse =
            serde_json::from_str(r#"{"session_token":"abc"}"#).unwrap();
        assert_eq!(snake.session_token.as_deref(), Some("abc"));

        let ack: RegisterResponse = serde_json::from_str(r#"{"ack":true}"#).unwrap();
        assert_eq!(ack.ack, Some(serde_json::json!(true)));
        assert!(ack.session_token.is_none());

        let text: RegisterResponse =
            serde_json::from_str(r#"{"ack":"ok","sessionToken":"xyz"}"#).unwrap();
        assert_eq!(text.ack, Some(serde_json::json!("ok")));
        assert_eq!(text.session_token.as_deref(), Some("xyz"));

        let object: RegisterResponse = serde_json::from_str(r#"{"ack":{"at":1}}"#).unwrap();
        assert!(object.ack.is_some());
    }

    #[test]
    fn test_metrics_report_field_names() {
        let mut metrics = MetricSet::new();
        metrics.insert("connected_clients", 4);
        let report = MetricsReport {
            agent_id: "redis-cache01".to_string(),
            timestamp: Utc::now(),
            metrics,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["agentId"], "redis-cache01");
        assert_eq!(json["metrics"]["connected_clients"], 4);
        assert!(json["timestamp"].is_string());
    }
}

//! Transport to the central collection service.

use crate::config::AgentConfig;
use crate::error::{RegistrationError, TransmissionError};
use async_trait::async_trait;
use chrono::Utc;
use fleetmon_common::types::{AgentIdentity, MetricSet};
use fleetmon_common::wire::{Heartbeat, MetricsReport, RegisterRequest, RegisterResponse};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MAX_ERROR_BODY: usize = 256;

/// Session with the collection service.
///
/// Registration happens once at startup. Failed submissions are not retried
/// by the reporter and never trigger a new registration.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Performs the registration handshake.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] when the service cannot be reached,
    /// rejects the identity, or `cancel` fires first.
    async fn register(
        &mut self,
        identity: &AgentIdentity,
        cancel: &CancellationToken,
    ) -> Result<RegisterResponse, RegistrationError>;

    /// Standalone liveness signal.
    async fn heartbeat(&mut self, cancel: &CancellationToken) -> Result<(), TransmissionError>;

    /// Submits one snapshot.
    async fn send(
        &mut self,
        metrics: MetricSet,
        cancel: &CancellationToken,
    ) -> Result<(), TransmissionError>;

    /// Drops the session. Later calls fail with `Closed`.
    async fn close(&mut self);
}

/// JSON-over-HTTP reporter.
///
/// The bearer credential is the API key until registration returns a session
/// token, which then replaces it.
pub struct HttpReporter {
    client: Option<Client>,
    endpoint: String,
    api_key: String,
    session_token: Option<String>,
    agent_id: Option<String>,
    register_attempts: u32,
    register_backoff: Duration,
}

impl HttpReporter {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().use_rustls_tls().timeout(timeout).build()?;
        Ok(Self {
            client: Some(client),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            session_token: None,
            agent_id: None,
            register_attempts: 1,
            register_backoff: Duration::ZERO,
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(config.endpoint(), config.server.api_key.clone(), config.timeout())?
            .with_registration_policy(config.server.register_attempts, config.register_backoff()))
    }

    /// Up to `attempts` registration tries, `backoff` apart.
    pub fn with_registration_policy(mut self, attempts: u32, backoff: Duration) -> Self {
        self.register_attempts = attempts.max(1);
        self.register_backoff = backoff;
        self
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    fn bearer(&self) -> &str {
        self.session_token.as_deref().unwrap_or(&self.api_key)
    }

    async fn register_once(
        &self,
        request: &RegisterRequest,
    ) -> Result<RegisterResponse, RegistrationError> {
        let client = self.client.as_ref().ok_or(RegistrationError::Closed)?;
        let url = format!("{}/register", self.endpoint);
        let response = client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RegistrationError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }
        // A bare 2xx with no body is a valid acknowledgement.
        if body.trim().is_empty() {
            return Ok(RegisterResponse::default());
        }
        serde_json::from_str(&body).map_err(|e| RegistrationError::Decode(e.to_string()))
    }

    async fn post<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
        cancel: &CancellationToken,
    ) -> Result<(), TransmissionError> {
        let client = self.client.as_ref().ok_or(TransmissionError::Closed)?;
        let url = format!("{}/{path}", self.endpoint);
        let request = client.post(&url).bearer_auth(self.bearer()).json(body);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransmissionError::Cancelled),
            res = request.send() => res?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransmissionError::Status {
            status: status.as_u16(),
            body: truncate(body),
        })
    }

    fn agent_id(&self) -> Result<String, TransmissionError> {
        if self.client.is_none() {
            return Err(TransmissionError::Closed);
        }
        self.agent_id.clone().ok_or(TransmissionError::NotRegistered)
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn register(
        &mut self,
        identity: &AgentIdentity,
        cancel: &CancellationToken,
    ) -> Result<RegisterResponse, RegistrationError> {
        let request = RegisterRequest::from(identity);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RegistrationError::Cancelled),
                res = self.register_once(&request) => res,
            };

            let err = match result {
                Ok(response) => {
                    if let Some(token) = &response.session_token {
                        self.session_token = Some(token.clone());
                    }
                    self.agent_id = Some(identity.id().to_string());
                    tracing::info!(
                        agent_id = identity.id(),
                        attempt,
                        session = response.session_token.is_some(),
                        "Registered with collection service"
                    );
                    return Ok(response);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                tracing::error!(agent_id = identity.id(), error = %err, "Registration failed");
                return Err(err);
            }
            if attempt >= self.register_attempts {
                tracing::error!(
                    agent_id = identity.id(),
                    attempts = attempt,
                    error = %err,
                    "Registration failed, giving up"
                );
                return Err(RegistrationError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            tracing::warn!(
                attempt,
                max_attempts = self.register_attempts,
                backoff_secs = self.register_backoff.as_secs_f64(),
                error = %err,
                "Registration attempt failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RegistrationError::Cancelled),
                _ = tokio::time::sleep(self.register_backoff) => {}
            }
        }
    }

    async fn heartbeat(&mut self, cancel: &CancellationToken) -> Result<(), TransmissionError> {
        let beat = Heartbeat {
            agent_id: self.agent_id()?,
            timestamp: Utc::now(),
        };
        self.post("heartbeat", &beat, cancel).await?;
        tracing::debug!("Heartbeat sent");
        Ok(())
    }

    async fn send(
        &mut self,
        metrics: MetricSet,
        cancel: &CancellationToken,
    ) -> Result<(), TransmissionError> {
        let count = metrics.len();
        let report = MetricsReport {
            agent_id: self.agent_id()?,
            timestamp: Utc::now(),
            metrics,
        };
        self.post("metrics", &report, cancel).await?;
        tracing::debug!(count, "Metrics reported");
        Ok(())
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            self.session_token = None;
            tracing::debug!("Reporter closed");
        }
    }
}

fn truncate(mut body: String) -> String {
    if let Some((idx, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
        body.truncate(idx);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let status = |status| RegistrationError::Status {
            status,
            body: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!RegistrationError::Decode("eof".into()).is_retryable());
        assert!(!RegistrationError::Cancelled.is_retryable());
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let long = "é".repeat(MAX_ERROR_BODY + 10);
        assert_eq!(truncate(long).chars().count(), MAX_ERROR_BODY);
        assert_eq!(truncate("short".into()), "short");
    }

    #[tokio::test]
    async fn test_send_requires_registration_and_open_session() {
        let mut reporter =
            HttpReporter::new("http://127.0.0.1:9", "key", Duration::from_secs(1)).unwrap();
        let cancel = CancellationToken::new();
        assert!(matches!(
            reporter.send(MetricSet::new(), &cancel).await,
            Err(TransmissionError::NotRegistered)
        ));
        reporter.close().await;
        assert!(matches!(
            reporter.heartbeat(&cancel).await,
            Err(TransmissionError::Closed)
        ));
    }
}

//! HTTP helpers shared by management-API probes.

use crate::registry::TargetConfig;
use fleetmon_common::error::ProbeError;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Builds the client a collector owns for the lifetime of the agent.
pub fn build_client(timeout: Duration, target: &TargetConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .danger_accept_invalid_certs(target.accept_invalid_certs)
        .build()
}

/// Sends `request` and returns the body of a 2xx response.
pub async fn fetch_text(request: RequestBuilder, url: &str) -> Result<String, ProbeError> {
    let response = request.send().await.map_err(|e| classify(&e, url))?;
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ProbeError::PermissionDenied(format!("{url} answered {status}")));
    }
    if !status.is_success() {
        return Err(ProbeError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|e| classify(&e, url))
}

/// Sends `request` and decodes the JSON body of a 2xx response.
pub async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder, url: &str) -> Result<T, ProbeError> {
    let body = fetch_text(request, url).await?;
    serde_json::from_str(&body).map_err(|e| ProbeError::parse(url, e.to_string()))
}

/// GET `url`, with basic auth when the target carries credentials.
pub fn get(client: &Client, url: &str, target: &TargetConfig) -> RequestBuilder {
    let request = client.get(url);
    match target.credentials() {
        Some((user, pass)) => request.basic_auth(user, Some(pass)),
        None => request,
    }
}

fn classify(err: &reqwest::Error, url: &str) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Unreachable(format!("{url}: request timed out"))
    } else if err.is_decode() || err.is_body() {
        ProbeError::parse(url, err.to_string())
    } else {
        ProbeError::Unreachable(format!("{url}: {err}"))
    }
}

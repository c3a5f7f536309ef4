//! API client for communicating with the idle-scanner daemon

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the scanner daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        // Scans can run for minutes on large tenants
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }

    /// Make a DELETE request
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .delete(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }

    /// GET a probe endpoint that answers 503 with a JSON body when failing
    pub async fn probe<T: DeserializeOwned>(&self, path: &str) -> Result<(bool, T)> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let response = if status == StatusCode::SERVICE_UNAVAILABLE {
            response
        } else {
            check(response).await?
        };
        let body = response.json().await.context("Failed to parse response")?;
        Ok((status.is_success(), body))
    }
}

/// Turn a non-success response into an error carrying the daemon's message
async fn check(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    anyhow::bail!("API error ({}): {}", status, message);
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    check(response)
        .await?
        .json()
        .await
        .context("Failed to parse response")
}

// API request and response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanBody {
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_days: Option<u32>,
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleVerdict {
    pub resource_id: String,
    pub display_name: String,
    pub region: String,
    pub is_idle: bool,
    pub reasons: Vec<String>,
    #[serde(default)]
    pub signals: Vec<String>,
    pub evaluated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFailure {
    pub region: String,
    pub resource_id: Option<String>,
    pub stage: String,
    pub error: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub tenant_id: String,
    pub verdicts: Vec<IdleVerdict>,
    #[serde(default)]
    pub failures: Vec<ScanFailure>,
    pub success_count: usize,
    pub failure_count: usize,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSummary {
    pub tenant_id: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub tenant_id: String,
    pub resource_class: String,
    pub present: bool,
    pub fresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_post_sends_json_and_parses_report() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/scans")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "tenant_id": "acme",
                "force_refresh": true
            })))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"tenant_id":"acme","verdicts":[],"failures":[],
                    "success_count":0,"failure_count":0,"from_cache":false}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let body = ScanBody {
            tenant_id: "acme".to_string(),
            window_days: None,
            force_refresh: true,
        };
        let report: ScanReport = client.post("api/v1/scans", &body).await.unwrap();

        assert_eq!(report.tenant_id, "acme");
        assert!(!report.from_cache);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/cache/nobody")
            .with_status(404)
            .with_body(r#"{"error":"unknown tenant: nobody"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .get::<CacheStatus>("api/v1/cache/nobody")
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("404"));
        assert!(message.contains("unknown tenant: nobody"));
    }

    #[tokio::test]
    async fn test_probe_accepts_unavailable_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/readyz")
            .with_status(503)
            .with_body(r#"{"ready":false,"reason":"Critical component unhealthy"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let (ok, readiness): (bool, ReadinessResponse) = client.probe("readyz").await.unwrap();

        assert!(!ok);
        assert!(!readiness.ready);
    }

    #[tokio::test]
    async fn test_delete_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/api/v1/cache/acme")
            .with_body(
                r#"{"tenant_id":"acme","resource_class":"compute_instance",
                    "present":false,"fresh":false,"ttl_secs":3600}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status: CacheStatus = client.delete("api/v1/cache/acme").await.unwrap();

        assert!(!status.present);
        mock.assert_async().await;
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url").is_err());
    }
}

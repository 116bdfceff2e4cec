//! Probe executor — runs one check against its connection.
//!
//! Stateless: the only field is a `reqwest::Client`, which is cheap to
//! clone and safe to share across concurrent probes. Every status code is
//! an outcome to classify; nothing the target does turns into an `Err`.
//!
//! The check's `timeout_ms` is applied once, as the per-request transport
//! timeout, and the same value is the TIMEOUT classification boundary.

pub mod classifier;

use anyhow::{Context, Result};
use chrono::Utc;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::build_auth_headers;
use crate::model::{CheckConfig, CheckMetadata, CheckResult, Connection, Credentials};
use classifier::{classify_response, classify_transport, Classification};

const REDACTED: &str = "[REDACTED]";

#[derive(Clone, Default)]
pub struct ProbeExecutor {
    client: reqwest::Client,
}

impl ProbeExecutor {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Compose the probe URL: base without its trailing slash, endpoint
    /// with a leading slash, then the query params in key order.
    pub fn build_url(
        base_url: &str,
        endpoint: &str,
        query: &BTreeMap<String, String>,
    ) -> Result<Url> {
        let base = base_url.strip_suffix('/').unwrap_or(base_url);
        let joined = if endpoint.starts_with('/') {
            format!("{base}{endpoint}")
        } else {
            format!("{base}/{endpoint}")
        };

        let mut url = Url::parse(&joined).with_context(|| format!("invalid URL '{joined}'"))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Custom headers first, then auth headers on top (auth wins).
    fn build_headers(check: &CheckConfig, auth: HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &check.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => warn!(check_id = %check.id, header = %name, "Skipping invalid custom header"),
            }
        }
        for (name, value) in auth.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if check.method.carries_body() && check.body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        headers
    }

    /// Execute one check. Always returns a result; never an error.
    pub async fn execute(
        &self,
        check: &CheckConfig,
        connection: &Connection,
        creds: &Credentials,
    ) -> CheckResult {
        let started_at = Utc::now();
        let timeout = Duration::from_millis(check.timeout_ms);

        let mut metadata = CheckMetadata {
            method: check.method.as_str().to_string(),
            started_at: Some(started_at),
            ..Default::default()
        };

        let url = match Self::build_url(&connection.base_url, &check.endpoint, &check.query_params) {
            Ok(url) => url,
            Err(e) => {
                let message = format!("{e:#}");
                metadata.url = format!("{}{}", connection.base_url, check.endpoint);
                metadata.error_detail = Some(message.clone());
                return finish(check, classify_transport(false, &message), 0, None, metadata);
            }
        };
        metadata.url = url.to_string();

        let headers = Self::build_headers(check, build_auth_headers(connection.provider, creds));
        metadata.request_headers = header_snapshot(&headers);

        let mut request = self
            .client
            .request(check.method.to_reqwest(), url)
            .timeout(timeout)
            .headers(headers);
        if check.method.carries_body() {
            if let Some(body) = &check.body {
                request = request.json(body);
            }
        }

        let start = Instant::now();
        match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                metadata.response_headers = header_snapshot(resp.headers());

                match resp.bytes().await {
                    Ok(body) => metadata.response_size = Some(body.len() as u64),
                    Err(e) => metadata.error_detail = Some(error_chain(e)),
                }
                let elapsed = start.elapsed();

                let classification = classify_response(
                    status.as_u16(),
                    status.canonical_reason(),
                    elapsed,
                    check.expected_status,
                    timeout,
                );
                finish(check, classification, elapsed_ms(elapsed), Some(status.as_u16()), metadata)
            }
            Err(e) => {
                let elapsed = start.elapsed();
                let is_timeout = e.is_timeout();
                let detail = error_chain(e);
                metadata.error_detail = Some(detail.clone());
                finish(
                    check,
                    classify_transport(is_timeout, &detail),
                    elapsed_ms(elapsed),
                    None,
                    metadata,
                )
            }
        }
    }
}

fn finish(
    check: &CheckConfig,
    classification: Classification,
    response_time_ms: u64,
    status_code: Option<u16>,
    metadata: CheckMetadata,
) -> CheckResult {
    debug!(
        check_id = %check.id,
        status = classification.status.as_str(),
        status_code = ?status_code,
        response_time_ms,
        "Probe complete"
    );
    CheckResult {
        id: Uuid::new_v4(),
        check_id: check.id.clone(),
        status: classification.status,
        response_time_ms,
        status_code,
        error_message: classification.error_message,
        metadata,
        created_at: Utc::now(),
    }
}

fn elapsed_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Lowercased header snapshot; sensitive values are redacted.
fn header_snapshot(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let v = if value.is_sensitive() {
                REDACTED.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), v)
        })
        .collect()
}

/// reqwest's top-level message hides the cause; render the whole chain.
fn error_chain(e: reqwest::Error) -> String {
    format!("{:#}", anyhow::Error::from(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CheckStatus, EncryptedCredentials, HttpMethod, Provider};
    use crate::testutil::{closed_port_url, stub_server, StubResponse};

    fn check(method: HttpMethod, timeout_ms: u64) -> CheckConfig {
        CheckConfig {
            id: "chk-1".into(),
            connection_id: "conn-1".into(),
            endpoint: "health".into(),
            method,
            expected_status: 200,
            timeout_ms,
            interval_secs: 60,
            headers: BTreeMap::new(),
            body: None,
            query_params: BTreeMap::new(),
            is_active: true,
            last_executed_at: None,
        }
    }

    fn connection(base_url: &str, provider: Provider) -> Connection {
        Connection {
            id: "conn-1".into(),
            name: "Target".into(),
            provider,
            base_url: base_url.to_string(),
            credentials: EncryptedCredentials::default(),
            is_active: true,
        }
    }

    fn api_key(key: &str) -> Credentials {
        Credentials {
            api_key: Some(key.to_string()),
            token: None,
            account_sid: None,
            auth_token: None,
        }
    }

    #[test]
    fn test_build_url_normalizes_slashes_and_query() {
        let mut query = BTreeMap::new();
        query.insert("b".to_string(), "2".to_string());
        query.insert("a".to_string(), "1".to_string());
        let url = ProbeExecutor::build_url("https://api.example.com/", "health", &query).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/health?a=1&b=2");

        let url =
            ProbeExecutor::build_url("https://api.example.com/v1", "/status", &BTreeMap::new())
                .unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/status");
    }

    #[test]
    fn test_build_url_encodes_query_values() {
        let mut query = BTreeMap::new();
        query.insert("q".to_string(), "a b&c".to_string());
        let url = ProbeExecutor::build_url("https://api.example.com", "/search", &query).unwrap();
        assert_eq!(url.query(), Some("q=a+b%26c"));
    }

    #[tokio::test]
    async fn test_success_with_auth_winning_over_custom_header() {
        let server = stub_server(vec![StubResponse::new(200, "OK", r#"{"ok":true}"#)]).await;
        let mut chk = check(HttpMethod::Get, 5000);
        chk.headers.insert("Authorization".into(), "Bearer custom".into());
        chk.headers.insert("X-Trace".into(), "abc".into());

        let result = ProbeExecutor::new()
            .execute(&chk, &connection(&server.base_url, Provider::Stripe), &api_key("sk_x"))
            .await;

        assert_eq!(result.status, CheckStatus::Success);
        assert_eq!(result.status_code, Some(200));
        assert!(result.error_message.is_none());
        assert_eq!(result.check_id, "chk-1");
        assert_eq!(result.metadata.response_size, Some(11));
        assert_eq!(result.metadata.response_headers.get("x-stub").map(String::as_str), Some("1"));
        assert_eq!(
            result.metadata.request_headers.get("authorization").map(String::as_str),
            Some(REDACTED)
        );
        assert_eq!(result.metadata.url, format!("{}/health", server.base_url));

        let raw = server.request(0).to_lowercase();
        assert!(raw.starts_with("get /health http/1.1"));
        assert!(raw.contains("authorization: bearer sk_x"));
        assert!(!raw.contains("bearer custom"));
        assert!(raw.contains("x-trace: abc"));
    }

    #[tokio::test]
    async fn test_injected_client_is_used() {
        let server = stub_server(vec![StubResponse::new(200, "OK", "{}")]).await;
        let client = reqwest::Client::builder().user_agent("apiwatch-test/1").build().unwrap();

        let r = ProbeExecutor::with_client(client)
            .execute(
                &check(HttpMethod::Get, 5000),
                &connection(&server.base_url, Provider::Generic),
                &Credentials::default(),
            )
            .await;

        assert_eq!(r.status, CheckStatus::Success);
        assert!(server.request(0).to_lowercase().contains("user-agent: apiwatch-test/1"));
    }

    #[tokio::test]
    async fn test_client_and_server_errors_are_classified() {
        let server = stub_server(vec![
            StubResponse::new(404, "Not Found", ""),
            StubResponse::new(503, "Service Unavailable", ""),
        ])
        .await;
        let conn = connection(&server.base_url, Provider::Generic);
        let creds = Credentials::default();
        let executor = ProbeExecutor::new();

        let r = executor.execute(&check(HttpMethod::Get, 5000), &conn, &creds).await;
        assert_eq!(r.status, CheckStatus::Failure);
        assert_eq!(r.status_code, Some(404));
        assert_eq!(r.error_message.as_deref(), Some("Unexpected status: 404 Not Found"));

        let r = executor.execute(&check(HttpMethod::Get, 5000), &conn, &creds).await;
        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.error_message.as_deref(), Some("Server error: 503 Service Unavailable"));
    }

    #[tokio::test]
    async fn test_post_body_sent_as_json() {
        let server = stub_server(vec![StubResponse::new(201, "Created", "{}")]).await;
        let mut chk = check(HttpMethod::Post, 5000);
        chk.expected_status = 201;
        chk.body = Some(serde_json::json!({"ping": "pong"}));

        let r = ProbeExecutor::new()
            .execute(&chk, &connection(&server.base_url, Provider::Generic), &Credentials::default())
            .await;

        assert_eq!(r.status, CheckStatus::Success);
        let raw = server.request(0);
        assert!(raw.starts_with("POST /health"));
        assert!(raw.to_lowercase().contains("content-type: application/json"));
        assert!(raw.ends_with(r#"{"ping":"pong"}"#));
    }

    #[tokio::test]
    async fn test_slow_target_is_timeout() {
        let server = stub_server(vec![
            StubResponse::new(200, "OK", "{}").delayed(Duration::from_millis(1500)),
        ])
        .await;

        let r = ProbeExecutor::new()
            .execute(
                &check(HttpMethod::Get, 200),
                &connection(&server.base_url, Provider::Generic),
                &Credentials::default(),
            )
            .await;

        assert_eq!(r.status, CheckStatus::Timeout);
        assert_eq!(r.status_code, None);
        assert_eq!(r.error_message.as_deref(), Some(classifier::TIMEOUT_MESSAGE));
        assert!(r.response_time_ms >= 200);
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let base = closed_port_url().await;
        let r = ProbeExecutor::new()
            .execute(
                &check(HttpMethod::Get, 2000),
                &connection(&base, Provider::Generic),
                &Credentials::default(),
            )
            .await;

        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.status_code, None);
        assert!(r.error_message.is_some());
        // the cause below reqwest's own message is kept
        let detail = r.metadata.error_detail.unwrap();
        assert!(detail.starts_with("error sending request"), "{detail}");
        assert!(detail.contains(": "), "{detail}");
    }

    #[tokio::test]
    async fn test_invalid_base_url_is_error_result() {
        let r = ProbeExecutor::new()
            .execute(
                &check(HttpMethod::Get, 2000),
                &connection("not a url", Provider::Generic),
                &Credentials::default(),
            )
            .await;
        assert_eq!(r.status, CheckStatus::Error);
        assert!(r.error_message.unwrap().contains("invalid URL"));
    }
}

//! Core data model: connections, check configurations and check results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::MonitorError;

// ── Providers ───────────────────────────────────────────────────────

/// The closed set of providers a connection can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Stripe,
    Twilio,
    Sendgrid,
    Github,
    Slack,
    #[serde(other)]
    Generic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::Twilio => "twilio",
            Provider::Sendgrid => "sendgrid",
            Provider::Github => "github",
            Provider::Slack => "slack",
            Provider::Generic => "generic",
        }
    }

    /// Parse a stored provider name. Anything unrecognized is `Generic`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Provider::Stripe,
            "twilio" => Provider::Twilio,
            "sendgrid" => Provider::Sendgrid,
            "github" => Provider::Github,
            "slack" => Provider::Slack,
            _ => Provider::Generic,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Credentials ─────────────────────────────────────────────────────

/// Decrypted credentials. Lives only for the duration of one call and is
/// zeroized on drop.
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |v: &Option<String>| if v.is_some() { "<redacted>" } else { "<none>" };
        f.debug_struct("Credentials")
            .field("api_key", &mark(&self.api_key))
            .field("token", &mark(&self.token))
            .field("account_sid", &mark(&self.account_sid))
            .field("auth_token", &mark(&self.auth_token))
            .finish()
    }
}

/// Credentials as stored: every present field is vault ciphertext.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedCredentials {
    pub api_key: Option<String>,
    pub token: Option<String>,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
}

// ── Connection ──────────────────────────────────────────────────────

/// A tenant-owned target API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub provider: Provider,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub credentials: EncryptedCredentials,
    pub is_active: bool,
}

// ── Check configuration ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    /// Only POST, PUT and PATCH carry a request body.
    pub fn carries_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Subscription tier; bounds the minimum check interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Pro,
    Enterprise,
}

impl PlanTier {
    pub fn min_interval_secs(&self) -> u64 {
        match self {
            PlanTier::Free => 300,
            PlanTier::Pro => 60,
            PlanTier::Enterprise => 30,
        }
    }
}

pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// One monitored endpoint on a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConfig {
    pub id: String,
    pub connection_id: String,
    pub endpoint: String,
    pub method: HttpMethod,
    pub expected_status: u16,
    pub timeout_ms: u64,
    pub interval_secs: u64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    pub is_active: bool,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl CheckConfig {
    /// Validate the configuration against the owner's plan tier.
    pub fn validate(&self, tier: PlanTier) -> Result<(), MonitorError> {
        if !(100..=599).contains(&self.expected_status) {
            return Err(MonitorError::InvalidConfig(format!(
                "expected status {} is outside 100-599",
                self.expected_status
            )));
        }
        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(MonitorError::InvalidConfig(format!(
                "timeout {}ms is outside 1-{}ms",
                self.timeout_ms, MAX_TIMEOUT_MS
            )));
        }
        if self.interval_secs < tier.min_interval_secs() {
            return Err(MonitorError::InvalidConfig(format!(
                "interval {}s is below the {:?} plan minimum of {}s",
                self.interval_secs,
                tier,
                tier.min_interval_secs()
            )));
        }
        if self.body.is_some() && !self.method.carries_body() {
            return Err(MonitorError::InvalidConfig(format!(
                "{} checks cannot carry a body",
                self.method.as_str()
            )));
        }
        Ok(())
    }

    /// Whether the check's own interval has elapsed at `now`.
    pub fn interval_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_executed_at {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.interval_secs as i64,
        }
    }
}

// ── Check result ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Success,
    Failure,
    Timeout,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Success => "SUCCESS",
            CheckStatus::Failure => "FAILURE",
            CheckStatus::Timeout => "TIMEOUT",
            CheckStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(CheckStatus::Success),
            "FAILURE" => Some(CheckStatus::Failure),
            "TIMEOUT" => Some(CheckStatus::Timeout),
            "ERROR" => Some(CheckStatus::Error),
            _ => None,
        }
    }
}

/// Request/response detail captured alongside a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckMetadata {
    pub url: String,
    pub method: String,
    /// Headers as sent; credential-bearing values are redacted.
    pub request_headers: BTreeMap<String, String>,
    pub response_headers: BTreeMap<String, String>,
    pub response_size: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
}

/// One immutable execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub id: Uuid,
    pub check_id: String,
    pub status: CheckStatus,
    pub response_time_ms: u64,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub metadata: CheckMetadata,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn check() -> CheckConfig {
        CheckConfig {
            id: "chk-1".into(),
            connection_id: "conn-1".into(),
            endpoint: "/health".into(),
            method: HttpMethod::Get,
            expected_status: 200,
            timeout_ms: 5000,
            interval_secs: 60,
            headers: BTreeMap::new(),
            body: None,
            query_params: BTreeMap::new(),
            is_active: true,
            last_executed_at: None,
        }
    }

    #[test]
    fn test_unknown_provider_is_generic() {
        assert_eq!(Provider::parse("Stripe"), Provider::Stripe);
        assert_eq!(Provider::parse("mailgun"), Provider::Generic);
        let p: Provider = serde_json::from_str("\"pagerduty\"").unwrap();
        assert_eq!(p, Provider::Generic);
    }

    #[test]
    fn test_validate_plan_tier_interval() {
        let mut c = check();
        assert!(c.validate(PlanTier::Pro).is_ok());
        assert!(matches!(
            c.validate(PlanTier::Free),
            Err(MonitorError::InvalidConfig(_))
        ));
        c.interval_secs = 30;
        assert!(c.validate(PlanTier::Enterprise).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_status_timeout_and_body() {
        let mut c = check();
        c.expected_status = 99;
        assert!(c.validate(PlanTier::Enterprise).is_err());

        let mut c = check();
        c.timeout_ms = 0;
        assert!(c.validate(PlanTier::Enterprise).is_err());

        let mut c = check();
        c.body = Some(serde_json::json!({"a": 1}));
        assert!(c.validate(PlanTier::Enterprise).is_err());
        c.method = HttpMethod::Post;
        assert!(c.validate(PlanTier::Enterprise).is_ok());
    }

    #[test]
    fn test_interval_elapsed() {
        let now = Utc::now();
        let mut c = check();
        assert!(c.interval_elapsed(now));
        c.last_executed_at = Some(now - Duration::seconds(59));
        assert!(!c.interval_elapsed(now));
        c.last_executed_at = Some(now - Duration::seconds(60));
        assert!(c.interval_elapsed(now));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials {
            api_key: Some("sk_live_secret".into()),
            token: None,
            account_sid: None,
            auth_token: None,
        };
        let out = format!("{:?}", creds);
        assert!(!out.contains("sk_live_secret"));
        assert!(out.contains("<redacted>"));
    }
}

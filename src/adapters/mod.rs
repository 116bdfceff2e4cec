//! Provider strategies — outbound auth headers and billing-usage retrieval.
//!
//! Both are dispatched over the closed `Provider` enum. Adding a provider
//! means adding a variant and handling it in the two `match`es below; the
//! compiler points at every place that needs a decision.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Datelike, Duration, Months, NaiveDate, Utc};
use http::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Serialize;

use crate::model::{Credentials, Provider};

pub mod noop;
pub mod stripe;
pub mod twilio;

pub const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

// ── Auth Strategy ───────────────────────────────────────────────────

/// Build the auth headers for a provider. Pure; credential-bearing values
/// are marked sensitive so they are never echoed into result metadata.
pub fn build_auth_headers(provider: Provider, creds: &Credentials) -> HeaderMap {
    let mut headers = HeaderMap::new();

    match provider {
        Provider::Stripe | Provider::Sendgrid => {
            insert_bearer(&mut headers, creds.api_key.as_deref());
        }
        Provider::Twilio => {
            if let Some(sid) = creds.account_sid.as_deref() {
                let token = creds.auth_token.as_deref().unwrap_or_default();
                let encoded = STANDARD.encode(format!("{sid}:{token}"));
                insert_sensitive(&mut headers, format!("Basic {encoded}"));
            }
        }
        Provider::Github => {
            insert_bearer(&mut headers, creds.token.as_deref());
            headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
        }
        Provider::Slack => {
            insert_bearer(&mut headers, creds.token.as_deref());
        }
        Provider::Generic => {
            insert_bearer(
                &mut headers,
                creds.api_key.as_deref().or(creds.token.as_deref()),
            );
        }
    }

    headers
}

fn insert_bearer(headers: &mut HeaderMap, secret: Option<&str>) {
    if let Some(secret) = secret {
        insert_sensitive(headers, format!("Bearer {secret}"));
    }
}

fn insert_sensitive(headers: &mut HeaderMap, value: String) {
    match HeaderValue::from_str(&value) {
        Ok(mut v) => {
            v.set_sensitive(true);
            headers.insert(AUTHORIZATION, v);
        }
        Err(_) => {
            // Never log the value itself.
            tracing::warn!("Credential contains characters not allowed in a header — omitted");
        }
    }
}

// ── Cost Tracking ───────────────────────────────────────────────────

/// A calendar-month billing window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// `YYYY-MM`
    pub label: String,
}

impl BillingPeriod {
    /// The month containing `date`, first through last calendar day.
    pub fn containing(date: NaiveDate) -> Self {
        let start = date - Duration::days(date.day0() as i64);
        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(date);
        Self {
            start,
            end,
            label: start.format("%Y-%m").to_string(),
        }
    }

    pub fn current() -> Self {
        Self::containing(Utc::now().date_naive())
    }

    /// Unix seconds at 00:00:00 UTC on the first day.
    pub fn start_timestamp(&self) -> i64 {
        self.start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default()
    }

    /// Unix seconds at 23:59:59 UTC on the last day.
    pub fn end_timestamp(&self) -> i64 {
        self.end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default()
    }
}

/// Billing usage for one provider over one period.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostRecord {
    pub provider: Provider,
    pub amount: f64,
    pub currency: String,
    pub period: String,
    pub metadata: serde_json::Value,
}

/// Uniform outcome of a cost-tracking call. Failures are data, never
/// errors, so aggregation across connections cannot be derailed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostTrackingResult {
    pub provider: Provider,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CostTrackingResult {
    pub fn tracked(record: CostRecord) -> Self {
        Self {
            provider: record.provider,
            success: true,
            cost: Some(record),
            error: None,
        }
    }

    pub fn failed(provider: Provider, message: impl Into<String>) -> Self {
        Self {
            provider,
            success: false,
            cost: None,
            error: Some(message.into()),
        }
    }
}

/// Per-provider billing-usage retrieval.
#[async_trait]
pub trait CostTracker: Send + Sync {
    fn provider(&self) -> Provider;

    /// Retrieve usage for the current period. Must not panic or error;
    /// transport and parse problems become a failed result.
    async fn track_costs(&self, creds: &Credentials) -> CostTrackingResult;
}

/// Select the cost tracker for a provider.
pub fn cost_tracker_for(provider: Provider, client: reqwest::Client) -> Box<dyn CostTracker> {
    match provider {
        Provider::Stripe => Box::new(stripe::StripeCostTracker::new(client)),
        Provider::Twilio => Box::new(twilio::TwilioCostTracker::new(client)),
        Provider::Sendgrid | Provider::Github | Provider::Slack | Provider::Generic => {
            Box::new(noop::NoopCostTracker::new(provider))
        }
    }
}

/// Truncate a response body for inclusion in an error message.
pub(crate) fn snippet(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

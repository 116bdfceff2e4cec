//! Twilio — sums usage-record prices for the current month.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{snippet, BillingPeriod, CostRecord, CostTracker, CostTrackingResult};
use crate::model::{Credentials, Provider};

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";
const MAX_PAGES: usize = 100;

#[derive(Debug, Deserialize)]
struct UsageRecordPage {
    #[serde(default)]
    usage_records: Vec<UsageRecord>,
    #[serde(default)]
    next_page_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageRecord {
    /// Twilio returns prices as strings; tolerate numbers and null too.
    #[serde(default)]
    price: Value,
    #[serde(default)]
    price_unit: Option<String>,
}

impl UsageRecord {
    fn price(&self) -> f64 {
        match &self.price {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

pub struct TwilioCostTracker {
    client: reqwest::Client,
    base_url: String,
    max_pages: usize,
}

impl TwilioCostTracker {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, base_url: DEFAULT_BASE_URL.to_string(), max_pages: MAX_PAGES }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    async fn fetch(&self, sid: &str, token: &str, period: &BillingPeriod) -> Result<CostRecord> {
        let base = self.base_url.trim_end_matches('/');
        let start = period.start.format("%Y-%m-%d").to_string();
        let end = period.end.format("%Y-%m-%d").to_string();

        let mut next_url = Some(format!(
            "{base}/2010-04-01/Accounts/{sid}/Usage/Records.json?StartDate={start}&EndDate={end}&PageSize=1000"
        ));
        let mut total = 0.0f64;
        let mut records = 0usize;
        let mut currency: Option<String> = None;

        for _ in 0..self.max_pages {
            let Some(url) = next_url.take() else { break };

            let resp = self
                .client
                .get(&url)
                .basic_auth(sid, Some(token))
                .send()
                .await
                .context("request failed")?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("HTTP {}: {}", status.as_u16(), snippet(&body));
            }

            let page: UsageRecordPage = resp.json().await.context("invalid usage record listing")?;
            for record in &page.usage_records {
                total += record.price();
                records += 1;
                if currency.is_none() {
                    currency = record.price_unit.clone();
                }
            }

            next_url = page
                .next_page_uri
                .filter(|uri| !uri.is_empty())
                .map(|uri| format!("{base}{uri}"));
        }

        if next_url.is_some() {
            anyhow::bail!("usage records span more than {} pages", self.max_pages);
        }

        Ok(CostRecord {
            provider: Provider::Twilio,
            amount: total,
            currency: currency.unwrap_or_else(|| "usd".to_string()).to_uppercase(),
            period: period.label.clone(),
            metadata: serde_json::json!({ "recordCount": records }),
        })
    }
}

#[async_trait]
impl CostTracker for TwilioCostTracker {
    fn provider(&self) -> Provider {
        Provider::Twilio
    }

    async fn track_costs(&self, creds: &Credentials) -> CostTrackingResult {
        let (Some(sid), Some(token)) = (creds.account_sid.as_deref(), creds.auth_token.as_deref())
        else {
            return CostTrackingResult::failed(
                Provider::Twilio,
                "Twilio cost tracking failed: account SID and auth token are required",
            );
        };

        let period = BillingPeriod::current();
        match self.fetch(sid, token, &period).await {
            Ok(record) => CostTrackingResult::tracked(record),
            Err(e) => {
                tracing::warn!(error = %e, "Twilio cost tracking failed");
                CostTrackingResult::failed(
                    Provider::Twilio,
                    format!("Twilio cost tracking failed: {e:#}"),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{closed_port_url, stub_server, StubResponse};

    fn creds() -> Credentials {
        Credentials {
            api_key: None,
            token: None,
            account_sid: Some("AC1".into()),
            auth_token: Some("tok".into()),
        }
    }

    #[tokio::test]
    async fn test_sums_prices_and_follows_next_page() {
        let server = stub_server(vec![
            StubResponse::json(serde_json::json!({
                "usage_records": [
                    {"category": "sms", "price": "1.25", "price_unit": "usd"},
                    {"category": "calls", "price": 0.5, "price_unit": "usd"}
                ],
                "next_page_uri": "/2010-04-01/Accounts/AC1/Usage/Records.json?Page=1"
            })),
            StubResponse::json(serde_json::json!({
                "usage_records": [{"category": "mms", "price": null}],
                "next_page_uri": null
            })),
        ])
        .await;

        let tracker = TwilioCostTracker::new(reqwest::Client::new()).with_base_url(&server.base_url);
        let result = tracker.track_costs(&creds()).await;

        assert!(result.success, "{:?}", result.error);
        let cost = result.cost.unwrap();
        assert!((cost.amount - 1.75).abs() < 1e-9);
        assert_eq!(cost.currency, "USD");
        assert_eq!(cost.metadata["recordCount"], 3);

        let first = server.request(0);
        assert!(first.starts_with("GET /2010-04-01/Accounts/AC1/Usage/Records.json?StartDate="));
        assert!(first.to_lowercase().contains("authorization: basic "));
        assert!(server.request(1).contains("Page=1"));
    }

    #[tokio::test]
    async fn test_page_cap_reached_is_failure_not_partial_sum() {
        let server = stub_server(vec![StubResponse::json(serde_json::json!({
            "usage_records": [{"category": "sms", "price": "2.00", "price_unit": "usd"}],
            "next_page_uri": "/2010-04-01/Accounts/AC1/Usage/Records.json?Page=1"
        }))])
        .await;

        let tracker = TwilioCostTracker::new(reqwest::Client::new())
            .with_base_url(&server.base_url)
            .with_max_pages(1);
        let result = tracker.track_costs(&creds()).await;

        assert!(!result.success);
        assert!(result.cost.is_none());
        assert_eq!(
            result.error.as_deref(),
            Some("Twilio cost tracking failed: usage records span more than 1 pages")
        );
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_sid_or_token_is_failure_result() {
        let tracker = TwilioCostTracker::new(reqwest::Client::new())
            .with_base_url(closed_port_url().await);
        let only_sid = Credentials {
            api_key: None,
            token: None,
            account_sid: Some("AC1".into()),
            auth_token: None,
        };
        let result = tracker.track_costs(&only_sid).await;

        assert!(!result.success);
        assert_eq!(result.provider, Provider::Twilio);
        assert_eq!(
            result.error.as_deref(),
            Some("Twilio cost tracking failed: account SID and auth token are required")
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_failure_result() {
        let server = stub_server(vec![StubResponse::new(200, "OK", "not json")]).await;
        let tracker = TwilioCostTracker::new(reqwest::Client::new()).with_base_url(&server.base_url);
        let result = tracker.track_costs(&creds()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Twilio cost tracking failed"));
    }
}

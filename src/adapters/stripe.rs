//! Stripe — sums balance-transaction fees for the current month.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::{snippet, BillingPeriod, CostRecord, CostTracker, CostTrackingResult};
use crate::model::{Credentials, Provider};

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";
const PAGE_LIMIT: u32 = 100;
const MAX_PAGES: usize = 100;

#[derive(Debug, Deserialize)]
struct BalanceTransactionList {
    data: Vec<BalanceTransaction>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct BalanceTransaction {
    id: String,
    /// Fee in minor units (cents).
    #[serde(default)]
    fee: i64,
    #[serde(default)]
    currency: Option<String>,
}

pub struct StripeCostTracker {
    client: reqwest::Client,
    base_url: String,
    max_pages: usize,
}

impl StripeCostTracker {
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

    async fn fetch(&self, api_key: &str, period: &BillingPeriod) -> Result<CostRecord> {
        let url = format!(
            "{}/v1/balance_transactions",
            self.base_url.trim_end_matches('/')
        );
        let gte = period.start_timestamp().to_string();
        let lte = period.end_timestamp().to_string();
        let limit = PAGE_LIMIT.to_string();

        let mut fee_minor: i64 = 0;
        let mut transactions = 0usize;
        let mut currency: Option<String> = None;
        let mut starting_after: Option<String> = None;
        let mut exhausted = false;

        for _ in 0..self.max_pages {
            let mut query = vec![
                ("created[gte]", gte.as_str()),
                ("created[lte]", lte.as_str()),
                ("limit", limit.as_str()),
            ];
            if let Some(cursor) = starting_after.as_deref() {
                query.push(("starting_after", cursor));
            }

            let resp = self
                .client
                .get(&url)
                .bearer_auth(api_key)
                .query(&query)
                .send()
                .await
                .context("request failed")?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("HTTP {}: {}", status.as_u16(), snippet(&body));
            }

            let page: BalanceTransactionList =
                resp.json().await.context("invalid balance transaction listing")?;

            for tx in &page.data {
                fee_minor += tx.fee;
                transactions += 1;
                if currency.is_none() {
                    currency = tx.currency.clone();
                }
            }

            match (page.has_more, page.data.last()) {
                (true, Some(last)) => starting_after = Some(last.id.clone()),
                _ => {
                    exhausted = true;
                    break;
                }
            }
        }

        // a partial sum would under-report the month
        if !exhausted {
            anyhow::bail!("listing has more than {} pages", self.max_pages);
        }

        Ok(CostRecord {
            provider: Provider::Stripe,
            amount: fee_minor as f64 / 100.0,
            currency: currency.unwrap_or_else(|| "usd".to_string()).to_uppercase(),
            period: period.label.clone(),
            metadata: serde_json::json!({
                "transactionCount": transactions,
                "feeMinorUnits": fee_minor,
            }),
        })
    }
}

#[async_trait]
impl CostTracker for StripeCostTracker {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    async fn track_costs(&self, creds: &Credentials) -> CostTrackingResult {
        let Some(api_key) = creds.api_key.as_deref() else {
            return CostTrackingResult::failed(
                Provider::Stripe,
                "Stripe cost tracking failed: API key not configured",
            );
        };

        let period = BillingPeriod::current();
        match self.fetch(api_key, &period).await {
            Ok(record) => {
                tracing::debug!(amount = record.amount, period = %record.period, "Stripe costs tracked");
                CostTrackingResult::tracked(record)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stripe cost tracking failed");
                CostTrackingResult::failed(
                    Provider::Stripe,
                    format!("Stripe cost tracking failed: {e:#}"),
                )
            }
        }
    }
}

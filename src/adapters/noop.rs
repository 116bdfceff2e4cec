//! Providers without a billing integration.
//!
//! Returns an explicit zero-amount success so dashboards can tell
//! "not supported" apart from "failed" or "missing".

use async_trait::async_trait;

use super::{BillingPeriod, CostRecord, CostTracker, CostTrackingResult};
use crate::model::{Credentials, Provider};

pub struct NoopCostTracker {
    provider: Provider,
}

impl NoopCostTracker {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl CostTracker for NoopCostTracker {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn track_costs(&self, _creds: &Credentials) -> CostTrackingResult {
        CostTrackingResult::tracked(CostRecord {
            provider: self.provider,
            amount: 0.0,
            currency: "USD".to_string(),
            period: BillingPeriod::current().label,
            metadata: serde_json::json!({
                "note": format!("Cost tracking not implemented for {}", self.provider),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_is_zero_success_with_note() {
        let tracker = NoopCostTracker::new(Provider::Sendgrid);
        let result = tracker.track_costs(&Credentials::default()).await;

        assert!(result.success);
        assert!(result.error.is_none());
        let cost = result.cost.unwrap();
        assert_eq!(cost.amount, 0.0);
        assert_eq!(cost.period, BillingPeriod::current().label);
        assert!(cost.metadata["note"].as_str().unwrap().contains("not implemented"));
    }
}

//! Orchestration — load, decrypt, probe, persist, stamp.
//!
//! `run_due_checks` (driven by the poller) and `trigger_check` (on demand)
//! share one per-check pipeline. A bad probe outcome is a persisted
//! result; only load, decrypt and persistence failures are errors, and in
//! a batch those abort just the affected check.
//!
//! The result insert and the `last_executed_at` update are two separate
//! writes. If the process dies between them the check is simply due again
//! on the next pass.
//!
//! `last_executed_at` is stamped with the instant the run was dispatched
//! (the pass's selection time), not when the probe finished, so a poller
//! running at the due floor picks the check up again on its next tick.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::adapters::{cost_tracker_for, CostTrackingResult};
use crate::error::{MonitorError, MonitorResult};
use crate::model::{CheckConfig, CheckResult, Connection};
use crate::probe::ProbeExecutor;
use crate::store::{CheckStore, ConnectionStore, ResultStore};
use crate::vault::CredentialVault;

/// Outcome of one `run_due_checks` pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Checks returned by due selection.
    pub candidates: usize,
    /// Candidates whose own interval had not yet elapsed.
    pub skipped: usize,
    /// Results persisted, keyed by status.
    pub by_status: BTreeMap<String, usize>,
    /// Checks whose run aborted, with the reason.
    pub failures: Vec<CheckFailure>,
}

impl BatchSummary {
    pub fn executed(&self) -> usize {
        self.by_status.values().sum()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFailure {
    pub check_id: String,
    pub error: String,
}

/// Cost-tracking outcome for one connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCost {
    pub connection_id: String,
    pub connection_name: String,
    pub result: CostTrackingResult,
}

#[derive(Clone)]
pub struct MonitorService {
    connections: Arc<dyn ConnectionStore>,
    checks: Arc<dyn CheckStore>,
    results: Arc<dyn ResultStore>,
    vault: Arc<CredentialVault>,
    executor: ProbeExecutor,
    http: reqwest::Client,
}

impl MonitorService {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        checks: Arc<dyn CheckStore>,
        results: Arc<dyn ResultStore>,
        vault: Arc<CredentialVault>,
        executor: ProbeExecutor,
    ) -> Self {
        Self {
            connections,
            checks,
            results,
            vault,
            executor,
            http: reqwest::Client::new(),
        }
    }

    /// Wire all three store roles to a single backing store.
    pub fn with_store<S>(store: Arc<S>, vault: Arc<CredentialVault>, executor: ProbeExecutor) -> Self
    where
        S: ConnectionStore + CheckStore + ResultStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store, vault, executor)
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// Run one check on demand, regardless of schedule.
    pub async fn trigger_check(&self, check_id: &str) -> MonitorResult<CheckResult> {
        let check = self
            .checks
            .find_by_id(check_id)
            .await?
            .ok_or_else(|| MonitorError::CheckNotFound(check_id.to_string()))?;

        info!(check_id = %check.id, "Manual check trigger");
        self.run_check(check, Utc::now()).await
    }

    /// Run every due check whose own interval has elapsed, concurrently.
    pub async fn run_due_checks(&self) -> MonitorResult<BatchSummary> {
        let now = Utc::now();
        let due = self.checks.find_due(now).await?;

        let mut summary = BatchSummary {
            candidates: due.len(),
            ..Default::default()
        };

        let mut handles = Vec::new();
        for check in due {
            if !check.interval_elapsed(now) {
                summary.skipped += 1;
                continue;
            }
            let svc = self.clone();
            let check_id = check.id.clone();
            handles.push((check_id, tokio::spawn(async move { svc.run_check(check, now).await })));
        }

        for (check_id, handle) in handles {
            match handle.await {
                Ok(Ok(result)) => {
                    *summary
                        .by_status
                        .entry(result.status.as_str().to_string())
                        .or_insert(0) += 1;
                }
                Ok(Err(e)) => {
                    error!(check_id = %check_id, error = %e, "Check run aborted");
                    summary.failures.push(CheckFailure { check_id, error: e.to_string() });
                }
                Err(e) => {
                    error!(check_id = %check_id, "Check task panicked: {}", e);
                    summary.failures.push(CheckFailure {
                        check_id,
                        error: format!("Task panicked: {e}"),
                    });
                }
            }
        }

        info!(
            candidates = summary.candidates,
            skipped = summary.skipped,
            executed = summary.executed(),
            aborted = summary.failures.len(),
            by_status = ?summary.by_status,
            "Due-check pass complete"
        );
        Ok(summary)
    }

    async fn run_check(
        &self,
        check: CheckConfig,
        dispatched_at: DateTime<Utc>,
    ) -> MonitorResult<CheckResult> {
        let connection = self.load_connection(&check.connection_id).await?;

        let result = {
            let creds = self.vault.open(&connection.credentials)?;
            self.executor.execute(&check, &connection, &creds).await
        };

        self.results.insert(&result).await?;
        self.checks
            .update_last_executed(&check.id, dispatched_at)
            .await?;

        if result.error_message.is_some() {
            warn!(
                check_id = %check.id,
                status = result.status.as_str(),
                status_code = ?result.status_code,
                response_time_ms = result.response_time_ms,
                "Check did not succeed"
            );
        } else {
            info!(
                check_id = %check.id,
                status = result.status.as_str(),
                response_time_ms = result.response_time_ms,
                "Check succeeded"
            );
        }
        Ok(result)
    }

    async fn load_connection(&self, id: &str) -> MonitorResult<Connection> {
        self.connections
            .find_by_id_with_credentials(id)
            .await?
            .ok_or_else(|| MonitorError::ConnectionNotFound(id.to_string()))
    }

    /// Billing usage for one connection.
    pub async fn track_costs(&self, connection_id: &str) -> MonitorResult<CostTrackingResult> {
        let connection = self.load_connection(connection_id).await?;
        let creds = self.vault.open(&connection.credentials)?;
        let tracker = cost_tracker_for(connection.provider, self.http.clone());
        Ok(tracker.track_costs(&creds).await)
    }

    /// Billing usage for every active connection. One connection's failure
    /// (including undecryptable credentials) becomes that connection's
    /// failed result.
    pub async fn track_all_costs(&self) -> MonitorResult<Vec<ConnectionCost>> {
        let connections = self.connections.list_active().await?;

        let mut handles = Vec::new();
        for connection in connections {
            let vault = Arc::clone(&self.vault);
            let http = self.http.clone();
            handles.push(tokio::spawn(async move {
                let result = match vault.open(&connection.credentials) {
                    Ok(creds) => cost_tracker_for(connection.provider, http).track_costs(&creds).await,
                    Err(e) => CostTrackingResult::failed(
                        connection.provider,
                        format!("{} cost tracking failed: {}", connection.provider, e),
                    ),
                };
                ConnectionCost {
                    connection_id: connection.id,
                    connection_name: connection.name,
                    result,
                }
            }));
        }

        let mut costs = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(cost) => costs.push(cost),
                Err(e) => error!("Cost tracking task panicked: {}", e),
            }
        }

        let failed = costs.iter().filter(|c| !c.result.success).count();
        info!(connections = costs.len(), failed, "Cost aggregation complete");
        Ok(costs)
    }
}

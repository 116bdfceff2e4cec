//! Store contracts consumed by the orchestration layer.
//!
//! `vault::store::SqliteStore` implements all three; tests plug in fakes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{CheckConfig, CheckResult, Connection};

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Load a connection including its (still encrypted) credentials.
    async fn find_by_id_with_credentials(&self, id: &str) -> Result<Option<Connection>>;

    /// All active connections, used for cost aggregation.
    async fn list_active(&self) -> Result<Vec<Connection>>;
}

#[async_trait]
pub trait CheckStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<CheckConfig>>;

    /// Checks eligible at `now` under the due-selection rule.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<CheckConfig>>;

    /// Record an execution time. Implementations must never move the
    /// timestamp backwards.
    async fn update_last_executed(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append a result. Results are never updated or deleted.
    async fn insert(&self, result: &CheckResult) -> Result<()>;
}

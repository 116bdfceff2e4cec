//! Due selection — which checks may run now.
//!
//! A check is due when its connection and the check itself are active and
//! it either never ran or last ran more than `DUE_FLOOR_SECS` ago. The
//! floor is independent of the check's own interval; the orchestrator
//! enforces the interval on top of this coarse filter.
//!
//! Calling `find_due` more often than the floor yields overlapping
//! candidate sets. That is tolerated, not prevented.

pub mod poller;

use chrono::{DateTime, Duration, Utc};

use crate::model::{CheckConfig, Connection};

pub const DUE_FLOOR_SECS: i64 = 30;

/// The timestamp a check must have last run before to be due at `now`.
pub fn due_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(DUE_FLOOR_SECS)
}

/// Time-based part of the due rule.
pub fn is_due(last_executed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_executed_at {
        None => true,
        Some(last) => last < due_cutoff(now),
    }
}

/// Full due rule for a check and its owning connection.
pub fn is_eligible(check: &CheckConfig, connection: &Connection, now: DateTime<Utc>) -> bool {
    connection.is_active && check.is_active && is_due(check.last_executed_at, now)
}

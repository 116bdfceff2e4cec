//! Due-check poller — drives `run_due_checks` on a fixed cadence.
//!
//! Runs one pass on startup, then every `poll_secs`. A failed pass is
//! logged and the next tick proceeds normally.

use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{error, info};

use super::DUE_FLOOR_SECS;
use crate::orchestrator::MonitorService;

/// Run the poller until the task is dropped.
pub async fn run_poller(service: Arc<MonitorService>, poll_secs: u64) {
    let poll_secs = poll_secs.max(DUE_FLOOR_SECS as u64);

    info!(poll_secs, "Due-check poller starting, initial pass...");
    run_pass(&service, "Initial").await;

    let mut interval = time::interval(Duration::from_secs(poll_secs));
    // a pass that overruns must not trigger a burst of catch-up passes
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // Skip the immediate tick (we already ran)

    loop {
        interval.tick().await;
        run_pass(&service, "Scheduled").await;
    }
}

async fn run_pass(service: &MonitorService, label: &str) {
    if let Err(e) = service.run_due_checks().await {
        error!("{} due-check pass failed: {}", label, e);
    }
}

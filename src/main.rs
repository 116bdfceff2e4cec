//! APIWatch daemon.
//!
//! Opens the store, runs the due-check poller in the background and serves
//! the JSON-RPC trigger surface on a local Unix socket.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use apiwatch::config::Config;
use apiwatch::orchestrator::MonitorService;
use apiwatch::probe::ProbeExecutor;
use apiwatch::scheduler::poller;
use apiwatch::server::Server;
use apiwatch::vault::store::SqliteStore;
use apiwatch::vault::CredentialVault;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("APIWatch v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("Invalid configuration")?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    // ── Vault ───────────────────────────────────────────────────────
    let vault = Arc::new(
        CredentialVault::new(&config.encryption_key).context("Failed to initialise credential vault")?,
    );

    // ── Store ───────────────────────────────────────────────────────
    let store = Arc::new(SqliteStore::open(&config.db_path).context("Failed to open store")?);
    let conn_count = store.list_connections().map(|c| c.len()).unwrap_or(0);
    if conn_count == 0 {
        info!("No connections yet, add one via: monitor.admin.addConnection");
    } else {
        info!("Store contains {} connection(s)", conn_count);
    }

    // ── Orchestration ───────────────────────────────────────────────
    let probe_client = reqwest::Client::builder()
        .user_agent(concat!("apiwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let service = Arc::new(MonitorService::with_store(
        Arc::clone(&store),
        vault,
        ProbeExecutor::with_client(probe_client),
    ));

    // ── Poller ──────────────────────────────────────────────────────
    let poller_service = Arc::clone(&service);
    let poll_secs = config.poll_secs;
    tokio::spawn(async move {
        poller::run_poller(poller_service, poll_secs).await;
    });

    // ── JSON-RPC Server ─────────────────────────────────────────────
    let srv = Server::new(config.socket_path.clone(), service, store);
    info!("APIWatch daemon ready");
    srv.run().await?;

    Ok(())
}

/// Human-readable logs by default; `APIWATCH_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "apiwatch=info".into());
    let json = std::env::var("APIWATCH_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

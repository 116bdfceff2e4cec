//! Unix socket JSON-RPC server — the local trigger and admin surface.
//!
//! Listens on `<data_dir>/apiwatch.sock` for newline-delimited JSON-RPC
//! 2.0 requests. Local-only; the socket is owner-only (0600), which is the
//! whole access policy.
//!
//! Credentials go in through `monitor.admin.addConnection` and are sealed
//! before they touch the store. Nothing on this surface returns them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::error::MonitorError;
use crate::model::{CheckConfig, Connection, Credentials, PlanTier, Provider};
use crate::orchestrator::MonitorService;
use crate::store::ConnectionStore;
use crate::vault::store::SqliteStore;

const MAX_REQUEST_BYTES: u64 = 1_048_576;
const DEFAULT_RESULT_LIMIT: u32 = 20;
const MAX_RESULT_LIMIT: u32 = 500;

// ── JSON-RPC Types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0".into(), result: Some(result), error: None, id }
    }
    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self { jsonrpc: "2.0".into(), result: None, error: Some(JsonRpcError { code, message }), id }
    }
    fn invalid_params(id: Option<Value>, e: impl std::fmt::Display) -> Self {
        Self::error(id, -32602, format!("Invalid params: {}", e))
    }
    fn from_monitor(id: Option<Value>, e: MonitorError) -> Self {
        let code = match &e {
            e if e.is_not_found() => -32004,
            MonitorError::InvalidConfig(_) => -32602,
            _ => -32000,
        };
        Self::error(id, code, e.to_string())
    }
    fn from_value<T: Serialize>(id: Option<Value>, value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self::success(id, v),
            Err(e) => Self::error(id, -32603, format!("Internal error: {}", e)),
        }
    }
}

// ── Params ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckIdParams {
    check_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CostParams {
    connection_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultsParams {
    check_id: String,
    limit: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddConnectionParams {
    id: Option<String>,
    name: String,
    provider: Provider,
    base_url: String,
    #[serde(default)]
    credentials: Credentials,
    #[serde(default = "default_true")]
    is_active: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetActiveParams {
    check_id: String,
    is_active: bool,
}

fn default_true() -> bool {
    true
}

// ── Server ──────────────────────────────────────────────────────────

pub struct Server {
    socket_path: PathBuf,
    service: Arc<MonitorService>,
    store: Arc<SqliteStore>,
}

impl Server {
    pub fn new(socket_path: PathBuf, service: Arc<MonitorService>, store: Arc<SqliteStore>) -> Self {
        Self { socket_path, service, store }
    }

    pub async fn run(&self) -> Result<()> {
        // Remove stale socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(socket = %self.socket_path.display(), "APIWatch server listening");

        loop {
            let (stream, _) = listener.accept().await?;
            let service = Arc::clone(&self.service);
            let store = Arc::clone(&self.store);

            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut reader = BufReader::new(reader);
                let mut line = String::new();

                loop {
                    line.clear();
                    // bound each request, not the connection
                    let mut bounded = (&mut reader).take(MAX_REQUEST_BYTES + 1);
                    match bounded.read_line(&mut line).await {
                        Ok(0) => break, // EOF
                        Ok(_) if line.len() as u64 > MAX_REQUEST_BYTES => {
                            warn!(limit = MAX_REQUEST_BYTES, "Request too large, closing connection");
                            let response = JsonRpcResponse::error(
                                None,
                                -32600,
                                format!("Request exceeds {} bytes", MAX_REQUEST_BYTES),
                            );
                            let resp_json = serde_json::to_string(&response).unwrap_or_default();
                            let _ = writer.write_all(format!("{resp_json}\n").as_bytes()).await;
                            break;
                        }
                        Ok(_) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            let response = handle_request(&line, &service, &store).await;
                            let resp_json = serde_json::to_string(&response).unwrap_or_default();
                            if writer.write_all(resp_json.as_bytes()).await.is_err() { break; }
                            if writer.write_all(b"\n").await.is_err() { break; }
                        }
                        Err(_) => break,
                    }
                }
            });
        }
    }
}

// ── Request Handling ────────────────────────────────────────────────

async fn handle_request(raw: &str, service: &MonitorService, store: &SqliteStore) -> JsonRpcResponse {
    let req: JsonRpcRequest = match serde_json::from_str(raw) {
        Ok(r) => r,
        Err(e) => return JsonRpcResponse::error(None, -32700, format!("Parse error: {}", e)),
    };

    let params = req.params.unwrap_or(Value::Null);

    match req.method.as_str() {
        "monitor.health" => handle_health(req.id, store),
        "monitor.runDue" => match service.run_due_checks().await {
            Ok(summary) => JsonRpcResponse::from_value(req.id, summary),
            Err(e) => JsonRpcResponse::from_monitor(req.id, e),
        },
        "monitor.trigger" => handle_trigger(req.id, params, service).await,
        "monitor.costs" => handle_costs(req.id, params, service).await,
        "monitor.results" => handle_results(req.id, params, store),
        "monitor.admin.addConnection" => handle_add_connection(req.id, params, service, store),
        "monitor.admin.addCheck" => handle_add_check(req.id, params, store).await,
        "monitor.admin.setCheckActive" => handle_set_check_active(req.id, params, store),
        _ => JsonRpcResponse::error(req.id, -32601, format!("Unknown method: {}", req.method)),
    }
}

fn handle_health(id: Option<Value>, store: &SqliteStore) -> JsonRpcResponse {
    match store.list_connections() {
        Ok(conns) => JsonRpcResponse::success(
            id,
            json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "connections": conns.len(),
                "activeConnections": conns.iter().filter(|c| c.is_active).count(),
            }),
        ),
        Err(e) => JsonRpcResponse::error(id, -32000, e.to_string()),
    }
}

async fn handle_trigger(id: Option<Value>, params: Value, service: &MonitorService) -> JsonRpcResponse {
    let p: CheckIdParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return JsonRpcResponse::invalid_params(id, e),
    };
    match service.trigger_check(&p.check_id).await {
        Ok(result) => JsonRpcResponse::from_value(id, result),
        Err(e) => JsonRpcResponse::from_monitor(id, e),
    }
}

async fn handle_costs(id: Option<Value>, params: Value, service: &MonitorService) -> JsonRpcResponse {
    let p: CostParams = if params.is_null() {
        CostParams { connection_id: None }
    } else {
        match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return JsonRpcResponse::invalid_params(id, e),
        }
    };

    match p.connection_id {
        Some(conn_id) => match service.track_costs(&conn_id).await {
            Ok(result) => JsonRpcResponse::from_value(id, result),
            Err(e) => JsonRpcResponse::from_monitor(id, e),
        },
        None => match service.track_all_costs().await {
            Ok(costs) => JsonRpcResponse::from_value(id, costs),
            Err(e) => JsonRpcResponse::from_monitor(id, e),
        },
    }
}

fn handle_results(id: Option<Value>, params: Value, store: &SqliteStore) -> JsonRpcResponse {
    let p: ResultsParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return JsonRpcResponse::invalid_params(id, e),
    };
    let limit = p.limit.unwrap_or(DEFAULT_RESULT_LIMIT).clamp(1, MAX_RESULT_LIMIT);
    match store.recent_results(&p.check_id, limit) {
        Ok(results) => JsonRpcResponse::from_value(id, results),
        Err(e) => JsonRpcResponse::error(id, -32000, e.to_string()),
    }
}

fn handle_add_connection(
    id: Option<Value>,
    params: Value,
    service: &MonitorService,
    store: &SqliteStore,
) -> JsonRpcResponse {
    let p: AddConnectionParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return JsonRpcResponse::invalid_params(id, e),
    };
    if let Err(e) = reqwest::Url::parse(&p.base_url) {
        return JsonRpcResponse::invalid_params(id, format!("baseUrl: {}", e));
    }

    let sealed = match service.vault().seal(&p.credentials) {
        Ok(s) => s,
        Err(e) => return JsonRpcResponse::from_monitor(id, e.into()),
    };
    let conn = Connection {
        id: p.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: p.name,
        provider: p.provider,
        base_url: p.base_url,
        credentials: sealed,
        is_active: p.is_active,
    };

    match store.insert_connection(&conn) {
        Ok(()) => {
            info!(connection_id = %conn.id, provider = %conn.provider, "Connection added");
            JsonRpcResponse::from_value(id, &conn)
        }
        Err(e) => JsonRpcResponse::error(id, -32000, format!("{:#}", e)),
    }
}

async fn handle_add_check(id: Option<Value>, params: Value, store: &SqliteStore) -> JsonRpcResponse {
    // Admin callers act for the highest tier unless they say otherwise.
    let tier = match params.get("tier").cloned() {
        None | Some(Value::Null) => PlanTier::Enterprise,
        Some(t) => match serde_json::from_value::<PlanTier>(t) {
            Ok(t) => t,
            Err(e) => return JsonRpcResponse::invalid_params(id, e),
        },
    };
    let mut check: CheckConfig = match serde_json::from_value(params) {
        Ok(c) => c,
        Err(e) => return JsonRpcResponse::invalid_params(id, e),
    };
    check.last_executed_at = None;

    if let Err(e) = check.validate(tier) {
        warn!(check_id = %check.id, error = %e, "Rejected check configuration");
        return JsonRpcResponse::from_monitor(id, e);
    }

    match store.find_by_id_with_credentials(&check.connection_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return JsonRpcResponse::from_monitor(
                id,
                MonitorError::ConnectionNotFound(check.connection_id.clone()),
            )
        }
        Err(e) => return JsonRpcResponse::error(id, -32000, e.to_string()),
    }

    match store.insert_check(&check) {
        Ok(()) => JsonRpcResponse::from_value(id, &check),
        Err(e) => JsonRpcResponse::error(id, -32000, format!("{:#}", e)),
    }
}

fn handle_set_check_active(id: Option<Value>, params: Value, store: &SqliteStore) -> JsonRpcResponse {
    let p: SetActiveParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return JsonRpcResponse::invalid_params(id, e),
    };
    match store.set_check_active(&p.check_id, p.is_active) {
        Ok(true) => {
            info!(check_id = %p.check_id, is_active = p.is_active, "Check activation changed");
            JsonRpcResponse::success(id, json!({ "checkId": p.check_id, "isActive": p.is_active }))
        }
        Ok(false) => JsonRpcResponse::from_monitor(id, MonitorError::CheckNotFound(p.check_id)),
        Err(e) => JsonRpcResponse::error(id, -32000, e.to_string()),
    }
}

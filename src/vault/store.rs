//! SQLite-backed store for connections, checks and results.
//!
//! Credentials are written exactly as handed in — already sealed by the
//! vault — so plaintext never reaches disk. Results are append-only.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as Db, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::model::{
    CheckConfig, CheckResult, CheckStatus, Connection, EncryptedCredentials, HttpMethod, Provider,
};
use crate::scheduler::due_cutoff;
use crate::store::{CheckStore, ConnectionStore, ResultStore};

const CHECK_COLUMNS: &str = "c.id, c.connection_id, c.endpoint, c.method, c.expected_status, \
     c.timeout_ms, c.interval_secs, c.headers, c.body, c.query_params, c.is_active, c.last_executed_at_ms";

const CONNECTION_COLUMNS: &str = "id, name, provider, base_url, api_key_enc, token_enc, \
     account_sid_enc, auth_token_enc, is_active";

pub struct SqliteStore {
    db: Mutex<Db>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let db = Db::open(db_path).context("Failed to open apiwatch database")?;
        // WAL mode for concurrent reads
        db.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Db::open_in_memory()?)
    }

    fn init(db: Db) -> Result<Self> {
        db.pragma_update(None, "foreign_keys", "ON")?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                provider TEXT NOT NULL,
                base_url TEXT NOT NULL,
                api_key_enc TEXT,
                token_enc TEXT,
                account_sid_enc TEXT,
                auth_token_enc TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checks (
                id TEXT PRIMARY KEY,
                connection_id TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                method TEXT NOT NULL,
                expected_status INTEGER NOT NULL,
                timeout_ms INTEGER NOT NULL,
                interval_secs INTEGER NOT NULL,
                headers TEXT NOT NULL DEFAULT '{}',
                body TEXT,
                query_params TEXT NOT NULL DEFAULT '{}',
                is_active BOOLEAN NOT NULL DEFAULT 1,
                last_executed_at_ms INTEGER,
                FOREIGN KEY (connection_id) REFERENCES connections(id)
            );

            CREATE TABLE IF NOT EXISTS check_results (
                id TEXT PRIMARY KEY,
                check_id TEXT NOT NULL,
                status TEXT NOT NULL,
                response_time_ms INTEGER NOT NULL,
                status_code INTEGER,
                error_message TEXT,
                metadata TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                FOREIGN KEY (check_id) REFERENCES checks(id)
            );

            CREATE INDEX IF NOT EXISTS idx_checks_due ON checks(is_active, last_executed_at_ms);
            CREATE INDEX IF NOT EXISTS idx_results_check ON check_results(check_id, created_at_ms);
            ",
        )?;

        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Db>> {
        self.db.lock().map_err(|_| anyhow!("apiwatch database lock poisoned"))
    }

    /// Store a connection. Credentials must already be sealed.
    pub fn insert_connection(&self, conn: &Connection) -> Result<()> {
        let db = self.lock()?;
        let creds = &conn.credentials;
        db.execute(
            "INSERT INTO connections (id, name, provider, base_url, api_key_enc, token_enc,
                account_sid_enc, auth_token_enc, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                conn.id,
                conn.name,
                conn.provider.as_str(),
                conn.base_url,
                creds.api_key,
                creds.token,
                creds.account_sid,
                creds.auth_token,
                conn.is_active,
                Utc::now().to_rfc3339()
            ],
        )
        .with_context(|| format!("Failed to insert connection '{}'", conn.id))?;

        tracing::info!(connection_id = %conn.id, provider = %conn.provider, "Connection stored");
        Ok(())
    }

    pub fn insert_check(&self, check: &CheckConfig) -> Result<()> {
        let headers = serde_json::to_string(&check.headers)?;
        let query = serde_json::to_string(&check.query_params)?;
        let body = check.body.as_ref().map(serde_json::to_string).transpose()?;

        let db = self.lock()?;
        db.execute(
            "INSERT INTO checks (id, connection_id, endpoint, method, expected_status, timeout_ms,
                interval_secs, headers, body, query_params, is_active, last_executed_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                check.id,
                check.connection_id,
                check.endpoint,
                check.method.as_str(),
                check.expected_status,
                check.timeout_ms as i64,
                check.interval_secs as i64,
                headers,
                body,
                query,
                check.is_active,
                check.last_executed_at.map(|t| t.timestamp_millis()),
            ],
        )
        .with_context(|| format!("Failed to insert check '{}'", check.id))?;

        tracing::info!(check_id = %check.id, connection_id = %check.connection_id, "Check stored");
        Ok(())
    }

    /// Enable or disable a check. Returns false if it does not exist.
    pub fn set_check_active(&self, id: &str, active: bool) -> Result<bool> {
        let db = self.lock()?;
        let rows = db.execute(
            "UPDATE checks SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(rows > 0)
    }

    pub fn list_connections(&self) -> Result<Vec<Connection>> {
        self.query_connections(&format!("SELECT {CONNECTION_COLUMNS} FROM connections ORDER BY id"))
    }

    /// Most recent results for a check, newest first.
    pub fn recent_results(&self, check_id: &str, limit: u32) -> Result<Vec<CheckResult>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(
            "SELECT id, check_id, status, response_time_ms, status_code, error_message, metadata, created_at_ms
             FROM check_results WHERE check_id = ?1
             ORDER BY created_at_ms DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![check_id, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<u16>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, check_id, status, rt, code, err, meta, created)| {
                Ok(CheckResult {
                    id: id.parse().context("Invalid result id")?,
                    check_id,
                    status: CheckStatus::parse(&status)
                        .with_context(|| format!("Unknown result status '{status}'"))?,
                    response_time_ms: rt.max(0) as u64,
                    status_code: code,
                    error_message: err,
                    metadata: serde_json::from_str(&meta).context("Invalid result metadata")?,
                    created_at: from_millis(created)?,
                })
            })
            .collect()
    }

    fn query_connections(&self, sql: &str) -> Result<Vec<Connection>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(sql)?;
        let conns = stmt
            .query_map([], connection_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(conns)
    }

    fn query_checks(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<CheckConfig>> {
        let rows = {
            let db = self.lock()?;
            let mut stmt = db.prepare(sql)?;
            let rows = stmt
                .query_map(params, CheckRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(CheckRow::into_check).collect()
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| anyhow!("Timestamp {ms} out of range"))
}

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<Connection> {
    let provider: String = row.get(2)?;
    Ok(Connection {
        id: row.get(0)?,
        name: row.get(1)?,
        provider: Provider::parse(&provider),
        base_url: row.get(3)?,
        credentials: EncryptedCredentials {
            api_key: row.get(4)?,
            token: row.get(5)?,
            account_sid: row.get(6)?,
            auth_token: row.get(7)?,
        },
        is_active: row.get(8)?,
    })
}

/// Raw check row; JSON columns are decoded outside the rusqlite closure.
struct CheckRow {
    id: String,
    connection_id: String,
    endpoint: String,
    method: String,
    expected_status: u16,
    timeout_ms: i64,
    interval_secs: i64,
    headers: String,
    body: Option<String>,
    query_params: String,
    is_active: bool,
    last_executed_at_ms: Option<i64>,
}

impl CheckRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            connection_id: row.get(1)?,
            endpoint: row.get(2)?,
            method: row.get(3)?,
            expected_status: row.get(4)?,
            timeout_ms: row.get(5)?,
            interval_secs: row.get(6)?,
            headers: row.get(7)?,
            body: row.get(8)?,
            query_params: row.get(9)?,
            is_active: row.get(10)?,
            last_executed_at_ms: row.get(11)?,
        })
    }

    fn into_check(self) -> Result<CheckConfig> {
        let method = HttpMethod::parse(&self.method)
            .with_context(|| format!("Check '{}' has unknown method '{}'", self.id, self.method))?;
        Ok(CheckConfig {
            method,
            connection_id: self.connection_id,
            endpoint: self.endpoint,
            expected_status: self.expected_status,
            timeout_ms: self.timeout_ms.max(0) as u64,
            interval_secs: self.interval_secs.max(0) as u64,
            headers: serde_json::from_str(&self.headers).context("Invalid check headers")?,
            body: self
                .body
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("Invalid check body")?,
            query_params: serde_json::from_str(&self.query_params)
                .context("Invalid check query params")?,
            is_active: self.is_active,
            last_executed_at: self.last_executed_at_ms.map(from_millis).transpose()?,
            id: self.id,
        })
    }
}

#[async_trait]
impl ConnectionStore for SqliteStore {
    async fn find_by_id_with_credentials(&self, id: &str) -> Result<Option<Connection>> {
        let db = self.lock()?;
        let conn = db
            .query_row(
                &format!("SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ?1"),
                params![id],
                connection_from_row,
            )
            .optional()?;
        Ok(conn)
    }

    async fn list_active(&self) -> Result<Vec<Connection>> {
        self.query_connections(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections WHERE is_active = 1 ORDER BY id"
        ))
    }
}

#[async_trait]
impl CheckStore for SqliteStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<CheckConfig>> {
        let mut checks = self.query_checks(
            &format!("SELECT {CHECK_COLUMNS} FROM checks c WHERE c.id = ?1"),
            params![id],
        )?;
        Ok(checks.pop())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<CheckConfig>> {
        let cutoff = due_cutoff(now).timestamp_millis();
        self.query_checks(
            &format!(
                "SELECT {CHECK_COLUMNS} FROM checks c
                 JOIN connections n ON n.id = c.connection_id
                 WHERE n.is_active = 1 AND c.is_active = 1
                   AND (c.last_executed_at_ms IS NULL OR c.last_executed_at_ms < ?1)
                 ORDER BY c.last_executed_at_ms IS NOT NULL, c.last_executed_at_ms, c.id"
            ),
            params![cutoff],
        )
    }

    async fn update_last_executed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let db = self.lock()?;
        let rows = db.execute(
            "UPDATE checks SET last_executed_at_ms = MAX(COALESCE(last_executed_at_ms, ?1), ?1)
             WHERE id = ?2",
            params![at.timestamp_millis(), id],
        )?;
        if rows == 0 {
            anyhow::bail!("Check '{}' not found while updating last execution", id);
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn insert(&self, result: &CheckResult) -> Result<()> {
        let metadata = serde_json::to_string(&result.metadata)?;
        let db = self.lock()?;
        db.execute(
            "INSERT INTO check_results (id, check_id, status, response_time_ms, status_code,
                error_message, metadata, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                result.id.to_string(),
                result.check_id,
                result.status.as_str(),
                result.response_time_ms as i64,
                result.status_code,
                result.error_message,
                metadata,
                result.created_at.timestamp_millis(),
            ],
        )
        .with_context(|| format!("Failed to insert result for check '{}'", result.check_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CheckMetadata, Credentials};
    use crate::vault::CredentialVault;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn connection(id: &str, active: bool) -> Connection {
        Connection {
            id: id.into(),
            name: format!("conn {id}"),
            provider: Provider::Stripe,
            base_url: "https://api.stripe.com".into(),
            credentials: EncryptedCredentials::default(),
            is_active: active,
        }
    }

    fn check(id: &str, conn: &str, last: Option<DateTime<Utc>>) -> CheckConfig {
        let mut query = BTreeMap::new();
        query.insert("limit".to_string(), "1".to_string());
        CheckConfig {
            id: id.into(),
            connection_id: conn.into(),
            endpoint: "/v1/charges".into(),
            method: HttpMethod::Get,
            expected_status: 200,
            timeout_ms: 5000,
            interval_secs: 60,
            headers: BTreeMap::new(),
            body: None,
            query_params: query,
            is_active: true,
            last_executed_at: last,
        }
    }

    fn ids(checks: &[CheckConfig]) -> Vec<&str> {
        checks.iter().map(|c| c.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_find_due_applies_floor_and_active_flags() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.insert_connection(&connection("live", true)).unwrap();
        store.insert_connection(&connection("paused", false)).unwrap();

        store.insert_check(&check("never", "live", None)).unwrap();
        store.insert_check(&check("recent", "live", Some(now - Duration::seconds(10)))).unwrap();
        store.insert_check(&check("stale", "live", Some(now - Duration::seconds(31)))).unwrap();
        store.insert_check(&check("orphaned", "paused", None)).unwrap();
        store.insert_check(&check("disabled", "live", None)).unwrap();
        assert!(store.set_check_active("disabled", false).unwrap());

        let due = store.find_due(now).await.unwrap();
        assert_eq!(ids(&due), vec!["never", "stale"]);
        assert_eq!(due[0].query_params.get("limit").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_last_executed_never_moves_backwards() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_connection(&connection("c", true)).unwrap();
        store.insert_check(&check("k", "c", None)).unwrap();

        let later = Utc::now();
        let earlier = later - Duration::minutes(5);
        store.update_last_executed("k", later).await.unwrap();
        store.update_last_executed("k", earlier).await.unwrap();

        let loaded = store.find_by_id("k").await.unwrap().unwrap();
        assert_eq!(
            loaded.last_executed_at.map(|t| t.timestamp_millis()),
            Some(later.timestamp_millis())
        );
        assert!(store.update_last_executed("missing", later).await.is_err());
    }

    #[tokio::test]
    async fn test_credentials_are_stored_sealed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let vault = CredentialVault::new(&[9u8; 32]).unwrap();
        let plain = Credentials {
            api_key: Some("sk_live_abc".into()),
            token: None,
            account_sid: None,
            auth_token: None,
        };
        let mut conn = connection("c", true);
        conn.credentials = vault.seal(&plain).unwrap();
        store.insert_connection(&conn).unwrap();

        let raw: String = store
            .lock()
            .unwrap()
            .query_row("SELECT api_key_enc FROM connections WHERE id = 'c'", [], |r| r.get(0))
            .unwrap();
        assert!(!raw.contains("sk_live_abc"));

        let loaded = store.find_by_id_with_credentials("c").await.unwrap().unwrap();
        let opened = vault.open(&loaded.credentials).unwrap();
        assert_eq!(opened.api_key.as_deref(), Some("sk_live_abc"));
        assert!(store.find_by_id_with_credentials("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_results_append_and_read_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_connection(&connection("c", true)).unwrap();
        store.insert_check(&check("k", "c", None)).unwrap();

        let base = Utc::now();
        for (i, status) in [CheckStatus::Success, CheckStatus::Timeout].into_iter().enumerate() {
            let result = CheckResult {
                id: Uuid::new_v4(),
                check_id: "k".into(),
                status,
                response_time_ms: 100 + i as u64,
                status_code: (status == CheckStatus::Success).then_some(200),
                error_message: (status != CheckStatus::Success)
                    .then(|| "Request timed out".to_string()),
                metadata: CheckMetadata {
                    url: "https://api.stripe.com/v1/charges?limit=1".into(),
                    method: "GET".into(),
                    ..Default::default()
                },
                created_at: base + Duration::seconds(i as i64),
            };
            store.insert(&result).await.unwrap();
        }

        let results = store.recent_results("k", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, CheckStatus::Timeout);
        assert_eq!(results[0].status_code, None);
        assert_eq!(results[1].status_code, Some(200));
        assert_eq!(results[1].metadata.method, "GET");
    }

    #[tokio::test]
    async fn test_list_active_excludes_inactive() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_connection(&connection("a", true)).unwrap();
        store.insert_connection(&connection("b", false)).unwrap();

        assert_eq!(store.list_connections().unwrap().len(), 2);
        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");
    }
}

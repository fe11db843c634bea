//! Snowflake adapter over the session-based JSON REST protocol.
//!
//! One `SnowflakeSession` is one logged-in warehouse session, so statements
//! issued through it share a transaction once `BEGIN TRANSACTION` has run.
//! Tables touched:
//! - `SHOW USERS` / `SHOW USER PROGRAMMATIC ACCESS TOKENS` (read only)
//! - the token log table named by `WarehouseConfig::log_table`

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::record::{DiscoveredToken, LogRow, Principal, TokenKey, TokenRecord};
use super::traits::{TokenLog, Warehouse};
use crate::config::WarehouseConfig;
use crate::error::WatchError;
use crate::timestamp;

const CLIENT_APP_ID: &str = "pat-watch";
/// Codes the query endpoint returns while a statement is still running.
const QUERY_IN_PROGRESS: &[&str] = &["333333", "333334"];
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A logged-in Snowflake session.
pub struct SnowflakeSession {
    http: reqwest::Client,
    base_url: String,
    token: String,
    log_table: String,
    sequence: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    success: bool,
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<ColumnMeta>,
    #[serde(default)]
    rowset: Vec<Vec<Value>>,
    #[serde(default)]
    chunks: Vec<ChunkRef>,
    #[serde(default)]
    chunk_headers: HashMap<String, String>,
    qrmk: Option<String>,
    get_result_url: Option<String>,
    query_result_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ColumnMeta {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChunkRef {
    url: String,
}

/// Positional bind value for a statement.
#[derive(Debug, Clone)]
pub enum Bind {
    Text(String),
    TimestampNtz(NaiveDateTime),
}

impl Bind {
    fn to_json(&self) -> Value {
        match self {
            Bind::Text(s) => json!({ "type": "TEXT", "value": s }),
            Bind::TimestampNtz(ts) => {
                json!({ "type": "TIMESTAMP_NTZ", "value": timestamp::to_bind_nanos(*ts) })
            }
        }
    }
}

impl SnowflakeSession {
    /// Log in and open a session against the configured warehouse/database/schema.
    pub async fn connect(config: &WarehouseConfig) -> Result<Self, WatchError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("pat-watch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WatchError::Http(format!("Failed to build HTTP client: {e}")))?;

        let base_url = config.base_url();
        let mut params = vec![
            ("warehouse", config.warehouse.clone()),
            ("databaseName", config.database.clone()),
            ("schemaName", config.schema.clone()),
            ("requestId", Uuid::new_v4().to_string()),
        ];
        if let Some(role) = &config.role {
            params.push(("roleName", role.clone()));
        }

        let body = json!({
            "data": {
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
                "ACCOUNT_NAME": config.account,
                "LOGIN_NAME": config.user,
                "PASSWORD": config.password,
            }
        });

        let resp = http
            .post(format!("{base_url}/session/v1/login-request"))
            .query(&params)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WatchError::Login(format!("Login request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(WatchError::Login(format!("HTTP {status}: {body}")));
        }

        let envelope: Envelope<LoginData> = resp
            .json()
            .await
            .map_err(|e| WatchError::Login(format!("Failed to parse login response: {e}")))?;

        if !envelope.success {
            return Err(WatchError::Login(
                envelope.message.unwrap_or_else(|| "login rejected".into()),
            ));
        }

        let token = envelope
            .data
            .and_then(|d| d.token)
            .ok_or_else(|| WatchError::Login("login response carried no session token".into()))?;

        Ok(Self {
            http,
            base_url,
            token,
            log_table: config.log_table.clone(),
            sequence: AtomicU64::new(0),
        })
    }

    fn auth_header(&self) -> String {
        format!("Snowflake Token=\"{}\"", self.token)
    }

    /// Run one statement and collect its full result set, including remote chunks.
    pub async fn execute(&self, sql: &str, binds: &[Bind]) -> Result<ResultSet, WatchError> {
        let sequence_id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mut body = json!({
            "sqlText": sql,
            "asyncExec": false,
            "sequenceId": sequence_id,
            "querySubmissionTime": Utc::now().timestamp_millis(),
        });
        if !binds.is_empty() {
            let bindings: Map<String, Value> = binds
                .iter()
                .enumerate()
                .map(|(i, b)| ((i + 1).to_string(), b.to_json()))
                .collect();
            body["bindings"] = Value::Object(bindings);
        }

        debug!(sequence_id, "Executing: {sql}");

        let resp = self
            .http
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .query(&[("requestId", Uuid::new_v4().to_string())])
            .header("Accept", "application/json")
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await?;

        let mut envelope = read_envelope(resp).await?;
        while is_in_progress(&envelope) {
            let url = envelope
                .data
                .as_ref()
                .and_then(|d| d.get_result_url.clone())
                .ok_or_else(|| WatchError::Decode("running query has no result URL".into()))?;
            tokio::time::sleep(POLL_INTERVAL).await;
            let resp = self
                .http
                .get(format!("{}{}", self.base_url, url))
                .header("Accept", "application/json")
                .header("Authorization", self.auth_header())
                .send()
                .await?;
            envelope = read_envelope(resp).await?;
        }

        if !envelope.success {
            return Err(WatchError::query(
                envelope.code.unwrap_or_default(),
                envelope.message.unwrap_or_else(|| "statement failed".into()),
            ));
        }

        let data = envelope.data.unwrap_or_default();
        if let Some(format) = &data.query_result_format {
            if !format.eq_ignore_ascii_case("json") {
                return Err(WatchError::Decode(format!(
                    "unsupported result format '{format}'"
                )));
            }
        }

        let mut rows = data.rowset.clone();
        for chunk in &data.chunks {
            rows.extend(self.fetch_chunk(chunk, &data).await?);
        }

        Ok(ResultSet::new(
            data.rowtype.into_iter().map(|c| c.name).collect(),
            rows,
        ))
    }

    async fn fetch_chunk(
        &self,
        chunk: &ChunkRef,
        data: &QueryData,
    ) -> Result<Vec<Vec<Value>>, WatchError> {
        let mut req = self.http.get(&chunk.url);
        if data.chunk_headers.is_empty() {
            if let Some(qrmk) = &data.qrmk {
                req = req
                    .header("x-amz-server-side-encryption-customer-algorithm", "AES256")
                    .header("x-amz-server-side-encryption-customer-key", qrmk);
            }
        } else {
            for (name, value) in &data.chunk_headers {
                req = req.header(name.as_str(), value.as_str());
            }
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(WatchError::Http(format!("result chunk download failed: HTTP {status}")));
        }

        // Chunks are row arrays without the enclosing brackets.
        let text = resp.text().await?;
        let rows: Vec<Vec<Value>> = serde_json::from_str(&format!("[{text}]"))?;
        Ok(rows)
    }

    /// End the server-side session. Failures are logged, not raised.
    pub async fn close(self) {
        let result = self
            .http
            .post(format!("{}/session", self.base_url))
            .query(&[("delete", "true")])
            .header("Accept", "application/json")
            .header("Authorization", self.auth_header())
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => debug!("Snowflake session closed"),
            Ok(resp) => warn!("Closing Snowflake session returned HTTP {}", resp.status()),
            Err(e) => warn!("Failed to close Snowflake session: {e}"),
        }
    }
}

async fn read_envelope(resp: reqwest::Response) -> Result<Envelope<QueryData>, WatchError> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(WatchError::Http(format!("HTTP {status}: {body}")));
    }
    let text = resp.text().await?;
    Ok(serde_json::from_str(&text)?)
}

fn is_in_progress(envelope: &Envelope<QueryData>) -> bool {
    envelope
        .code
        .as_deref()
        .is_some_and(|c| QUERY_IN_PROGRESS.contains(&c))
}

#[async_trait]
impl Warehouse for SnowflakeSession {
    async fn list_principals(&self) -> Result<Vec<Principal>, WatchError> {
        let result = self.execute("SHOW USERS", &[]).await?;
        decode_principals(&result)
    }

    async fn list_tokens(&self, user_name: &str) -> Result<Vec<DiscoveredToken>, WatchError> {
        let sql = format!(
            "SHOW USER PROGRAMMATIC ACCESS TOKENS FOR USER {}",
            quote_identifier(user_name)
        );
        let result = self.execute(&sql, &[]).await?;
        decode_tokens(&result)
    }
}

#[async_trait]
impl TokenLog for SnowflakeSession {
    async fn ensure_table(&self) -> Result<(), WatchError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                token_name  STRING        NOT NULL,
                user_name   STRING        NOT NULL,
                created_on  TIMESTAMP_NTZ NOT NULL,
                expires_at  TIMESTAMP_NTZ,
                notified_on TIMESTAMP_NTZ
            )
            "#,
            self.log_table
        );
        self.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<(), WatchError> {
        self.execute("BEGIN TRANSACTION", &[])
            .await
            .map_err(|e| WatchError::Transaction(format!("begin failed: {e}")))?;
        Ok(())
    }

    async fn contains(&self, key: &TokenKey) -> Result<bool, WatchError> {
        let sql = format!(
            r#"
            SELECT 1 FROM {}
            WHERE token_name = ?
              AND user_name = ?
              AND created_on = ?
              AND expires_at = ?
            LIMIT 1
            "#,
            self.log_table
        );
        let result = self.execute(&sql, &key_binds(key)).await?;
        Ok(!result.is_empty())
    }

    async fn insert(&self, record: &TokenRecord) -> Result<(), WatchError> {
        let sql = format!(
            r#"
            INSERT INTO {} (token_name, user_name, created_on, expires_at, notified_on)
            VALUES (?, ?, ?, ?, ?)
            "#,
            self.log_table
        );
        let mut binds = key_binds(&record.key);
        binds.push(Bind::TimestampNtz(record.notified_on));
        self.execute(&sql, &binds).await?;
        Ok(())
    }

    async fn commit(&self) -> Result<(), WatchError> {
        self.execute("COMMIT", &[])
            .await
            .map_err(|e| WatchError::Transaction(format!("commit failed: {e}")))?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), WatchError> {
        self.execute("ROLLBACK", &[])
            .await
            .map_err(|e| WatchError::Transaction(format!("rollback failed: {e}")))?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<LogRow>, WatchError> {
        let sql = format!(
            "SELECT token_name, user_name, created_on, expires_at, notified_on FROM {}",
            self.log_table
        );
        let result = self.execute(&sql, &[]).await?;
        Ok(decode_log_rows(&result))
    }
}

fn key_binds(key: &TokenKey) -> Vec<Bind> {
    vec![
        Bind::Text(key.token_name.clone()),
        Bind::Text(key.user_name.clone()),
        Bind::TimestampNtz(key.created_on),
        Bind::TimestampNtz(key.expires_at),
    ]
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ── Result decoding ─────────────────────────────────────────────────────────

/// Column names plus string-rendered rows, as the JSON result format delivers them.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|v| match v {
                        Value::Null => None,
                        Value::String(s) => Some(s),
                        other => Some(other.to_string()),
                    })
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value of `column` in every row; `None` where the column or value is missing.
    fn column_values<'a>(&'a self, column: &str) -> impl Iterator<Item = Option<&'a str>> + 'a {
        let idx = self.index_of(column);
        self.rows
            .iter()
            .map(move |row| idx.and_then(|i| row.get(i)).and_then(|v| v.as_deref()))
    }

    fn required(&self, column: &str) -> Result<Vec<&str>, WatchError> {
        if self.index_of(column).is_none() {
            return Err(WatchError::Decode(format!("result has no '{column}' column")));
        }
        self.column_values(column)
            .map(|v| v.ok_or_else(|| WatchError::Decode(format!("null '{column}' value"))))
            .collect()
    }
}

/// `has_pat` arrives as text. Only the exact markers are accepted.
pub fn parse_flag(raw: Option<&str>) -> Result<bool, WatchError> {
    match raw {
        None | Some("") | Some("false") => Ok(false),
        Some("true") => Ok(true),
        Some(other) => Err(WatchError::Decode(format!(
            "has_pat flag '{other}' is neither 'true' nor 'false'"
        ))),
    }
}

fn decode_principals(result: &ResultSet) -> Result<Vec<Principal>, WatchError> {
    let names = result.required("name")?;
    names
        .into_iter()
        .zip(result.column_values("has_pat"))
        .map(|(name, flag)| -> Result<Principal, WatchError> {
            Ok(Principal {
                name: name.to_string(),
                has_pat: parse_flag(flag)
                    .map_err(|e| WatchError::Decode(format!("user {name}: {e}")))?,
            })
        })
        .collect()
}

fn decode_tokens(result: &ResultSet) -> Result<Vec<DiscoveredToken>, WatchError> {
    let names = result.required("name")?;
    let created = result.required("created_on")?;
    let expires = result.required("expires_at")?;

    names
        .into_iter()
        .zip(created)
        .zip(expires)
        .map(|((name, created_on), expires_at)| -> Result<DiscoveredToken, WatchError> {
            let parse = |column: &str, raw: &str| {
                timestamp::parse_utc(raw).ok_or_else(|| {
                    WatchError::Decode(format!("token {name}: bad {column} '{raw}'"))
                })
            };
            Ok(DiscoveredToken {
                name: name.to_string(),
                created_on: parse("created_on", created_on)?,
                expires_at: parse("expires_at", expires_at)?,
            })
        })
        .collect()
}

fn decode_log_rows(result: &ResultSet) -> Vec<LogRow> {
    let owned = |column: &str| -> Vec<Option<String>> {
        result
            .column_values(column)
            .map(|v| v.map(str::to_string))
            .collect()
    };
    let token_names = owned("token_name");
    let user_names = owned("user_name");
    let created = owned("created_on");
    let expires = owned("expires_at");
    let notified = owned("notified_on");

    (0..result.len())
        .map(|i| LogRow {
            token_name: token_names[i].clone(),
            user_name: user_names[i].clone(),
            created_on: created[i].clone(),
            expires_at: expires[i].clone(),
            notified_on: notified[i].clone(),
        })
        .collect()
}

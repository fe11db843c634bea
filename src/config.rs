use anyhow::{bail, Context, Result};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_LOG_TABLE: &str = "PAT_EXPIRY_LOG";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Connection settings for the Snowflake warehouse, shared by both jobs.
#[derive(Clone)]
pub struct WarehouseConfig {
    pub account: String,
    pub user: String,
    pub password: String,
    pub role: Option<String>,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    /// Host override; defaults to `<account>.snowflakecomputing.com`.
    pub host: String,
    /// Log table name, validated as an unquoted (optionally qualified) identifier.
    pub log_table: String,
    pub http_timeout: Duration,
}

/// Settings for the notify job's SNS delivery.
#[derive(Clone)]
pub struct NotifyConfig {
    pub topic_arn: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub http_timeout: Duration,
}

impl WarehouseConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Lookup(&lookup);
        let account = env.required("SNOWFLAKE_ACCOUNT")?;
        let host = env
            .optional("SNOWFLAKE_HOST")
            .unwrap_or_else(|| format!("{account}.snowflakecomputing.com"));
        let log_table = env
            .optional("PAT_LOG_TABLE")
            .unwrap_or_else(|| DEFAULT_LOG_TABLE.into());
        validate_identifier(&log_table).context("Invalid PAT_LOG_TABLE")?;

        Ok(WarehouseConfig {
            user: env.required("SNOWFLAKE_USER")?,
            password: env.required("SNOWFLAKE_PASSWORD")?,
            role: env.optional("SNOWFLAKE_ROLE"),
            warehouse: env.required("SNOWFLAKE_WAREHOUSE")?,
            database: env.required("SNOWFLAKE_DATABASE")?,
            schema: env.required("SNOWFLAKE_SCHEMA")?,
            account,
            host,
            log_table,
            http_timeout: env.timeout()?,
        })
    }

    /// Base URL for the session REST endpoints.
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.host)
        }
    }
}

impl NotifyConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Lookup(&lookup);
        Ok(NotifyConfig {
            topic_arn: env.required("SNS_TOPIC_ARN")?,
            region: env.required("AWS_DEFAULT_REGION")?,
            access_key_id: env.required("AWS_ACCESS_KEY_ID")?,
            secret_access_key: env.required("AWS_SECRET_ACCESS_KEY")?,
            session_token: env.optional("AWS_SESSION_TOKEN"),
            http_timeout: env.timeout()?,
        })
    }
}

struct Lookup<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .with_context(|| format!("{key} is required"))
    }

    fn timeout(&self) -> Result<Duration> {
        let secs = match self.optional("HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().context("Invalid HTTP_TIMEOUT_SECS")?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };
        Ok(Duration::from_secs(secs))
    }
}

/// Accepts `NAME`, `SCHEMA.NAME` or `DB.SCHEMA.NAME` made of unquoted identifier parts.
fn validate_identifier(name: &str) -> Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 3 {
        bail!("'{name}' has too many qualifiers");
    }
    for part in parts {
        let mut chars = part.chars();
        let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
            bail!("'{name}' is not a valid table identifier");
        }
    }
    Ok(())
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("host", &self.host)
            .field("log_table", &self.log_table)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl fmt::Debug for NotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("topic_arn", &self.topic_arn)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

use chrono::{DateTime, NaiveDateTime, Utc};

/// A warehouse user as reported by principal enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub has_pat: bool,
}

/// A token as listed for one principal, timestamps still tz-aware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredToken {
    pub name: String,
    pub created_on: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Identity of a log row for dedup purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub token_name: String,
    pub user_name: String,
    pub created_on: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl TokenKey {
    pub fn from_discovered(user_name: &str, token: &DiscoveredToken) -> Self {
        TokenKey {
            token_name: token.name.clone(),
            user_name: user_name.to_string(),
            created_on: token.created_on.naive_utc(),
            expires_at: token.expires_at.naive_utc(),
        }
    }
}

/// One row of the token log. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub key: TokenKey,
    /// When the collector wrote the row; not a delivery marker.
    pub notified_on: NaiveDateTime,
}

/// A log row as loaded back, columns left as the warehouse rendered them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRow {
    pub token_name: Option<String>,
    pub user_name: Option<String>,
    pub created_on: Option<String>,
    pub expires_at: Option<String>,
    pub notified_on: Option<String>,
}

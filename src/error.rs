/// Unified error type for the pat-watch jobs.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    // ── Warehouse ───────────────────────────────────────────────────────
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Warehouse login failed: {0}")]
    Login(String),

    #[error("Query failed ({code}): {message}")]
    Query { code: String, message: String },

    #[error("Unexpected value: {0}")]
    Decode(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    // ── Notification ────────────────────────────────────────────────────
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Request signing failed: {0}")]
    Signing(String),
}

impl WatchError {
    pub fn query(code: impl Into<String>, message: impl Into<String>) -> Self {
        WatchError::Query {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for WatchError {
    fn from(e: reqwest::Error) -> Self {
        tracing::error!("HTTP error: {e}");
        WatchError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(e: serde_json::Error) -> Self {
        WatchError::Decode(format!("invalid JSON: {e}"))
    }
}

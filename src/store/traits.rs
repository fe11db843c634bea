use async_trait::async_trait;

use super::record::{DiscoveredToken, LogRow, Principal, TokenKey, TokenRecord};
use crate::error::WatchError;

/// Read side of the warehouse: who has tokens, and what they are.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Every principal in the account, with its token-possession flag.
    async fn list_principals(&self) -> Result<Vec<Principal>, WatchError>;

    /// Tokens issued to one principal.
    async fn list_tokens(&self, user_name: &str) -> Result<Vec<DiscoveredToken>, WatchError>;
}

/// The persisted token log and the transaction its writes run in.
#[async_trait]
pub trait TokenLog: Send + Sync {
    /// Create the log table if it does not exist yet.
    async fn ensure_table(&self) -> Result<(), WatchError> {
        Ok(())
    }

    async fn begin(&self) -> Result<(), WatchError>;

    /// Whether a row with exactly this key is already recorded.
    async fn contains(&self, key: &TokenKey) -> Result<bool, WatchError>;

    async fn insert(&self, record: &TokenRecord) -> Result<(), WatchError>;

    async fn commit(&self) -> Result<(), WatchError>;

    async fn rollback(&self) -> Result<(), WatchError>;

    /// Full table content, unparsed.
    async fn load_all(&self) -> Result<Vec<LogRow>, WatchError>;
}

//! Token log storage and the warehouse it lives in.
//!
//! The log is a single append-only table. Rows are keyed for dedup by
//! (token_name, user_name, created_on, expires_at) and never updated.

pub mod record;
pub mod snowflake;
pub mod traits;

pub use record::{DiscoveredToken, LogRow, Principal, TokenKey, TokenRecord};
pub use snowflake::SnowflakeSession;
pub use traits::{TokenLog, Warehouse};

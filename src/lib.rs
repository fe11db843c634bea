pub mod collector;
pub mod config;
pub mod error;
pub mod notifier;
pub mod signing;
pub mod store;
pub mod timestamp;

#[cfg(test)]
mod testing;

pub use config::{NotifyConfig, WarehouseConfig};
pub use error::WatchError;

/// Install the fmt subscriber used by both job binaries.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

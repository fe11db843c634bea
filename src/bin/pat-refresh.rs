use anyhow::{Context, Result};
use tracing::info;

use pat_watch::collector;
use pat_watch::store::SnowflakeSession;
use pat_watch::WarehouseConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    pat_watch::init_tracing("pat_watch=info,pat_refresh=info");

    let config = WarehouseConfig::from_env()?;
    info!("pat-refresh v{}", env!("CARGO_PKG_VERSION"));
    info!("⏳ Connecting to Snowflake account {}...", config.account);

    let session = SnowflakeSession::connect(&config)
        .await
        .context("Failed to connect to Snowflake")?;

    let result = collector::collect(&session).await;
    session.close().await;

    let report = result.context("PAT refresh failed")?;
    if !report.failed_listings.is_empty() {
        info!(
            "Token listing failed for {} of {} users",
            report.failed_listings.len(),
            report.principals_with_tokens
        );
    }
    info!(
        "✅ Done! Inserted {} new PAT tokens ({} already recorded)",
        report.inserted, report.skipped_duplicates
    );

    Ok(())
}

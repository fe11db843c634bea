use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use pat_watch::notifier::{self, NotifyOutcome, SnsPublisher};
use pat_watch::store::SnowflakeSession;
use pat_watch::{NotifyConfig, WarehouseConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    pat_watch::init_tracing("pat_watch=info,pat_notify=info");

    let warehouse_config = WarehouseConfig::from_env()?;
    let notify_config = NotifyConfig::from_env()?;
    info!("pat-notify v{}", env!("CARGO_PKG_VERSION"));

    let publisher = SnsPublisher::new(&notify_config)?;

    info!("⏳ Connecting to Snowflake account {}...", warehouse_config.account);
    let session = SnowflakeSession::connect(&warehouse_config)
        .await
        .context("Failed to connect to Snowflake")?;

    let result = notifier::notify(&session, &publisher, &notify_config.topic_arn, Utc::now()).await;
    session.close().await;

    match result.context("PAT expiry notification failed")? {
        NotifyOutcome::NothingToSend => info!("✅ Nothing to notify"),
        NotifyOutcome::Sent { count, message_id } => {
            info!("✅ Notification for {count} PATs sent (message id {message_id})")
        }
    }

    Ok(())
}

//! Expiry notifier: finds logged tokens that expire within the next 7 days
//! and publishes one summary message for all of them.

pub mod sns;

pub use sns::SnsPublisher;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tracing::info;

use crate::error::WatchError;
use crate::store::{LogRow, TokenLog};
use crate::timestamp;

pub const WINDOW_DAYS: i64 = 7;
pub const SUBJECT: &str = "Snowflake PAT Tokens Expiring Soon";

/// Outbound notification channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one message to `topic`, returning the service's message id.
    async fn publish(&self, topic: &str, subject: &str, body: &str) -> Result<String, WatchError>;
}

/// A log row whose expiry falls inside the alert window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiringToken {
    pub user_name: String,
    pub token_name: String,
    pub expires_at: NaiveDateTime,
    pub notified_on: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    NothingToSend,
    Sent { count: usize, message_id: String },
}

/// Keep rows with `now <= expires_at <= now + 7 days`, in source order.
///
/// Rows whose `expires_at` is missing or unparseable never match.
pub fn select_expiring(rows: &[LogRow], now: DateTime<Utc>) -> Vec<ExpiringToken> {
    let now = now.naive_utc();
    let cutoff = now + Duration::days(WINDOW_DAYS);

    rows.iter()
        .filter_map(|row| {
            let expires_at = row.expires_at.as_deref().and_then(timestamp::parse_naive)?;
            if expires_at < now || expires_at > cutoff {
                return None;
            }
            Some(ExpiringToken {
                user_name: row.user_name.clone().unwrap_or_default(),
                token_name: row.token_name.clone().unwrap_or_default(),
                expires_at,
                notified_on: row.notified_on.as_deref().and_then(timestamp::parse_naive),
            })
        })
        .collect()
}

pub fn format_message(tokens: &[ExpiringToken]) -> String {
    let mut lines = vec![format!("🔐 *PAT Tokens Expiring Within {WINDOW_DAYS} Days:*\n")];
    lines.extend(tokens.iter().map(|t| {
        format!(
            "- 👤 User: {}, 🔑 Token: {}, ⏰ Expires: {} UTC",
            t.user_name,
            t.token_name,
            t.expires_at.format("%Y-%m-%d %H:%M")
        )
    }));
    lines.join("\n")
}

/// Load the log, filter to the expiry window and publish a summary if anything matched.
pub async fn notify<L, P>(
    log: &L,
    publisher: &P,
    topic: &str,
    now: DateTime<Utc>,
) -> Result<NotifyOutcome, WatchError>
where
    L: TokenLog + ?Sized,
    P: Publisher + ?Sized,
{
    let rows = log.load_all().await?;
    info!("Loaded {} rows from the token log", rows.len());

    let expiring = select_expiring(&rows, now);
    if expiring.is_empty() {
        info!("No PATs expiring in the next {WINDOW_DAYS} days");
        return Ok(NotifyOutcome::NothingToSend);
    }

    info!("📤 Sending notification for {} expiring PATs", expiring.len());
    let body = format_message(&expiring);
    let message_id = publisher.publish(topic, SUBJECT, &body).await?;

    Ok(NotifyOutcome::Sent {
        count: expiring.len(),
        message_id,
    })
}

//! Token collector: records every discovered PAT into the token log once.
//!
//! The whole run executes inside one warehouse transaction. It is committed
//! after the last insert and rolled back wholesale on any run-level error.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::WatchError;
use crate::store::{DiscoveredToken, TokenKey, TokenLog, TokenRecord, Warehouse};

/// Outcome of listing one principal's tokens.
#[derive(Debug)]
pub enum TokenListing {
    Listed(Vec<DiscoveredToken>),
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFailure {
    pub principal: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub principals_seen: usize,
    pub principals_with_tokens: usize,
    pub failed_listings: Vec<ListingFailure>,
    pub discovered: usize,
    pub inserted: usize,
    pub skipped_duplicates: usize,
}

/// List one principal's tokens, folding any error into [`TokenListing::Failed`].
pub async fn list_principal_tokens<W>(warehouse: &W, principal: &str) -> TokenListing
where
    W: Warehouse + ?Sized,
{
    match warehouse.list_tokens(principal).await {
        Ok(tokens) => TokenListing::Listed(tokens),
        Err(e) => TokenListing::Failed {
            reason: e.to_string(),
        },
    }
}

/// Insert `record` unless a row with the same key exists. Returns whether it was written.
pub async fn insert_if_absent<L>(log: &L, record: &TokenRecord) -> Result<bool, WatchError>
where
    L: TokenLog + ?Sized,
{
    if log.contains(&record.key).await? {
        return Ok(false);
    }
    log.insert(record).await?;
    Ok(true)
}

/// Run one collection pass, committing on success and rolling back on failure.
pub async fn collect<S>(session: &S) -> Result<RefreshReport, WatchError>
where
    S: Warehouse + TokenLog + ?Sized,
{
    session.ensure_table().await?;
    session.begin().await?;

    let outcome = match collect_in_transaction(session).await {
        Ok(report) => session.commit().await.map(|()| report),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(report) => Ok(report),
        Err(e) => {
            error!("❌ Collection failed, rolling back: {e}");
            if let Err(rollback_err) = session.rollback().await {
                error!("Rollback failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

async fn collect_in_transaction<S>(session: &S) -> Result<RefreshReport, WatchError>
where
    S: Warehouse + TokenLog + ?Sized,
{
    let principals = session.list_principals().await?;
    let mut report = RefreshReport {
        principals_seen: principals.len(),
        ..Default::default()
    };

    let holders: Vec<_> = principals.into_iter().filter(|p| p.has_pat).collect();
    report.principals_with_tokens = holders.len();
    info!("👤 Found {} users with PATs", holders.len());

    for principal in holders {
        let tokens = match list_principal_tokens(session, &principal.name).await {
            TokenListing::Listed(tokens) => tokens,
            TokenListing::Failed { reason } => {
                warn!("Skipping tokens for {}: {reason}", principal.name);
                report.failed_listings.push(ListingFailure {
                    principal: principal.name,
                    reason,
                });
                continue;
            }
        };

        for token in &tokens {
            report.discovered += 1;
            let record = TokenRecord {
                key: TokenKey::from_discovered(&principal.name, token),
                notified_on: Utc::now().naive_utc(),
            };
            if insert_if_absent(session, &record).await? {
                report.inserted += 1;
            } else {
                report.skipped_duplicates += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Principal;
    use crate::testing::{token, FakeWarehouse};
    use chrono::Duration;

    fn principal(name: &str, has_pat: bool) -> Principal {
        Principal {
            name: name.into(),
            has_pat,
        }
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let warehouse = FakeWarehouse::default();
        warehouse.add_principal(principal("ALICE", true), vec![token("CI", 10), token("DBT", 30)]);
        warehouse.add_principal(principal("BOB", true), vec![token("AIRFLOW", 3)]);

        let first = collect(&warehouse).await.unwrap();
        assert_eq!(first.inserted, 3);
        let after_first = warehouse.committed();

        let second = collect(&warehouse).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped_duplicates, 3);
        assert_eq!(warehouse.committed(), after_first);
    }

    #[tokio::test]
    async fn test_dedup_ignores_notified_on() {
        let warehouse = FakeWarehouse::default();
        let discovered = token("CI", 10);
        warehouse.add_principal(principal("ALICE", true), vec![discovered.clone()]);
        warehouse.seed_record(TokenRecord {
            key: TokenKey::from_discovered("ALICE", &discovered),
            notified_on: (Utc::now() - Duration::days(40)).naive_utc(),
        });

        let report = collect(&warehouse).await.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(warehouse.committed().len(), 1);
    }

    #[tokio::test]
    async fn test_rotated_token_is_a_new_record() {
        let warehouse = FakeWarehouse::default();
        let original = token("CI", 10);
        let mut rotated = original.clone();
        rotated.expires_at += Duration::days(90);
        warehouse.add_principal(principal("ALICE", true), vec![rotated]);
        warehouse.seed_record(TokenRecord {
            key: TokenKey::from_discovered("ALICE", &original),
            notified_on: Utc::now().naive_utc(),
        });

        let report = collect(&warehouse).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(warehouse.committed().len(), 2);
    }

    #[tokio::test]
    async fn test_principals_without_flag_are_ignored() {
        let warehouse = FakeWarehouse::default();
        warehouse.add_principal(principal("ALICE", true), vec![token("CI", 10)]);
        warehouse.add_principal(principal("BOB", false), vec![token("SHOULD_NOT_APPEAR", 10)]);

        let report = collect(&warehouse).await.unwrap();
        assert_eq!(report.principals_seen, 2);
        assert_eq!(report.principals_with_tokens, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(warehouse.listed_users(), vec!["ALICE".to_string()]);
        assert!(warehouse
            .committed()
            .iter()
            .all(|r| r.key.token_name != "SHOULD_NOT_APPEAR"));
    }

    #[tokio::test]
    async fn test_listing_failure_is_isolated() {
        let warehouse = FakeWarehouse::default();
        warehouse.add_principal(principal("ALICE", true), vec![token("CI", 10)]);
        warehouse.add_principal(principal("BOB", true), vec![token("AIRFLOW", 3)]);
        warehouse.fail_listing_for("ALICE");

        let report = collect(&warehouse).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.failed_listings.len(), 1);
        assert_eq!(report.failed_listings[0].principal, "ALICE");

        let committed = warehouse.committed();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].key.user_name, "BOB");
    }

    #[tokio::test]
    async fn test_insert_failure_rolls_back_everything() {
        let warehouse = FakeWarehouse::default();
        warehouse.add_principal(
            principal("ALICE", true),
            vec![token("T1", 1), token("T2", 2), token("T3", 3), token("T4", 4), token("T5", 5)],
        );
        warehouse.fail_insert_number(3);

        let err = collect(&warehouse).await.unwrap_err();
        assert!(matches!(err, WatchError::Query { .. }));
        assert!(warehouse.committed().is_empty());
        assert!(warehouse.rolled_back());
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back() {
        let warehouse = FakeWarehouse::default();
        warehouse.add_principal(principal("ALICE", true), vec![token("CI", 10)]);
        warehouse.fail_commit();

        let err = collect(&warehouse).await.unwrap_err();
        assert!(matches!(err, WatchError::Transaction(_)));
        assert!(warehouse.rolled_back());
        assert!(warehouse.committed().is_empty());
    }

    #[tokio::test]
    async fn test_principal_listing_failure_surfaces() {
        let warehouse = FakeWarehouse::default();
        warehouse.fail_principal_listing();

        assert!(collect(&warehouse).await.is_err());
        assert!(warehouse.rolled_back());
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let warehouse = FakeWarehouse::default();
        let record = TokenRecord {
            key: TokenKey::from_discovered("ALICE", &token("CI", 10)),
            notified_on: Utc::now().naive_utc(),
        };
        warehouse.begin().await.unwrap();
        assert!(insert_if_absent(&warehouse, &record).await.unwrap());
        assert!(!insert_if_absent(&warehouse, &record).await.unwrap());
    }
}

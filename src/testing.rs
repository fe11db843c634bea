//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::WatchError;
use crate::notifier::Publisher;
use crate::store::{DiscoveredToken, LogRow, Principal, TokenKey, TokenLog, TokenRecord, Warehouse};

/// A token created 2023-12-01 that expires `days` later.
pub fn token(name: &str, days: i64) -> DiscoveredToken {
    let created_on = Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap();
    DiscoveredToken {
        name: name.into(),
        created_on,
        expires_at: created_on + Duration::days(days),
    }
}

#[derive(Default)]
struct Inner {
    principals: Vec<(Principal, Vec<DiscoveredToken>)>,
    failing_listings: HashSet<String>,
    fail_principals: bool,
    fail_insert_at: Option<usize>,
    fail_commit: bool,
    inserts_this_tx: usize,
    in_tx: bool,
    staged: Vec<TokenRecord>,
    committed: Vec<TokenRecord>,
    seeded_rows: Vec<LogRow>,
    rolled_back: bool,
    listed: Vec<String>,
}

/// Warehouse + token log with a staged transaction buffer.
#[derive(Default)]
pub struct FakeWarehouse {
    inner: Mutex<Inner>,
}

impl FakeWarehouse {
    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut guard = self.inner.lock().unwrap();
        f(&mut *guard)
    }

    pub fn add_principal(&self, principal: Principal, tokens: Vec<DiscoveredToken>) {
        self.with(|i| i.principals.push((principal, tokens)));
    }

    pub fn fail_listing_for(&self, user: &str) {
        self.with(|i| i.failing_listings.insert(user.to_string()));
    }

    pub fn fail_principal_listing(&self) {
        self.with(|i| i.fail_principals = true);
    }

    /// Make the n-th insert (1-based) of each transaction fail.
    pub fn fail_insert_number(&self, n: usize) {
        self.with(|i| i.fail_insert_at = Some(n));
    }

    pub fn fail_commit(&self) {
        self.with(|i| i.fail_commit = true);
    }

    pub fn seed_record(&self, record: TokenRecord) {
        self.with(|i| i.committed.push(record));
    }

    pub fn seed_log(&self, rows: Vec<LogRow>) {
        self.with(|i| i.seeded_rows.extend(rows));
    }

    pub fn committed(&self) -> Vec<TokenRecord> {
        self.with(|i| i.committed.clone())
    }

    pub fn rolled_back(&self) -> bool {
        self.with(|i| i.rolled_back)
    }

    pub fn listed_users(&self) -> Vec<String> {
        self.with(|i| i.listed.clone())
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn list_principals(&self) -> Result<Vec<Principal>, WatchError> {
        self.with(|i| {
            if i.fail_principals {
                return Err(WatchError::query("390100", "SHOW USERS not permitted"));
            }
            Ok(i.principals.iter().map(|(p, _)| p.clone()).collect())
        })
    }

    async fn list_tokens(&self, user_name: &str) -> Result<Vec<DiscoveredToken>, WatchError> {
        self.with(|i| {
            i.listed.push(user_name.to_string());
            if i.failing_listings.contains(user_name) {
                return Err(WatchError::query("003001", "Insufficient privileges"));
            }
            Ok(i.principals
                .iter()
                .find(|(p, _)| p.name == user_name)
                .map(|(_, tokens)| tokens.clone())
                .unwrap_or_default())
        })
    }
}

#[async_trait]
impl TokenLog for FakeWarehouse {
    async fn begin(&self) -> Result<(), WatchError> {
        self.with(|i| {
            i.in_tx = true;
            i.inserts_this_tx = 0;
            i.staged.clear();
        });
        Ok(())
    }

    async fn contains(&self, key: &TokenKey) -> Result<bool, WatchError> {
        Ok(self.with(|i| {
            i.committed
                .iter()
                .chain(i.staged.iter())
                .any(|r| &r.key == key)
        }))
    }

    async fn insert(&self, record: &TokenRecord) -> Result<(), WatchError> {
        self.with(|i| {
            if !i.in_tx {
                return Err(WatchError::Transaction("no open transaction".into()));
            }
            i.inserts_this_tx += 1;
            if i.fail_insert_at == Some(i.inserts_this_tx) {
                return Err(WatchError::query("100072", "NULL result in a non-nullable column"));
            }
            i.staged.push(record.clone());
            Ok(())
        })
    }

    async fn commit(&self) -> Result<(), WatchError> {
        self.with(|i| {
            if i.fail_commit {
                return Err(WatchError::Transaction("commit failed: warehouse suspended".into()));
            }
            let staged = std::mem::take(&mut i.staged);
            i.committed.extend(staged);
            i.in_tx = false;
            Ok(())
        })
    }

    async fn rollback(&self) -> Result<(), WatchError> {
        self.with(|i| {
            i.staged.clear();
            i.in_tx = false;
            i.rolled_back = true;
        });
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<LogRow>, WatchError> {
        let fmt = "%Y-%m-%d %H:%M:%S%.f";
        Ok(self.with(|i| {
            let committed = i.committed.iter().map(|r| LogRow {
                token_name: Some(r.key.token_name.clone()),
                user_name: Some(r.key.user_name.clone()),
                created_on: Some(r.key.created_on.format(fmt).to_string()),
                expires_at: Some(r.key.expires_at.format(fmt).to_string()),
                notified_on: Some(r.notified_on.format(fmt).to_string()),
            });
            i.seeded_rows.iter().cloned().chain(committed).collect()
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub topic: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<SentMessage>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, subject: &str, body: &str) -> Result<String, WatchError> {
        if self.fail {
            return Err(WatchError::Publish("AuthorizationError: not authorized".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(SentMessage {
            topic: topic.into(),
            subject: subject.into(),
            body: body.into(),
        });
        Ok(format!("msg-{}", sent.len()))
    }
}

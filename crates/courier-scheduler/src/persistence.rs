//! SQLite-backed scheduler store.
//! Shared by every worker process pointing at the same database file:
//! claims run inside `BEGIN IMMEDIATE` so only one writer can lease a key.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::error::{CourierError, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use crate::item::{ItemState, ScheduledItem, SchedulerBatch};
use crate::store::{offset_by, EnqueueMode, FailOutcome, SchedulerStore};

const ITEM_COLUMNS: &str = "id, key, payload, due_time, retry_count, lease_owner, lease_expiry, state, last_error, created_at";

/// SQLite persistence for scheduled items.
/// Statements run on the blocking pool, so a writer waiting on another
/// process's lock never stalls a runtime thread.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    max_retries: u32,
}

impl SqliteStore {
    /// Open or create the scheduler database.
    pub fn open(path: &Path, max_retries: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CourierError::StoreUnavailable(format!("DB open: {e}")))?;
        Self::with_connection(conn, max_retries)
    }

    /// Private in-memory database, visible to this instance only.
    pub fn open_in_memory(max_retries: u32) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CourierError::StoreUnavailable(format!("DB open: {e}")))?;
        Self::with_connection(conn, max_retries)
    }

    fn with_connection(conn: Connection, max_retries: u32) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(store_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(store_err)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_retries,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| CourierError::Store("connection lock poisoned".into()))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| CourierError::Store(format!("Task join error: {e}")))?
    }
}

/// Run migrations to create tables.
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Deferred work; several rows may share a key (append mode, enqueue during a lease)
        CREATE TABLE IF NOT EXISTS scheduled_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL,
            payload BLOB NOT NULL,
            due_time INTEGER NOT NULL,       -- unix millis
            retry_count INTEGER NOT NULL DEFAULT 0,
            lease_owner TEXT,
            lease_expiry INTEGER,            -- unix millis
            state TEXT NOT NULL DEFAULT 'pending',  -- pending, dead
            last_error TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_scheduled_items_key ON scheduled_items(key, state);
        CREATE INDEX IF NOT EXISTS idx_scheduled_items_due ON scheduled_items(state, due_time);
        ",
    )
    .map_err(|e| CourierError::Store(format!("Migration: {e}")))
}

#[async_trait]
impl SchedulerStore for SqliteStore {
    async fn enqueue(
        &self,
        key: &str,
        payload: Vec<u8>,
        due_time: DateTime<Utc>,
        mode: EnqueueMode,
    ) -> Result<()> {
        let key = key.to_string();
        self.blocking(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(store_err)?;

            let collapsed = if mode == EnqueueMode::Replace {
                tx.execute(
                    "UPDATE scheduled_items SET payload = ?1, due_time = MIN(due_time, ?2)
                     WHERE id = (SELECT MAX(id) FROM scheduled_items
                                 WHERE key = ?3 AND state = 'pending' AND lease_owner IS NULL)",
                    params![payload, due_time.timestamp_millis(), key],
                )
                .map_err(store_err)?
            } else {
                0
            };

            if collapsed == 0 {
                tx.execute(
                    "INSERT INTO scheduled_items (key, payload, due_time, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![key, payload, due_time.timestamp_millis(), Utc::now().timestamp_millis()],
                )
                .map_err(store_err)?;
            } else {
                tracing::debug!("🔁 Collapsed pending item for '{}'", key);
            }
            tx.commit().map_err(store_err)
        })
        .await
    }

    async fn claim_due(
        &self,
        limit: usize,
        lease_duration: Duration,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SchedulerBatch>> {
        let now_ms = now.timestamp_millis();
        let expiry = offset_by(now, lease_duration);
        let owner = owner.to_string();

        self.blocking(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(store_err)?;

            let keys: Vec<String> = {
                let mut stmt = tx
                    .prepare(
                        "SELECT key FROM scheduled_items
                         WHERE state = 'pending'
                         GROUP BY key
                         HAVING MIN(due_time) <= ?1
                            AND SUM(CASE WHEN lease_owner IS NOT NULL AND lease_expiry > ?1 THEN 1 ELSE 0 END) = 0
                         ORDER BY MIN(due_time)
                         LIMIT ?2",
                    )
                    .map_err(store_err)?;
                let rows = stmt
                    .query_map(params![now_ms, limit as i64], |row| row.get(0))
                    .map_err(store_err)?;
                rows.collect::<rusqlite::Result<_>>().map_err(store_err)?
            };

            let mut batches = Vec::with_capacity(keys.len());
            for key in keys {
                tx.execute(
                    "UPDATE scheduled_items SET lease_owner = ?1, lease_expiry = ?2
                     WHERE key = ?3 AND state = 'pending'",
                    params![owner, expiry.timestamp_millis(), key],
                )
                .map_err(store_err)?;

                let items: Vec<ScheduledItem> = {
                    let mut stmt = tx
                        .prepare(&format!(
                            "SELECT {ITEM_COLUMNS} FROM scheduled_items
                             WHERE key = ?1 AND state = 'pending' ORDER BY id"
                        ))
                        .map_err(store_err)?;
                    let rows = stmt.query_map([&key], row_to_item).map_err(store_err)?;
                    rows.collect::<rusqlite::Result<_>>().map_err(store_err)?
                };
                batches.push(SchedulerBatch::new(key, items, expiry));
            }

            tx.commit().map_err(store_err)?;
            Ok(batches)
        })
        .await
    }

    async fn complete(&self, key: &str, owner: &str) -> Result<bool> {
        let (key, owner) = (key.to_string(), owner.to_string());
        self.blocking(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM scheduled_items
                     WHERE key = ?1 AND state = 'pending' AND lease_owner = ?2",
                    params![key, owner],
                )
                .map_err(store_err)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn fail(
        &self,
        key: &str,
        owner: &str,
        next_due: DateTime<Utc>,
        retry_count: u32,
        error: &str,
    ) -> Result<FailOutcome> {
        let dead = retry_count > self.max_retries;
        let (key, owner, error) = (key.to_string(), owner.to_string(), error.to_string());
        self.blocking(move |conn| {
            let changed = if dead {
                conn.execute(
                    "UPDATE scheduled_items
                     SET state = 'dead', lease_owner = NULL, lease_expiry = NULL,
                         retry_count = ?1, last_error = ?2
                     WHERE key = ?3 AND state = 'pending' AND lease_owner = ?4",
                    params![retry_count, error, key, owner],
                )
            } else {
                conn.execute(
                    "UPDATE scheduled_items
                     SET due_time = ?1, lease_owner = NULL, lease_expiry = NULL,
                         retry_count = ?2, last_error = ?3
                     WHERE key = ?4 AND state = 'pending' AND lease_owner = ?5",
                    params![next_due.timestamp_millis(), retry_count, error, key, owner],
                )
            }
            .map_err(store_err)?;

            Ok(match (changed, dead) {
                (0, _) => FailOutcome::LeaseLost,
                (_, true) => FailOutcome::Dead,
                (_, false) => FailOutcome::Rescheduled,
            })
        })
        .await
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<usize> {
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE scheduled_items SET lease_owner = NULL, lease_expiry = NULL
                 WHERE lease_owner IS NOT NULL AND lease_expiry <= ?1",
                [now.timestamp_millis()],
            )
            .map_err(store_err)
        })
        .await
    }

    async fn cancel(&self, key: &str) -> Result<usize> {
        let key = key.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM scheduled_items
                 WHERE key = ?1 AND state = 'pending' AND lease_owner IS NULL",
                [key],
            )
            .map_err(store_err)
        })
        .await
    }

    async fn dead_items(&self, limit: usize) -> Result<Vec<ScheduledItem>> {
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM scheduled_items WHERE state = 'dead' ORDER BY id LIMIT ?1"
                ))
                .map_err(store_err)?;
            let rows = stmt
                .query_map([limit as i64], row_to_item)
                .map_err(store_err)?;
            rows.collect::<rusqlite::Result<_>>().map_err(store_err)
        })
        .await
    }

    async fn pending_count(&self) -> Result<usize> {
        self.blocking(|conn| {
            let count: Option<i64> = conn
                .query_row(
                    "SELECT COUNT(*) FROM scheduled_items WHERE state = 'pending'",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)?;
            Ok(count.unwrap_or(0) as usize)
        })
        .await
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledItem> {
    let state: String = row.get(7)?;
    Ok(ScheduledItem {
        id: row.get(0)?,
        key: row.get(1)?,
        payload: row.get(2)?,
        due_time: from_millis(row.get(3)?),
        retry_count: row.get(4)?,
        lease_owner: row.get(5)?,
        lease_expiry: row.get::<_, Option<i64>>(6)?.map(from_millis),
        state: if state == ItemState::Dead.as_str() {
            ItemState::Dead
        } else {
            ItemState::Pending
        },
        last_error: row.get(8)?,
        created_at: from_millis(row.get(9)?),
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Busy/locked databases are an outage, anything else is a store error.
fn store_err(e: rusqlite::Error) -> CourierError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
            ) =>
        {
            CourierError::StoreUnavailable(e.to_string())
        }
        _ => CourierError::Store(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(10);

    /// Millisecond-aligned "now", matching what the table stores.
    fn now_ms() -> DateTime<Utc> {
        from_millis(Utc::now().timestamp_millis())
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[tokio::test]
    async fn test_open_and_migrate() {
        let store = SqliteStore::open_in_memory(3).unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert!(store.dead_items(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_collapses_to_latest_payload() {
        let store = SqliteStore::open_in_memory(3).unwrap();
        let t0 = now_ms();
        store.enqueue("n1:email", b"p1".to_vec(), t0 + secs(10), EnqueueMode::Replace).await.unwrap();
        store.enqueue("n1:email", b"p2".to_vec(), t0 + secs(3), EnqueueMode::Replace).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 1);

        let batches = store.claim_due(5, LEASE, "w1", t0 + secs(3)).await.unwrap();
        assert_eq!(batches.len(), 1);
        let item = &batches[0].items[0];
        assert_eq!(item.payload, b"p2".to_vec());
        assert_eq!(item.due_time, t0 + secs(3));
        assert_eq!(item.lease_owner.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_due_order() {
        let store = SqliteStore::open_in_memory(3).unwrap();
        let t0 = now_ms();
        store.enqueue("late", b"x".to_vec(), t0 - secs(1), EnqueueMode::Replace).await.unwrap();
        store.enqueue("early", b"x".to_vec(), t0 - secs(5), EnqueueMode::Replace).await.unwrap();
        store.enqueue("future", b"x".to_vec(), t0 + secs(60), EnqueueMode::Replace).await.unwrap();

        let batches = store.claim_due(1, LEASE, "w1", t0).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].key, "early");

        let rest = store.claim_due(10, LEASE, "w1", t0).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].key, "late");
    }

    #[tokio::test]
    async fn test_two_workers_share_one_file() {
        let dir = std::env::temp_dir().join(format!("courier-sched-db-{}", uuid::Uuid::new_v4()));
        let path = dir.join("sched.db");
        let a = SqliteStore::open(&path, 3).unwrap();
        let b = SqliteStore::open(&path, 3).unwrap();
        let t0 = now_ms();

        a.enqueue("k", b"p".to_vec(), t0, EnqueueMode::Replace).await.unwrap();
        assert_eq!(a.claim_due(10, LEASE, "worker-a", t0).await.unwrap().len(), 1);
        assert!(b.claim_due(10, LEASE, "worker-b", t0).await.unwrap().is_empty());

        // worker-a never finishes; after the lease the key is b's.
        assert_eq!(b.release_expired_leases(t0 + secs(10)).await.unwrap(), 1);
        assert_eq!(b.claim_due(10, LEASE, "worker-b", t0 + secs(10)).await.unwrap().len(), 1);
        assert!(!a.complete("k", "worker-a").await.unwrap());
        assert!(b.complete("k", "worker-b").await.unwrap());

        drop(a);
        drop(b);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_locked_database_does_not_stall_runtime() {
        let dir = std::env::temp_dir().join(format!("courier-sched-db-{}", uuid::Uuid::new_v4()));
        let path = dir.join("sched.db");
        let store = Arc::new(SqliteStore::open(&path, 3).unwrap());
        let t0 = now_ms();
        store.enqueue("k", b"p".to_vec(), t0, EnqueueMode::Replace).await.unwrap();

        // Another process holds the write lock.
        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let claim = {
            let store = store.clone();
            tokio::spawn(async move { store.claim_due(10, LEASE, "w1", t0).await })
        };
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(1));

        holder.execute_batch("COMMIT;").unwrap();
        assert_eq!(claim.await.unwrap().unwrap().len(), 1);

        drop(holder);
        drop(store);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claimers_lease_each_key_once() {
        let dir = std::env::temp_dir().join(format!("courier-sched-db-{}", uuid::Uuid::new_v4()));
        let path = dir.join("sched.db");
        let stores = [
            Arc::new(SqliteStore::open(&path, 3).unwrap()),
            Arc::new(SqliteStore::open(&path, 3).unwrap()),
        ];
        let t0 = now_ms();
        for i in 0..20 {
            stores[0]
                .enqueue(&format!("n{i}:email"), b"p".to_vec(), t0, EnqueueMode::Replace)
                .await
                .unwrap();
        }

        let mut claimers = tokio::task::JoinSet::new();
        for worker in 0..8 {
            let store = stores[worker % 2].clone();
            claimers.spawn(async move {
                let owner = format!("worker-{worker}");
                let mut claimed = Vec::new();
                loop {
                    let batches = store.claim_due(3, LEASE, &owner, t0).await.unwrap();
                    if batches.is_empty() {
                        break;
                    }
                    claimed.extend(batches.into_iter().map(|b| b.key));
                }
                claimed
            });
        }

        let mut counts = std::collections::HashMap::new();
        while let Some(joined) = claimers.join_next().await {
            for key in joined.unwrap() {
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        assert_eq!(counts.len(), 20);
        assert!(counts.values().all(|&n| n == 1), "{counts:?}");

        drop(stores);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_fail_then_dead_letter() {
        let store = SqliteStore::open_in_memory(0).unwrap();
        let t0 = now_ms();
        store.enqueue("k", b"p".to_vec(), t0, EnqueueMode::Replace).await.unwrap();
        store.claim_due(10, LEASE, "w1", t0).await.unwrap();

        let outcome = store.fail("k", "w1", t0 + secs(5), 1, "provider 503").await.unwrap();
        assert_eq!(outcome, FailOutcome::Dead);
        assert_eq!(store.pending_count().await.unwrap(), 0);
        let dead = store.dead_items(10).await.unwrap();
        assert_eq!(dead[0].state, ItemState::Dead);
        assert_eq!(dead[0].last_error.as_deref(), Some("provider 503"));
        assert!(store.claim_due(10, LEASE, "w1", t0 + secs(60)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_reschedules_with_new_due_time() {
        let store = SqliteStore::open_in_memory(5).unwrap();
        let t0 = now_ms();
        store.enqueue("k", b"p".to_vec(), t0, EnqueueMode::Replace).await.unwrap();
        store.claim_due(10, LEASE, "w1", t0).await.unwrap();

        let outcome = store.fail("k", "w1", t0 + secs(4), 1, "timeout").await.unwrap();
        assert_eq!(outcome, FailOutcome::Rescheduled);
        assert!(store.claim_due(10, LEASE, "w1", t0 + secs(3)).await.unwrap().is_empty());
        let batch = store.claim_due(10, LEASE, "w1", t0 + secs(4)).await.unwrap();
        assert_eq!(batch[0].retry_count, 1);
        assert_eq!(store.fail("k", "other", t0, 2, "x").await.unwrap(), FailOutcome::LeaseLost);
    }
}

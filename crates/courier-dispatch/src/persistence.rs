//! SQLite-backed notification tracker, shareable by every worker process.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::error::{CourierError, Result};
use courier_core::types::{
    ChannelKind, ChannelSendInfo, ConfirmMode, SendStatus, UserNotification,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::tracker::{check_transition, NotificationTracker, OutcomeWrite};

/// SQLite persistence for tracking views and channel outcomes.
/// Statements run on the blocking pool, like the scheduler store.
pub struct SqliteTracker {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTracker {
    /// Open or create the tracker tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| CourierError::Tracker(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CourierError::Tracker(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS notification_tracking (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                app_id TEXT NOT NULL,
                confirm_mode TEXT NOT NULL DEFAULT 'none',   -- explicit, none
                is_seen INTEGER NOT NULL DEFAULT 0,
                seen_at INTEGER,
                is_confirmed INTEGER NOT NULL DEFAULT 0,
                confirmed_at INTEGER,
                created_at INTEGER NOT NULL
            );

            -- One row per (notification, channel); status only moves forward
            CREATE TABLE IF NOT EXISTS channel_outcomes (
                notification_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                status TEXT NOT NULL,
                last_update INTEGER NOT NULL,
                detail TEXT,
                attempt INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (notification_id, channel),
                FOREIGN KEY (notification_id) REFERENCES notification_tracking(id) ON DELETE CASCADE
            );
         ",
        )
        .map_err(|e| CourierError::Tracker(format!("Migration: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
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
                .map_err(|_| CourierError::Tracker("connection lock poisoned".into()))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| CourierError::Tracker(format!("Task join error: {e}")))?
    }
}

/// Set a monotonic flag column. `Ok(false)` when it was already set.
fn set_flag(conn: &Connection, id: &str, flag: &str, stamp: &str) -> Result<bool> {
    let changed = conn
        .execute(
            &format!(
                "UPDATE notification_tracking SET {flag} = 1, {stamp} = ?1
                 WHERE id = ?2 AND {flag} = 0"
            ),
            params![Utc::now().timestamp_millis(), id],
        )
        .map_err(db_err)?;
    if changed > 0 {
        return Ok(true);
    }
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM notification_tracking WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    match exists {
        Some(_) => Ok(false),
        None => Err(CourierError::NotFound(format!("notification {id}"))),
    }
}

fn insert_view(conn: &mut Connection, notification: &UserNotification) -> Result<bool> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(db_err)?;
    let created = tx
        .execute(
            "INSERT OR IGNORE INTO notification_tracking
             (id, user_id, app_id, confirm_mode, is_seen, seen_at, is_confirmed, confirmed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                notification.id,
                notification.user_id,
                notification.app_id,
                notification.confirm_mode.as_str(),
                notification.is_seen as i32,
                notification.seen_at.map(|t| t.timestamp_millis()),
                notification.is_confirmed as i32,
                notification.confirmed_at.map(|t| t.timestamp_millis()),
                notification.created_at.timestamp_millis(),
            ],
        )
        .map_err(db_err)?
        > 0;
    if created {
        for (channel, info) in &notification.channels {
            tx.execute(
                "INSERT INTO channel_outcomes (notification_id, channel, status, last_update, detail, attempt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    notification.id,
                    channel.as_str(),
                    info.status.as_str(),
                    info.last_update.timestamp_millis(),
                    info.detail,
                    info.attempt,
                ],
            )
            .map_err(db_err)?;
        }
    }
    tx.commit().map_err(db_err)?;
    Ok(created)
}

fn load_view(conn: &Connection, id: &str) -> Result<Option<UserNotification>> {
    let row = conn
        .query_row(
            "SELECT id, user_id, app_id, confirm_mode, is_seen, seen_at, is_confirmed, confirmed_at, created_at
             FROM notification_tracking WHERE id = ?1",
            [id],
            |row| {
                let confirm_mode: String = row.get(3)?;
                Ok(UserNotification {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    app_id: row.get(2)?,
                    confirm_mode: if confirm_mode == ConfirmMode::Explicit.as_str() {
                        ConfirmMode::Explicit
                    } else {
                        ConfirmMode::None
                    },
                    is_seen: row.get::<_, i32>(4)? != 0,
                    seen_at: row.get::<_, Option<i64>>(5)?.map(from_millis),
                    is_confirmed: row.get::<_, i32>(6)? != 0,
                    confirmed_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
                    channels: Default::default(),
                    created_at: from_millis(row.get(8)?),
                })
            },
        )
        .optional()
        .map_err(db_err)?;

    let Some(mut notification) = row else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT channel, status, last_update, detail, attempt
             FROM channel_outcomes WHERE notification_id = ?1",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, u32>(4)?,
            ))
        })
        .map_err(db_err)?;

    for row in rows {
        let (channel, status, last_update, detail, attempt) = row.map_err(db_err)?;
        let (Ok(channel), Ok(status)) = (channel.parse::<ChannelKind>(), status.parse::<SendStatus>())
        else {
            tracing::warn!("⚠️ Skipping unreadable outcome row for {}: {}/{}", id, channel, status);
            continue;
        };
        notification.channels.insert(
            channel,
            ChannelSendInfo {
                status,
                last_update: from_millis(last_update),
                detail,
                attempt,
            },
        );
    }
    Ok(Some(notification))
}

/// Check and write one outcome inside a single write transaction.
fn write_outcome(
    conn: &mut Connection,
    id: &str,
    channel: ChannelKind,
    info: &ChannelSendInfo,
) -> Result<OutcomeWrite> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(db_err)?;

    let known: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM notification_tracking WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if known.is_none() {
        return Err(CourierError::NotFound(format!("notification {id}")));
    }

    let current: Option<String> = tx
        .query_row(
            "SELECT status FROM channel_outcomes WHERE notification_id = ?1 AND channel = ?2",
            params![id, channel.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let current = current.and_then(|s| s.parse::<SendStatus>().ok());

    let write = check_transition(id, channel, current, info.status);
    if write == OutcomeWrite::Applied {
        tx.execute(
            "INSERT OR REPLACE INTO channel_outcomes
             (notification_id, channel, status, last_update, detail, attempt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                channel.as_str(),
                info.status.as_str(),
                info.last_update.timestamp_millis(),
                info.detail,
                info.attempt,
            ],
        )
        .map_err(db_err)?;
    }
    tx.commit().map_err(db_err)?;
    Ok(write)
}

#[async_trait]
impl NotificationTracker for SqliteTracker {
    async fn register(&self, notification: &UserNotification) -> Result<bool> {
        let notification = notification.clone();
        self.blocking(move |conn| insert_view(conn, &notification))
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<UserNotification>> {
        let id = id.to_string();
        self.blocking(move |conn| load_view(conn, &id)).await
    }

    async fn mark_seen(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.blocking(move |conn| set_flag(conn, &id, "is_seen", "seen_at"))
            .await
    }

    async fn mark_confirmed(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.blocking(move |conn| set_flag(conn, &id, "is_confirmed", "confirmed_at"))
            .await
    }

    async fn record_channel_outcome(
        &self,
        id: &str,
        channel: ChannelKind,
        info: ChannelSendInfo,
    ) -> Result<OutcomeWrite> {
        let id = id.to_string();
        self.blocking(move |conn| write_outcome(conn, &id, channel, &info))
            .await
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn db_err(e: rusqlite::Error) -> CourierError {
    CourierError::Tracker(e.to_string())
}

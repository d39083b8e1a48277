//! Publisher store
//!
//! Embedded SQLite persistence for publishers, live state, channel bindings
//! and notification state. Each logical [`Bucket`] is one table, created
//! idempotently when the store is opened.
//!
//! Updates whose correctness depends on the current value ("mark live only
//! if offline", "write only on change") are issued as single conditional
//! statements, so concurrent callers are serialized by SQLite's writer lock
//! and never interleave between the check and the write.

mod buckets;

pub use buckets::Bucket;

use crate::models::{ExternalLiveState, Publisher, PublisherSummary, RtmpLiveState, StreamInfo, StreamStatus};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Store location and pool sizing
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    /// How long a writer waits for the SQLite lock before failing
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub const DB_FILE: &'static str = "rtmpauthbot.db";

    /// Database file `rtmpauthbot.db` inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(Self::DB_FILE),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of [`PublisherStore::try_mark_live`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkLive {
    Marked(Uuid),
    AlreadyLive(Uuid),
    UnknownKey,
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    is_live: Option<bool>,
    since: Option<DateTime<Utc>>,
    channel: Option<String>,
}

impl From<SummaryRow> for PublisherSummary {
    fn from(row: SummaryRow) -> Self {
        let is_live = row.is_live.unwrap_or(false);
        Self {
            id: row.id,
            created_at: row.created_at,
            is_live,
            live_since: if is_live { row.since } else { None },
            channel: row.channel,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ExternalRow {
    channel: String,
    is_live: bool,
    observed_at: DateTime<Utc>,
    title: Option<String>,
    category: Option<String>,
    viewer_count: Option<i64>,
}

impl From<ExternalRow> for ExternalLiveState {
    fn from(row: ExternalRow) -> Self {
        let info = match (row.title, row.category, row.viewer_count) {
            (Some(title), Some(category), Some(viewer_count)) => Some(StreamInfo {
                title,
                category,
                viewer_count,
            }),
            _ => None,
        };
        Self {
            channel: row.channel,
            is_live: row.is_live,
            observed_at: row.observed_at,
            info,
        }
    }
}

const SUMMARY_SELECT: &str = "SELECT p.id, p.created_at, r.is_live, r.since, b.channel
     FROM publishers p
     LEFT JOIN rtmp_live r ON r.publisher_id = p.id
     LEFT JOIN channel_bindings b ON b.publisher_id = p.id";

/// Handle to the publisher store. Cloning shares the underlying pool; open
/// once at startup and hand clones to each component.
#[derive(Clone)]
pub struct PublisherStore {
    pool: SqlitePool,
}

impl PublisherStore {
    pub async fn open(config: &StoreConfig) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_buckets(Bucket::ALL).await?;

        info!(path = %config.path.display(), "Publisher store opened");
        Ok(store)
    }

    /// Create every listed bucket that does not exist yet
    pub async fn ensure_buckets(&self, buckets: &[Bucket]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for bucket in buckets {
            debug!(%bucket, "Ensuring bucket exists");
            sqlx::query(bucket.schema()).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---- Config bucket ----

    pub async fn get_config(&self, key: &str) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn put_config(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_config(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM config WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- Publisher / RTMP live buckets ----

    /// Insert a publisher together with its offline live-state entry.
    ///
    /// Returns `false` without writing anything if the stream key (or id) is
    /// already taken.
    pub async fn insert_publisher(&self, publisher: &Publisher) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO publishers (id, stream_key, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(publisher.id)
        .bind(&publisher.stream_key)
        .bind(publisher.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        sqlx::query("INSERT INTO rtmp_live (publisher_id, is_live, since) VALUES (?1, 0, ?2)")
            .bind(publisher.id)
            .bind(publisher.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_publisher(&self, id: Uuid) -> StoreResult<Option<Publisher>> {
        let row = sqlx::query_as::<_, (Uuid, String, DateTime<Utc>)>(
            "SELECT id, stream_key, created_at FROM publishers WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, stream_key, created_at)| Publisher {
            id,
            stream_key,
            created_at,
        }))
    }

    pub async fn publisher_summary(&self, id: Uuid) -> StoreResult<Option<PublisherSummary>> {
        let row = sqlx::query_as::<_, SummaryRow>(&format!("{SUMMARY_SELECT} WHERE p.id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PublisherSummary::from))
    }

    pub async fn list_publishers(&self) -> StoreResult<Vec<PublisherSummary>> {
        let rows = sqlx::query_as::<_, SummaryRow>(&format!("{SUMMARY_SELECT} ORDER BY p.created_at"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(PublisherSummary::from).collect())
    }

    /// Delete a publisher with its live state and channel binding.
    /// Returns whether the publisher existed.
    pub async fn delete_publisher(&self, id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rtmp_live WHERE publisher_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM channel_bindings WHERE publisher_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM publishers WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    /// Mark the publisher owning `stream_key` live, but only if it is
    /// currently offline. The check and the write are one statement.
    pub async fn try_mark_live(&self, stream_key: &str, at: DateTime<Utc>) -> StoreResult<MarkLive> {
        let marked = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO rtmp_live (publisher_id, is_live, since)
             SELECT id, 1, ?2 FROM publishers WHERE stream_key = ?1
             ON CONFLICT(publisher_id) DO UPDATE SET is_live = 1, since = excluded.since
             WHERE rtmp_live.is_live = 0
             RETURNING publisher_id",
        )
        .bind(stream_key)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = marked {
            return Ok(MarkLive::Marked(id));
        }

        let owner = sqlx::query_scalar::<_, Uuid>("SELECT id FROM publishers WHERE stream_key = ?1")
            .bind(stream_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match owner {
            Some(id) => MarkLive::AlreadyLive(id),
            None => MarkLive::UnknownKey,
        })
    }

    /// Mark the publisher owning `stream_key` offline. `since` only moves
    /// when the state actually flips. Returns the publisher id, if known.
    pub async fn mark_offline(&self, stream_key: &str, at: DateTime<Utc>) -> StoreResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "UPDATE rtmp_live
             SET since = CASE WHEN is_live = 1 THEN ?2 ELSE since END, is_live = 0
             WHERE publisher_id = (SELECT id FROM publishers WHERE stream_key = ?1)
             RETURNING publisher_id",
        )
        .bind(stream_key)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn rtmp_live_state(&self, publisher_id: Uuid) -> StoreResult<Option<RtmpLiveState>> {
        let row = sqlx::query_as::<_, (bool, DateTime<Utc>)>(
            "SELECT is_live, since FROM rtmp_live WHERE publisher_id = ?1",
        )
        .bind(publisher_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(is_live, since)| RtmpLiveState { is_live, since }))
    }

    // ---- Channel binding bucket ----

    /// Bind (or rebind) a publisher to an external channel.
    /// Returns `false` if the publisher does not exist.
    pub async fn bind_channel(&self, publisher_id: Uuid, channel: &str) -> StoreResult<bool> {
        let affected = sqlx::query(
            "INSERT INTO channel_bindings (publisher_id, channel)
             SELECT id, ?2 FROM publishers WHERE id = ?1
             ON CONFLICT(publisher_id) DO UPDATE SET channel = excluded.channel",
        )
        .bind(publisher_id)
        .bind(channel)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    pub async fn unbind_channel(&self, publisher_id: Uuid) -> StoreResult<bool> {
        let affected = sqlx::query("DELETE FROM channel_bindings WHERE publisher_id = ?1")
            .bind(publisher_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    /// Distinct channel names across all bindings
    pub async fn bound_channels(&self) -> StoreResult<Vec<String>> {
        let channels = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT channel FROM channel_bindings ORDER BY channel",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    // ---- External live / stream info buckets ----

    pub async fn external_live_state(&self, channel: &str) -> StoreResult<Option<ExternalLiveState>> {
        let row = sqlx::query_as::<_, ExternalRow>(
            "SELECT e.channel, e.is_live, e.observed_at, s.title, s.category, s.viewer_count
             FROM external_live e
             LEFT JOIN stream_info s ON s.channel = e.channel
             WHERE e.channel = ?1",
        )
        .bind(channel)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ExternalLiveState::from))
    }

    /// Persist an observed external status only if it differs from the
    /// stored one. A channel with no stored state counts as offline.
    ///
    /// Returns `true` when a transition was written.
    pub async fn record_external_status(
        &self,
        channel: &str,
        status: &StreamStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let changed = sqlx::query(
            "INSERT INTO external_live (channel, is_live, observed_at)
             SELECT ?1, ?2, ?3
             WHERE ?2 = 1 OR EXISTS (SELECT 1 FROM external_live WHERE channel = ?1)
             ON CONFLICT(channel) DO UPDATE SET is_live = excluded.is_live, observed_at = excluded.observed_at
             WHERE external_live.is_live <> excluded.is_live",
        )
        .bind(channel)
        .bind(status.is_live)
        .bind(at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if changed {
            sqlx::query(
                "INSERT INTO stream_info (channel, title, category, viewer_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(channel) DO UPDATE SET
                     title = excluded.title,
                     category = excluded.category,
                     viewer_count = excluded.viewer_count,
                     updated_at = excluded.updated_at",
            )
            .bind(channel)
            .bind(&status.info.title)
            .bind(&status.info.category)
            .bind(status.info.viewer_count)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(changed)
    }

    // ---- Notification state bucket ----

    pub async fn last_notified(&self, channel: &str) -> StoreResult<Option<bool>> {
        let value = sqlx::query_scalar::<_, bool>(
            "SELECT last_notified_is_live FROM notification_state WHERE channel = ?1",
        )
        .bind(channel)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    pub async fn set_last_notified(&self, channel: &str, is_live: bool, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO notification_state (channel, last_notified_is_live, notified_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(channel) DO UPDATE SET
                 last_notified_is_live = excluded.last_notified_is_live,
                 notified_at = excluded.notified_at",
        )
        .bind(channel)
        .bind(is_live)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

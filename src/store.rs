//! SQLite-backed archive store.
//!
//! [`Store`] is an explicit handle over a connection pool, opened once and
//! passed to every operation. The four collections (threads, messages,
//! feedback, users) share one generic surface through the [`Record`] trait:
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`put`](Store::put) | Upsert one record |
//! | [`bulk_put`](Store::bulk_put) | Upsert many records in one transaction |
//! | [`get_all`](Store::get_all) | Full scan of a collection |
//! | [`get_by_index`](Store::get_by_index) | Equality lookup on an indexed column |
//! | [`count`](Store::count) | Collection cardinality |
//! | [`clear`](Store::clear) | Empty every collection atomically |
//! | [`scan_messages`](Store::scan_messages) | Forward cursor over all messages |

use futures::stream::{BoxStream, StreamExt};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::error::{StoreError, StoreResult};
use crate::migrate;
use crate::models::{Feedback, Message, Thread, ThreadSummary, UserProfile};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// A record type persisted in one collection, keyed by `id`.
pub trait Record: Sized + Send + Sync + Unpin + 'static {
    const COLLECTION: &'static str;
    /// Column order used for both binding and selecting. `id` comes first.
    const COLUMNS: &'static [&'static str];
    /// Columns usable with [`Store::get_by_index`] besides `id`.
    const INDEXES: &'static [&'static str];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self>;
}

impl Record for Thread {
    const COLLECTION: &'static str = "threads";
    const COLUMNS: &'static [&'static str] = &["id", "title", "created_at"];
    const INDEXES: &'static [&'static str] = &[];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query.bind(&self.id).bind(&self.title).bind(&self.created_at)
    }

    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl Record for Message {
    const COLLECTION: &'static str = "messages";
    const COLUMNS: &'static [&'static str] = &["id", "thread_id", "role", "text", "timestamp"];
    const INDEXES: &'static [&'static str] = &["thread_id", "timestamp", "role"];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(&self.id)
            .bind(&self.thread_id)
            .bind(&self.role)
            .bind(&self.text)
            .bind(&self.timestamp)
    }

    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            thread_id: row.try_get("thread_id")?,
            role: row.try_get("role")?,
            text: row.try_get("text")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

impl Record for Feedback {
    const COLLECTION: &'static str = "feedback";
    const COLUMNS: &'static [&'static str] =
        &["id", "message_id", "rating", "comment", "timestamp"];
    const INDEXES: &'static [&'static str] = &["message_id"];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(&self.id)
            .bind(&self.message_id)
            .bind(&self.rating)
            .bind(&self.comment)
            .bind(&self.timestamp)
    }

    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            rating: row.try_get("rating")?,
            comment: row.try_get("comment")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

impl Record for UserProfile {
    const COLLECTION: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["id", "raw_json"];
    const INDEXES: &'static [&'static str] = &[];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query.bind(&self.id).bind(&self.raw_json)
    }

    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            raw_json: row.try_get("raw_json")?,
        })
    }
}

fn upsert_sql<R: Record>() -> String {
    let placeholders = vec!["?"; R::COLUMNS.len()].join(", ");
    let updates = R::COLUMNS[1..]
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
        R::COLLECTION,
        R::COLUMNS.join(", "),
        placeholders,
        updates
    )
}

fn select_sql<R: Record>() -> String {
    format!("SELECT {} FROM {}", R::COLUMNS.join(", "), R::COLLECTION)
}

fn decode<R: Record>(row: &SqliteRow) -> StoreResult<R> {
    R::from_row(row).map_err(|e| StoreError::Corrupt {
        collection: R::COLLECTION,
        detail: e.to_string(),
    })
}

/// Handle to the archive database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect and bring the schema up to date. A failure here is fatal to
    /// the worker that owns the store.
    pub async fn open(config: &Config) -> StoreResult<Self> {
        let pool = db::connect(&config.db.path).await?;
        let found = migrate::migrate(&pool).await?;
        tracing::debug!(
            path = %config.db.path.display(),
            from_version = found,
            "opened archive store"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn put<R: Record>(&self, record: &R) -> StoreResult<()> {
        self.bulk_put(std::slice::from_ref(record)).await
    }

    /// Upsert every record in one transaction. Either all become visible or,
    /// on error, none do.
    pub async fn bulk_put<R: Record>(&self, records: &[R]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let sql = upsert_sql::<R>();
        let mut tx = self.pool.begin().await?;
        for record in records {
            record.bind(sqlx::query(&sql)).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        tracing::trace!(
            collection = R::COLLECTION,
            count = records.len(),
            "committed batch"
        );
        Ok(())
    }

    pub async fn get_all<R: Record>(&self) -> StoreResult<Vec<R>> {
        let sql = format!("{} ORDER BY rowid", select_sql::<R>());
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(decode::<R>).collect()
    }

    pub async fn get_by_index<R: Record>(&self, index: &str, key: &str) -> StoreResult<Vec<R>> {
        if index != "id" && !R::INDEXES.contains(&index) {
            return Err(StoreError::UnknownIndex {
                collection: R::COLLECTION,
                index: index.to_string(),
            });
        }
        let sql = format!("{} WHERE {} = ? ORDER BY rowid", select_sql::<R>(), index);
        let rows = sqlx::query(&sql).bind(key).fetch_all(&self.pool).await?;
        rows.iter().map(decode::<R>).collect()
    }

    pub async fn count<R: Record>(&self) -> StoreResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", R::COLLECTION);
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(n)
    }

    /// Empty all four collections together.
    pub async fn clear(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            Message::COLLECTION,
            Thread::COLLECTION,
            Feedback::COLLECTION,
            UserProfile::COLLECTION,
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!("cleared archive store");
        Ok(())
    }

    /// Single forward pass over the message collection in storage order.
    pub fn scan_messages(&self) -> BoxStream<'_, StoreResult<Message>> {
        sqlx::query("SELECT id, thread_id, role, text, timestamp FROM messages ORDER BY rowid")
            .fetch(&self.pool)
            .map(|row| {
                let row = row?;
                decode::<Message>(&row)
            })
            .boxed()
    }

    pub async fn thread_summaries(&self) -> StoreResult<Vec<ThreadSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.title, t.created_at, COUNT(m.id) AS count
            FROM threads t
            LEFT JOIN messages m ON m.thread_id = t.id
            GROUP BY t.id, t.title, t.created_at
            ORDER BY t.created_at DESC, t.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ThreadSummary {
                id: row.get("id"),
                title: row.get("title"),
                created_at: row.get("created_at"),
                count: row.get("count"),
            })
            .collect())
    }
}

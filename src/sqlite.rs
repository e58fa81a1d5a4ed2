//! SQLite-backed [`EventStore`].
//!
//! Persists the `resources` / `events` schema below, unchanged, so the log can
//! be shared with any other reader of that contract:
//!
//! ```sql
//! CREATE TABLE resources (
//!   id       TEXT PRIMARY KEY,
//!   type     TEXT NOT NULL,
//!   version  INTEGER NOT NULL
//! );
//! CREATE TABLE events (
//!   event_id          TEXT PRIMARY KEY,
//!   resource_id       TEXT NOT NULL REFERENCES resources(id),
//!   resource_version  INTEGER NOT NULL,
//!   event_type        TEXT NOT NULL,
//!   event_timestamp   TEXT NOT NULL,
//!   payload           TEXT NOT NULL,
//!   UNIQUE (resource_id, resource_version)
//! );
//! ```
//!
//! UUIDs are stored as hyphenated text, timestamps as RFC 3339 text and
//! payloads as JSON text.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::{EventFilter, NewEvent, StoredEvent};
use crate::store::EventStore;

/// Environment variable read by [`SqliteConfig::from_env`].
pub const DATABASE_URL_ENV: &str = "REVIEWFOLD_DATABASE_URL";

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Connection settings for [`SqliteEventStore`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use reviewfold::SqliteConfig;
///
/// let config = SqliteConfig {
///     max_connections: 2,
///     ..SqliteConfig::default()
/// };
/// assert_eq!(config.acquire_timeout, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database URL, e.g. `sqlite://reviews.db` or `sqlite::memory:`.
    ///
    /// Default: `sqlite::memory:`.
    pub url: String,

    /// Pool size for file databases. In-memory databases always use a
    /// single connection, since every connection would otherwise see its
    /// own empty database.
    ///
    /// Default: 5.
    pub max_connections: u32,

    /// How long to wait for a pooled connection.
    ///
    /// Default: 30 seconds.
    pub acquire_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: IN_MEMORY_URL.to_string(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl SqliteConfig {
    /// Read the URL from `REVIEWFOLD_DATABASE_URL`, falling back to an
    /// in-memory database.
    pub fn from_env() -> Self {
        match std::env::var(DATABASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::default().with_url(url),
            _ => Self::default(),
        }
    }

    /// Set the database URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// An [`EventStore`] backed by SQLite through a `sqlx` pool.
///
/// Each append runs in a `BEGIN IMMEDIATE` transaction, so two writers
/// racing on the same resource are serialized by SQLite and the loser sees
/// the winner's version. The `UNIQUE (resource_id, resource_version)`
/// constraint backs the version check up.
#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    /// Connect with the given settings and create the schema if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URL is invalid, the
    /// database cannot be opened, or the schema cannot be created.
    pub async fn connect(config: &SqliteConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_options = if config.is_in_memory() {
            // The database lives exactly as long as its one connection.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(url = %config.url, "sqlite event store ready");
        Ok(store)
    }

    /// Open (creating if needed) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let url = format!("sqlite://{}", path.as_ref().display());
        Self::connect(&SqliteConfig::default().with_url(url)).await
    }

    /// Create a private in-memory database (for tests and demos).
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect(&SqliteConfig::default()).await
    }

    /// Create the `resources` and `events` tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                id       TEXT PRIMARY KEY,
                type     TEXT NOT NULL,
                version  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                event_id          TEXT PRIMARY KEY,
                resource_id       TEXT NOT NULL REFERENCES resources(id),
                resource_version  INTEGER NOT NULL,
                event_type        TEXT NOT NULL,
                event_timestamp   TEXT NOT NULL,
                payload           TEXT NOT NULL,
                UNIQUE (resource_id, resource_version)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(
        &self,
        resource_id: Uuid,
        resource_type: &str,
        expected_version: u64,
        events: Vec<NewEvent>,
    ) -> Result<u64, StoreError> {
        // Take the write lock up front. A deferred transaction would let two
        // writers both read the same version and deadlock on the upgrade.
        // Dropping `tx` before commit rolls back, so a cancelled append
        // never leaves the pooled connection inside a transaction.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let count = events.len();
        let version =
            append_in_transaction(&mut *tx, resource_id, resource_type, expected_version, events)
                .await?;

        tx.commit().await?;
        tracing::debug!(%resource_id, resource_type, count, version, "append committed");
        Ok(version)
    }

    async fn read(&self, resource_id: Uuid) -> Result<Vec<StoredEvent>, StoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT e.event_id, e.resource_id, r.type AS resource_type, e.resource_version,
                   e.event_type, e.event_timestamp, e.payload
            FROM events e
            JOIN resources r ON r.id = e.resource_id
            WHERE e.resource_id = ?
            ORDER BY e.resource_version
            "#,
        )
        .bind(resource_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredEvent::try_from).collect()
    }

    async fn read_matching(
        &self,
        resource_type: &str,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let mut query: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            r#"
            SELECT e.event_id, e.resource_id, r.type AS resource_type, e.resource_version,
                   e.event_type, e.event_timestamp, e.payload
            FROM events e
            JOIN resources r ON r.id = e.resource_id
            WHERE r.type = "#,
        );
        query.push_bind(resource_type.to_string());

        if !filter.types.is_empty() {
            query.push(" AND e.event_type IN (");
            let mut types = query.separated(", ");
            for event_type in &filter.types {
                types.push_bind(event_type.clone());
            }
            types.push_unseparated(")");
        }

        // rowid follows insertion, which is commit order.
        query.push(" ORDER BY e.rowid");

        let rows: Vec<EventRow> = query.build_query_as().fetch_all(&self.pool).await?;

        let mut matching = Vec::with_capacity(rows.len());
        for row in rows {
            let event = StoredEvent::try_from(row)?;
            // Payload predicates are evaluated on the decoded JSON.
            if filter.admits_payload(&event.payload) {
                matching.push(event);
            }
        }
        Ok(matching)
    }

    async fn version(&self, resource_id: Uuid) -> Result<u64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM resources WHERE id = ?")
            .bind(resource_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(version,)| version as u64).unwrap_or(0))
    }
}

/// The body of an append, run inside an open transaction on `conn`.
async fn append_in_transaction(
    conn: &mut SqliteConnection,
    resource_id: Uuid,
    resource_type: &str,
    expected_version: u64,
    events: Vec<NewEvent>,
) -> Result<u64, StoreError> {
    let id = resource_id.to_string();

    let current: Option<(String, i64)> =
        sqlx::query_as("SELECT type, version FROM resources WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *conn)
            .await?;

    let actual = match &current {
        Some((stored_type, _)) if stored_type != resource_type => {
            return Err(StoreError::ResourceTypeMismatch {
                resource_id,
                expected: resource_type.to_string(),
                actual: stored_type.clone(),
            });
        }
        Some((_, version)) => *version as u64,
        None => 0,
    };

    if actual != expected_version {
        return Err(StoreError::ConcurrencyConflict {
            resource_id,
            expected: expected_version,
            actual,
        });
    }

    if events.is_empty() {
        return Ok(actual);
    }

    let new_version = expected_version + events.len() as u64;

    if current.is_none() {
        sqlx::query("INSERT INTO resources (id, type, version) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(resource_type)
            .bind(new_version as i64)
            .execute(&mut *conn)
            .await
            .map_err(|e| write_error(e, resource_id, expected_version))?;
    } else {
        let updated = sqlx::query("UPDATE resources SET version = ? WHERE id = ? AND version = ?")
            .bind(new_version as i64)
            .bind(&id)
            .bind(expected_version as i64)
            .execute(&mut *conn)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::ConcurrencyConflict {
                resource_id,
                expected: expected_version,
                actual: expected_version + 1,
            });
        }
    }

    for (offset, event) in events.into_iter().enumerate() {
        let version = expected_version + offset as u64 + 1;
        let payload = serde_json::to_string(&event.payload)?;
        sqlx::query(
            r#"
            INSERT INTO events
                (event_id, resource_id, resource_version, event_type, event_timestamp, payload)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_id.to_string())
        .bind(&id)
        .bind(version as i64)
        .bind(&event.event_type)
        .bind(
            event
                .event_timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true),
        )
        .bind(payload)
        .execute(&mut *conn)
        .await
        .map_err(|e| write_error(e, resource_id, expected_version))?;
    }

    Ok(new_version)
}

/// Map a failed insert: a unique violation means another writer got there
/// first, anything else is an infrastructure failure.
fn write_error(err: sqlx::Error, resource_id: Uuid, expected: u64) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::ConcurrencyConflict {
            resource_id,
            expected,
            // The competing writer committed at least one event.
            actual: expected + 1,
        },
        _ => StoreError::from(err),
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    event_id: String,
    resource_id: String,
    resource_type: String,
    resource_version: i64,
    event_type: String,
    event_timestamp: String,
    payload: String,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(StoredEvent {
            event_id: Uuid::parse_str(&row.event_id).map_err(StoreError::unavailable)?,
            resource_id: Uuid::parse_str(&row.resource_id).map_err(StoreError::unavailable)?,
            resource_type: row.resource_type,
            resource_version: row.resource_version as u64,
            event_type: row.event_type,
            event_timestamp: DateTime::parse_from_rfc3339(&row.event_timestamp)
                .map_err(StoreError::unavailable)?
                .with_timezone(&Utc),
            payload: serde_json::from_str(&row.payload)?,
        })
    }
}

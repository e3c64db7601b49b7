use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::error::DbError;

/// Stored agency row (the reconciler's view of prior state)
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAgency {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub short_name: Option<String>,
    pub display_name: Option<String>,
    pub sortable_name: Option<String>,
    pub parent_id: Option<i64>,
    pub checksum: String,
    pub word_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredAgency {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Agencies (self-referential: parent_id NULL = top-level)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS agencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            slug TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            short_name TEXT,
            display_name TEXT,
            sortable_name TEXT,
            parent_id INTEGER REFERENCES agencies(id),
            checksum TEXT NOT NULL,
            word_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // CFR references (one row per agency + title)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cfr_references (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agency_id INTEGER NOT NULL REFERENCES agencies(id),
            title INTEGER NOT NULL,
            chapter TEXT,
            subtitle TEXT,
            UNIQUE (agency_id, title)
        )",
        [],
    )?;

    // ==========================================================================
    // Change history (append-only; entity_id carries no foreign key)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS data_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            change_type TEXT NOT NULL CHECK (change_type IN ('created', 'updated')),
            old_checksum TEXT,
            new_checksum TEXT NOT NULL,
            old_word_count INTEGER,
            new_word_count INTEGER NOT NULL,
            changed_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_agencies_parent ON agencies(parent_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_entity ON data_history(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_changed_at ON data_history(changed_at)",
        [],
    )?;

    Ok(())
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

// ============================================================================
// CONNECTION POOL (r2d2 over rusqlite)
// ============================================================================

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Maximum number of connections (minimum 1)
    pub size: usize,
    /// How long `get()` waits for a free connection
    pub acquire_timeout: Duration,
    /// How long a statement waits on a locked database file
    pub busy_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            size: 4,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Bounded pool of SQLite connections. Cloning shares the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: r2d2::Pool<SqliteConnectionManager>,
    acquire_timeout: Duration,
    /// Holds a shared-cache in-memory database open for the pool's lifetime
    _anchor: Option<Arc<Mutex<Connection>>>,
}

impl ConnectionPool {
    /// Open a file-backed pool and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>, options: PoolOptions) -> Result<Self, DbError> {
        let path = path.as_ref();
        let schema = Connection::open(path)?;
        configure_connection(&schema, options.busy_timeout)?;
        setup_database(&schema)?;
        drop(schema);

        Self::build(SqliteConnectionManager::file(path), options, None)
    }

    /// Private in-memory database shared by every connection of this pool.
    pub fn open_in_memory(options: PoolOptions) -> Result<Self, DbError> {
        let target = format!(
            "file:ecfr-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let anchor = Connection::open(&target)?;
        configure_connection(&anchor, options.busy_timeout)?;
        setup_database(&anchor)?;

        Self::build(
            SqliteConnectionManager::file(&target),
            options,
            Some(Arc::new(Mutex::new(anchor))),
        )
    }

    fn build(
        manager: SqliteConnectionManager,
        options: PoolOptions,
        anchor: Option<Arc<Mutex<Connection>>>,
    ) -> Result<Self, DbError> {
        let busy_timeout = options.busy_timeout;
        let manager = manager.with_init(move |conn| configure_connection(conn, busy_timeout));
        let size = u32::try_from(options.size.max(1)).unwrap_or(u32::MAX);

        let pool = r2d2::Pool::builder()
            .max_size(size)
            .connection_timeout(options.acquire_timeout)
            .build(manager)
            .map_err(DbError::PoolBuild)?;

        debug!(size, "connection pool opened");

        Ok(ConnectionPool {
            pool,
            acquire_timeout: options.acquire_timeout,
            _anchor: anchor,
        })
    }

    /// Check out a connection, waiting up to the acquire timeout.
    pub fn get(&self) -> Result<PooledConnection, DbError> {
        self.pool.get().map_err(|source| DbError::PoolExhausted {
            size: self.size(),
            waited: self.acquire_timeout,
            source,
        })
    }

    pub fn size(&self) -> usize {
        self.pool.max_size() as usize
    }

    /// Connections currently checked in
    pub fn idle_count(&self) -> usize {
        self.pool.state().idle_connections as usize
    }
}

// ============================================================================
// TIMESTAMPS (fixed-width RFC 3339 so text ordering = time ordering)
// ============================================================================

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// AGENCY LOOKUPS
// ============================================================================

const AGENCY_COLUMNS: &str = "id, slug, name, short_name, display_name, sortable_name,
                              parent_id, checksum, word_count, created_at, updated_at";

fn agency_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredAgency> {
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(StoredAgency {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        short_name: row.get(3)?,
        display_name: row.get(4)?,
        sortable_name: row.get(5)?,
        parent_id: row.get(6)?,
        checksum: row.get(7)?,
        word_count: row.get(8)?,
        created_at: parse_timestamp(9, &created_at)?,
        updated_at: parse_timestamp(10, &updated_at)?,
    })
}

pub fn find_agency_by_slug(conn: &Connection, slug: &str) -> rusqlite::Result<Option<StoredAgency>> {
    conn.query_row(
        &format!("SELECT {} FROM agencies WHERE slug = ?1", AGENCY_COLUMNS),
        params![slug],
        agency_from_row,
    )
    .optional()
}

pub fn get_all_agencies(conn: &Connection) -> rusqlite::Result<Vec<StoredAgency>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM agencies ORDER BY id",
        AGENCY_COLUMNS
    ))?;

    let agencies = stmt
        .query_map([], agency_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(agencies)
}

pub fn verify_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM agencies", [], |row| row.get(0))
}

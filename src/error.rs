// ⚠️ Error taxonomy for the ingestion pipeline
//
// SourceUnavailable  → nothing was stored
// MalformedRecord    → nothing was stored (abort policy) or the record was skipped
// StorageUnavailable → `entities_written` tells how far the run got
// Ledger failures are never returned from an ingest run; they are logged and counted.

use std::time::Duration;

use thiserror::Error;

use crate::snapshot::MalformedRecord;

// ============================================================================
// STORAGE
// ============================================================================

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No connection could be checked out within the acquire timeout.
    #[error("connection pool exhausted: {size} connections busy after waiting {waited:?}")]
    PoolExhausted {
        size: usize,
        waited: Duration,
        #[source]
        source: r2d2::Error,
    },

    #[error("could not open connection pool: {0}")]
    PoolBuild(#[source] r2d2::Error),
}

// ============================================================================
// UPSTREAM SOURCE
// ============================================================================

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("could not parse snapshot document: {0}")]
    Parse(String),

    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("could not write change event for {entity_type} {entity_id}: {source}")]
    Write {
        entity_type: String,
        entity_id: i64,
        #[source]
        source: rusqlite::Error,
    },

    #[error("could not read change history: {0}")]
    Read(#[from] rusqlite::Error),
}

// ============================================================================
// INGESTION
// ============================================================================

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("snapshot source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("malformed record at {}: {}", .0.location, .0.reason)]
    MalformedRecord(MalformedRecord),

    #[error("storage unavailable after {entities_written} entities were written: {source}")]
    StorageUnavailable {
        entities_written: usize,
        #[source]
        source: DbError,
    },
}

impl IngestError {
    /// True when the run failed before anything reached the store.
    pub fn nothing_stored(&self) -> bool {
        match self {
            IngestError::SourceUnavailable(_) | IngestError::MalformedRecord(_) => true,
            IngestError::StorageUnavailable { entities_written, .. } => *entities_written == 0,
        }
    }
}

impl From<MalformedRecord> for IngestError {
    fn from(record: MalformedRecord) -> Self {
        IngestError::MalformedRecord(record)
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

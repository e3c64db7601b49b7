// eCFR Agency Ingest - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod db;
pub mod fingerprint;    // Checksum + word count per record
pub mod snapshot;       // Upstream document -> typed records
pub mod ledger;         // Append-only change history
pub mod references;     // CFR title references per agency
pub mod reconciler;     // Created / Updated / Unchanged decisions
pub mod hierarchy;      // Two-pass parent/child ingestion
pub mod analytics;      // Read-only rollups
pub mod source;         // HTTP / file snapshot sources

// Re-export commonly used types
pub use config::{Config, MalformedPolicy};
pub use db::{
    ConnectionPool, PoolOptions, PooledConnection, StoredAgency,
    setup_database, find_agency_by_slug, get_all_agencies, verify_count,
};
pub use error::{ConfigError, DbError, IngestError, LedgerError, SourceError};
pub use fingerprint::{Fingerprint, fingerprint};
pub use snapshot::{AgencyRecord, CfrReferenceRecord, MalformedRecord, Snapshot};
pub use ledger::{ChangeEvent, ChangeKind, ChangeRecord};
pub use references::CfrReference;
pub use reconciler::{AgencyOutcome, AuditStatus, Decision};
pub use hierarchy::{IngestReport, Ingestor};
pub use analytics::{
    AgencyChecksum, AgencySummary, ComplexityScore, WordCountStats,
    agency_checksums, complexity_score, complexity_scores, export_agencies_csv,
    list_agencies, recent_changes, word_count_stats,
};
pub use source::{FileSource, HttpSource, SnapshotSource, DEFAULT_SOURCE_URL};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

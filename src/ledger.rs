// 📒 Change Ledger - append-only audit trail of reconciliation decisions
//
// "Every change is an event": one row per created/updated decision,
// never mutated, never deleted.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::{format_timestamp, parse_timestamp};
use crate::error::LedgerError;

pub const ENTITY_AGENCY: &str = "agency";

/// Fixed page size used by the history view
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

// ============================================================================
// EVENT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChangeKind::Created),
            "updated" => Ok(ChangeKind::Updated),
            other => Err(format!("unknown change type: {}", other)),
        }
    }
}

/// Checksum + word count of an entity at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub checksum: String,
    pub word_count: i64,
}

/// Event about to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewChangeEvent {
    pub entity_type: String,
    pub entity_id: i64,
    pub kind: ChangeKind,
    pub old: Option<EntityState>,
    pub new: EntityState,
    pub changed_at: DateTime<Utc>,
}

/// Event as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: i64,
    pub event_id: String,
    pub entity_type: String,
    pub entity_id: i64,
    #[serde(rename = "change_type")]
    pub kind: ChangeKind,
    pub old_checksum: Option<String>,
    pub new_checksum: String,
    pub old_word_count: Option<i64>,
    pub new_word_count: i64,
    pub changed_at: DateTime<Utc>,
}

/// Event joined with the entity's current display name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    #[serde(flatten)]
    pub event: ChangeEvent,
    pub entity_name: String,
}

// ============================================================================
// APPEND
// ============================================================================

pub fn append(conn: &Connection, event: &NewChangeEvent) -> Result<ChangeEvent, LedgerError> {
    let event_id = uuid::Uuid::new_v4().to_string();
    let old_checksum = event.old.as_ref().map(|s| s.checksum.clone());
    let old_word_count = event.old.as_ref().map(|s| s.word_count);

    let (id, changed_at) = conn
        .query_row(
            "INSERT INTO data_history (
                event_id, entity_type, entity_id, change_type,
                old_checksum, new_checksum, old_word_count, new_word_count, changed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING id, changed_at",
            params![
                event_id,
                event.entity_type,
                event.entity_id,
                event.kind.as_str(),
                old_checksum,
                event.new.checksum,
                old_word_count,
                event.new.word_count,
                format_timestamp(event.changed_at),
            ],
            |row| {
                let stored_at: String = row.get(1)?;
                Ok((row.get::<_, i64>(0)?, parse_timestamp(1, &stored_at)?))
            },
        )
        .map_err(|source| LedgerError::Write {
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id,
            source,
        })?;

    Ok(ChangeEvent {
        id,
        event_id,
        entity_type: event.entity_type.clone(),
        entity_id: event.entity_id,
        kind: event.kind,
        old_checksum,
        new_checksum: event.new.checksum.clone(),
        old_word_count,
        new_word_count: event.new.word_count,
        changed_at,
    })
}

/// Append inside a savepoint of `tx`. On failure only the event is rolled
/// back; whatever `tx` already wrote stays pending for its own commit.
pub fn append_in_savepoint(
    tx: &mut Transaction<'_>,
    event: &NewChangeEvent,
) -> Result<ChangeEvent, LedgerError> {
    let write_error = |source| LedgerError::Write {
        entity_type: event.entity_type.clone(),
        entity_id: event.entity_id,
        source,
    };

    let sp = tx.savepoint().map_err(write_error)?;
    let stored = append(&sp, event)?;
    sp.commit().map_err(write_error)?;
    Ok(stored)
}

// ============================================================================
// READ
// ============================================================================

const EVENT_COLUMNS: &str = "h.id, h.event_id, h.entity_type, h.entity_id, h.change_type,
                             h.old_checksum, h.new_checksum, h.old_word_count, h.new_word_count,
                             h.changed_at";

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeEvent> {
    let kind: String = row.get(4)?;
    let changed_at: String = row.get(9)?;

    Ok(ChangeEvent {
        id: row.get(0)?,
        event_id: row.get(1)?,
        entity_type: row.get(2)?,
        entity_id: row.get(3)?,
        kind: kind
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?,
        old_checksum: row.get(5)?,
        new_checksum: row.get(6)?,
        old_word_count: row.get(7)?,
        new_word_count: row.get(8)?,
        changed_at: parse_timestamp(9, &changed_at)?,
    })
}

/// Newest first, with the entity's name resolved when the row still exists.
pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<ChangeRecord>, LedgerError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {},
                CASE
                    WHEN h.entity_type = '{}' AND a.name IS NOT NULL THEN a.name
                    ELSE 'Entity ID: ' || h.entity_id
                END AS entity_name
         FROM data_history h
         LEFT JOIN agencies a ON h.entity_type = '{}' AND h.entity_id = a.id
         ORDER BY h.changed_at DESC, h.id DESC
         LIMIT ?1",
        EVENT_COLUMNS, ENTITY_AGENCY, ENTITY_AGENCY
    ))?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let records = stmt
        .query_map(params![limit], |row| {
            Ok(ChangeRecord {
                event: event_from_row(row)?,
                entity_name: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

/// Full history of one entity, oldest first
pub fn events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: i64,
) -> Result<Vec<ChangeEvent>, LedgerError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM data_history h
         WHERE h.entity_type = ?1 AND h.entity_id = ?2
         ORDER BY h.changed_at ASC, h.id ASC",
        EVENT_COLUMNS
    ))?;

    let events = stmt
        .query_map(params![entity_type, entity_id], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn count_events(conn: &Connection) -> Result<i64, LedgerError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM data_history", [], |row| row.get(0))?)
}

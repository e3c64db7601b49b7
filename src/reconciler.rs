// ⚖️ Entity Reconciler - created / updated / unchanged per agency
//
// reconcile() is pure: incoming record + stored row → decision, row to write,
// event to append. persist() applies it in one IMMEDIATE transaction so the
// row and its event land together; the event goes through a savepoint and a
// failed event never rolls back the row.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db::{find_agency_by_slug, format_timestamp, StoredAgency};
use crate::error::DbError;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::ledger::{self, ChangeKind, EntityState, NewChangeEvent, ENTITY_AGENCY};
use crate::snapshot::AgencyRecord;

// ============================================================================
// DECISION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// No stored row for the slug
    Created,
    /// Checksum differs, or the agency moved to another parent
    Updated,
    /// Nothing to write, nothing to audit
    Unchanged,
}

/// Row to upsert (keyed by slug; the primary key never changes)
#[derive(Debug, Clone, PartialEq)]
pub struct AgencyRow {
    pub slug: String,
    pub name: String,
    pub short_name: Option<String>,
    pub display_name: Option<String>,
    pub sortable_name: Option<String>,
    pub parent_id: Option<i64>,
    pub checksum: String,
    pub word_count: i64,
    pub written_at: DateTime<Utc>,
}

/// Event waiting for the row's primary key
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub kind: ChangeKind,
    pub old: Option<EntityState>,
    pub new: EntityState,
}

impl PendingChange {
    fn into_event(self, entity_id: i64, changed_at: DateTime<Utc>) -> NewChangeEvent {
        NewChangeEvent {
            entity_type: ENTITY_AGENCY.to_string(),
            entity_id,
            kind: self.kind,
            old: self.old,
            new: self.new,
            changed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Write { row: AgencyRow, change: PendingChange },
    /// Keep the stored row as is
    Skip { id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub decision: Decision,
    pub fingerprint: Fingerprint,
    pub action: Action,
}

impl Reconciliation {
    pub fn row(&self) -> Option<&AgencyRow> {
        match &self.action {
            Action::Write { row, .. } => Some(row),
            Action::Skip { .. } => None,
        }
    }

    pub fn change(&self) -> Option<&PendingChange> {
        match &self.action {
            Action::Write { change, .. } => Some(change),
            Action::Skip { .. } => None,
        }
    }
}

/// Decide what to do with `incoming` given the stored row for its slug.
pub fn reconcile(
    incoming: &AgencyRecord,
    parent_id: Option<i64>,
    stored: Option<&StoredAgency>,
    now: DateTime<Utc>,
) -> Reconciliation {
    let fp = fingerprint(&incoming.raw);
    let new_state = EntityState {
        checksum: fp.checksum.clone(),
        word_count: fp.word_count,
    };

    let (decision, kind, old_state) = match stored {
        None => (Decision::Created, ChangeKind::Created, None),
        Some(existing) if existing.checksum != fp.checksum || existing.parent_id != parent_id => (
            Decision::Updated,
            ChangeKind::Updated,
            Some(EntityState {
                checksum: existing.checksum.clone(),
                word_count: existing.word_count,
            }),
        ),
        Some(existing) => {
            return Reconciliation {
                decision: Decision::Unchanged,
                fingerprint: fp,
                action: Action::Skip { id: existing.id },
            };
        }
    };

    let row = AgencyRow {
        slug: incoming.slug.clone(),
        name: incoming.name.clone(),
        short_name: incoming.short_name.clone(),
        display_name: incoming.display_name.clone(),
        sortable_name: incoming.sortable_name.clone(),
        parent_id,
        checksum: fp.checksum.clone(),
        word_count: fp.word_count,
        written_at: now,
    };

    Reconciliation {
        decision,
        fingerprint: fp,
        action: Action::Write {
            row,
            change: PendingChange {
                kind,
                old: old_state,
                new: new_state,
            },
        },
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Recorded,
    NotRequired,
    /// Row committed, event could not be written (already logged)
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgencyOutcome {
    pub id: i64,
    pub decision: Decision,
    pub audit: AuditStatus,
}

/// Insert-or-update on slug. `created_at` is only set on insert.
fn upsert_agency(tx: &Transaction<'_>, row: &AgencyRow) -> rusqlite::Result<i64> {
    let written_at = format_timestamp(row.written_at);

    tx.query_row(
        "INSERT INTO agencies (
            slug, name, short_name, display_name, sortable_name,
            parent_id, checksum, word_count, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
        ON CONFLICT (slug) DO UPDATE SET
            name = excluded.name,
            short_name = excluded.short_name,
            display_name = excluded.display_name,
            sortable_name = excluded.sortable_name,
            parent_id = excluded.parent_id,
            checksum = excluded.checksum,
            word_count = excluded.word_count,
            updated_at = excluded.updated_at
        RETURNING id",
        params![
            row.slug,
            row.name,
            row.short_name,
            row.display_name,
            row.sortable_name,
            row.parent_id,
            row.checksum,
            row.word_count,
            written_at,
        ],
        |r| r.get(0),
    )
}

/// Reconcile one agency against the store and write the result.
pub fn persist(
    conn: &mut Connection,
    incoming: &AgencyRecord,
    parent_id: Option<i64>,
) -> Result<AgencyOutcome, DbError> {
    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let stored = find_agency_by_slug(&tx, &incoming.slug)?;
    // Storage keeps microseconds
    let now = Utc::now().trunc_subsecs(6);
    let plan = reconcile(incoming, parent_id, stored.as_ref(), now);

    let (row, change) = match plan.action {
        Action::Write { row, change } => (row, change),
        Action::Skip { id } => {
            // Nothing written; dropping the transaction is the no-op
            debug!(slug = %incoming.slug, id, "agency unchanged");
            return Ok(AgencyOutcome {
                id,
                decision: Decision::Unchanged,
                audit: AuditStatus::NotRequired,
            });
        }
    };

    let id = upsert_agency(&tx, &row)?;

    let audit = match ledger::append_in_savepoint(&mut tx, &change.into_event(id, now)) {
        Ok(_) => AuditStatus::Recorded,
        Err(e) => {
            warn!(slug = %incoming.slug, id, error = %e, "change event not recorded");
            AuditStatus::Failed
        }
    };

    tx.commit()?;

    debug!(slug = %incoming.slug, id, decision = ?plan.decision, "agency reconciled");

    Ok(AgencyOutcome {
        id,
        decision: plan.decision,
        audit,
    })
}

// 📚 Reference Set Synchronizer - CFR citations per agency
//
// Keyed on (agency, title): a later reference for the same title overwrites
// chapter/subtitle. References absent from a snapshot are left alone.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::snapshot::CfrReferenceRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfrReference {
    pub id: i64,
    pub agency_id: i64,
    pub title: i64,
    pub chapter: Option<String>,
    pub subtitle: Option<String>,
}

/// Upsert every incoming reference in one transaction.
/// Returns the number of rows inserted or changed; identical rows are left
/// untouched and not counted.
pub fn sync(
    conn: &mut Connection,
    agency_id: i64,
    incoming: &[CfrReferenceRecord],
) -> Result<usize, DbError> {
    if incoming.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    let mut written = 0;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO cfr_references (agency_id, title, chapter, subtitle)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (agency_id, title) DO UPDATE SET
                chapter = excluded.chapter,
                subtitle = excluded.subtitle
             WHERE chapter IS NOT excluded.chapter
                OR subtitle IS NOT excluded.subtitle",
        )?;

        for reference in incoming {
            written += stmt.execute(params![
                agency_id,
                reference.title,
                reference.chapter,
                reference.subtitle,
            ])?;
        }
    }
    tx.commit()?;

    Ok(written)
}

pub fn references_for_agency(conn: &Connection, agency_id: i64) -> rusqlite::Result<Vec<CfrReference>> {
    let mut stmt = conn.prepare(
        "SELECT id, agency_id, title, chapter, subtitle
         FROM cfr_references
         WHERE agency_id = ?1
         ORDER BY title",
    )?;

    let references = stmt
        .query_map(params![agency_id], |row| {
            Ok(CfrReference {
                id: row.get(0)?,
                agency_id: row.get(1)?,
                title: row.get(2)?,
                chapter: row.get(3)?,
                subtitle: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(references)
}

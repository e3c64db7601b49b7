// 📊 Aggregation Queries - read-only rollups over the reconciled store
//
// All rollups are parent-only: child agencies are excluded and their word
// counts are NOT folded into their parent's totals.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::io::Write;

use crate::db::parse_timestamp;
use crate::ledger::{self, ChangeRecord};

/// Weight of the word count in the complexity score
pub const WORD_WEIGHT: f64 = 0.7;
/// Weight of the (scaled) CFR reference count in the complexity score
pub const REFERENCE_WEIGHT: f64 = 0.3;
/// One CFR reference counts as this many words
pub const REFERENCE_SCALE: f64 = 1000.0;

// ============================================================================
// AGENCY LISTING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgencySummary {
    pub id: i64,
    pub name: String,
    pub short_name: Option<String>,
    pub display_name: Option<String>,
    pub slug: String,
    pub checksum: String,
    pub word_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cfr_reference_count: i64,
    /// Distinct titles, ascending. Serialized as "2,5,7", or null when empty.
    #[serde(serialize_with = "titles_as_text")]
    pub cfr_titles: Vec<i64>,
}

fn titles_as_text<S: Serializer>(titles: &[i64], serializer: S) -> Result<S::Ok, S::Error> {
    if titles.is_empty() {
        return serializer.serialize_none();
    }
    let joined = titles.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(",");
    serializer.serialize_some(&joined)
}

impl AgencySummary {
    /// Titles joined with commas, e.g. "2,5,7"
    pub fn cfr_titles_joined(&self) -> String {
        self.cfr_titles
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn top_level_titles(conn: &Connection) -> Result<HashMap<i64, Vec<i64>>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT c.agency_id, c.title
         FROM cfr_references c
         JOIN agencies a ON a.id = c.agency_id
         WHERE a.parent_id IS NULL
         ORDER BY c.agency_id, c.title",
    )?;

    let mut titles: HashMap<i64, Vec<i64>> = HashMap::new();
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (agency_id, title) = row?;
        titles.entry(agency_id).or_default().push(title);
    }

    Ok(titles)
}

/// Top-level agencies, largest word count first.
pub fn list_agencies(conn: &Connection) -> Result<Vec<AgencySummary>> {
    let mut titles = top_level_titles(conn).context("Failed to load CFR titles")?;

    let mut stmt = conn.prepare(
        "SELECT a.id, a.name, a.short_name, a.display_name, a.slug, a.checksum,
                a.word_count, a.created_at, a.updated_at, COUNT(c.id) AS cfr_reference_count
         FROM agencies a
         LEFT JOIN cfr_references c ON a.id = c.agency_id
         WHERE a.parent_id IS NULL
         GROUP BY a.id
         ORDER BY a.word_count DESC, a.name ASC",
    )?;

    let agencies = stmt
        .query_map([], |row| {
            let created_at: String = row.get(7)?;
            let updated_at: String = row.get(8)?;

            Ok(AgencySummary {
                id: row.get(0)?,
                name: row.get(1)?,
                short_name: row.get(2)?,
                display_name: row.get(3)?,
                slug: row.get(4)?,
                checksum: row.get(5)?,
                word_count: row.get(6)?,
                created_at: parse_timestamp(7, &created_at)?,
                updated_at: parse_timestamp(8, &updated_at)?,
                cfr_reference_count: row.get(9)?,
                cfr_titles: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to list agencies")?;

    Ok(agencies
        .into_iter()
        .map(|mut agency| {
            agency.cfr_titles = titles.remove(&agency.id).unwrap_or_default();
            agency
        })
        .collect())
}

// ============================================================================
// WORD COUNT SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordCountStats {
    pub total_agencies: i64,
    pub total_words: i64,
    /// `None` when there are no agencies
    pub avg_words_per_agency: Option<f64>,
    pub max_words: Option<i64>,
    pub min_words: Option<i64>,
}

pub fn word_count_stats(conn: &Connection) -> Result<WordCountStats> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(word_count), 0), AVG(word_count),
                MAX(word_count), MIN(word_count)
         FROM agencies
         WHERE parent_id IS NULL",
        [],
        |row| {
            Ok(WordCountStats {
                total_agencies: row.get(0)?,
                total_words: row.get(1)?,
                avg_words_per_agency: row.get(2)?,
                max_words: row.get(3)?,
                min_words: row.get(4)?,
            })
        },
    )
    .context("Failed to compute word count statistics")
}

// ============================================================================
// HISTORY
// ============================================================================

/// Newest changes first, with resolved agency names.
pub fn recent_changes(conn: &Connection, limit: usize) -> Result<Vec<ChangeRecord>> {
    ledger::recent(conn, limit).context("Failed to read change history")
}

// ============================================================================
// COMPLEXITY SCORE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexityScore {
    pub id: i64,
    pub name: String,
    pub short_name: Option<String>,
    pub word_count: i64,
    pub cfr_reference_count: i64,
    pub complexity_score: i64,
}

/// round(word_count * 0.7 + cfr_reference_count * 1000 * 0.3)
pub fn complexity_score(word_count: i64, cfr_reference_count: i64) -> i64 {
    (word_count as f64 * WORD_WEIGHT + cfr_reference_count as f64 * REFERENCE_SCALE * REFERENCE_WEIGHT)
        .round() as i64
}

/// Top-level agencies ranked by complexity, highest first.
pub fn complexity_scores(conn: &Connection) -> Result<Vec<ComplexityScore>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.name, a.short_name, a.word_count, COUNT(c.id)
         FROM agencies a
         LEFT JOIN cfr_references c ON a.id = c.agency_id
         WHERE a.parent_id IS NULL
         GROUP BY a.id",
    )?;

    let mut scores = stmt
        .query_map([], |row| {
            let word_count: i64 = row.get(3)?;
            let cfr_reference_count: i64 = row.get(4)?;
            Ok(ComplexityScore {
                id: row.get(0)?,
                name: row.get(1)?,
                short_name: row.get(2)?,
                word_count,
                cfr_reference_count,
                complexity_score: complexity_score(word_count, cfr_reference_count),
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to compute complexity scores")?;

    scores.sort_by(|a, b| {
        b.complexity_score
            .cmp(&a.complexity_score)
            .then_with(|| a.name.cmp(&b.name))
    });

    Ok(scores)
}

// ============================================================================
// CHECKSUMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgencyChecksum {
    pub name: String,
    pub short_name: Option<String>,
    pub checksum: String,
    pub last_updated: DateTime<Utc>,
}

pub fn agency_checksums(conn: &Connection) -> Result<Vec<AgencyChecksum>> {
    Ok(list_agencies(conn)?
        .into_iter()
        .map(|a| AgencyChecksum {
            name: a.name,
            short_name: a.short_name,
            checksum: a.checksum,
            last_updated: a.updated_at,
        })
        .collect())
}

// ============================================================================
// CSV EXPORT
// ============================================================================

#[derive(Serialize)]
struct AgencyCsvRow<'a> {
    slug: &'a str,
    name: &'a str,
    short_name: &'a str,
    word_count: i64,
    cfr_reference_count: i64,
    cfr_titles: String,
    complexity_score: i64,
    checksum: &'a str,
    updated_at: String,
}

/// Write the agency listing as CSV. Returns the number of data rows.
pub fn export_agencies_csv<W: Write>(conn: &Connection, writer: W) -> Result<usize> {
    let agencies = list_agencies(conn)?;
    let mut wtr = csv::Writer::from_writer(writer);

    for agency in &agencies {
        wtr.serialize(AgencyCsvRow {
            slug: &agency.slug,
            name: &agency.name,
            short_name: agency.short_name.as_deref().unwrap_or(""),
            word_count: agency.word_count,
            cfr_reference_count: agency.cfr_reference_count,
            cfr_titles: agency.cfr_titles_joined(),
            complexity_score: complexity_score(agency.word_count, agency.cfr_reference_count),
            checksum: &agency.checksum,
            updated_at: agency.updated_at.to_rfc3339(),
        })
        .context("Failed to write CSV row")?;
    }

    wtr.flush().context("Failed to flush CSV output")?;
    Ok(agencies.len())
}

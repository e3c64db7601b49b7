// 📥 Snapshot Parser - untrusted agency JSON → typed records
//
// Accepted shapes:
//   { "agencies": [ {..agency..}, ... ] }
//   [ {..agency..}, ... ]
//
// Each agency keeps its raw JSON value (in received key order) so the
// fingerprint is computed over exactly what the source sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

// ============================================================================
// RECORD TYPES
// ============================================================================

/// A record that could not be turned into an `AgencyRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedRecord {
    /// Path inside the document, e.g. `agencies[3].children[1]`
    pub location: String,
    pub reason: String,
}

impl MalformedRecord {
    fn new(location: impl Into<String>, reason: impl Into<String>) -> Self {
        MalformedRecord {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// One regulatory citation as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfrReferenceRecord {
    pub title: i64,
    pub chapter: Option<String>,
    pub subtitle: Option<String>,
}

/// A validated agency (top-level or child).
#[derive(Debug, Clone, PartialEq)]
pub struct AgencyRecord {
    pub slug: String,
    pub name: String,
    pub short_name: Option<String>,
    pub display_name: Option<String>,
    pub sortable_name: Option<String>,
    pub cfr_references: Vec<CfrReferenceRecord>,
    /// The record exactly as received (children included for top-level agencies)
    pub raw: Value,
}

/// A top-level entry with its nested children.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub location: String,
    pub record: Result<AgencyRecord, MalformedRecord>,
    pub children: Vec<Result<AgencyRecord, MalformedRecord>>,
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// One full incoming dataset for an ingestion run.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub agencies: Vec<SnapshotEntry>,
}

impl Snapshot {
    /// Parse a snapshot document. Only a document that is not an agency list at
    /// all fails here; individual bad records are kept as `Err` entries.
    pub fn from_value(document: Value) -> Result<Self, MalformedRecord> {
        let agencies = match document {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("agencies") {
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(MalformedRecord::new("$.agencies", "expected an array"));
                }
                None => {
                    return Err(MalformedRecord::new("$", "missing `agencies` array"));
                }
            },
            _ => {
                return Err(MalformedRecord::new(
                    "$",
                    "expected an object with `agencies` or an array of agencies",
                ))
            }
        };

        let entries = agencies
            .into_iter()
            .enumerate()
            .map(|(i, value)| parse_entry(format!("agencies[{}]", i), value))
            .collect();

        Ok(Snapshot { agencies: entries })
    }

    pub fn from_json_str(text: &str) -> Result<Self, MalformedRecord> {
        let document: Value = serde_json::from_str(text)
            .map_err(|e| MalformedRecord::new("$", format!("invalid JSON: {}", e)))?;
        Self::from_value(document)
    }

    /// Number of top-level entries (valid or not)
    pub fn len(&self) -> usize {
        self.agencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agencies.is_empty()
    }

    /// Every malformed record in document order, children included.
    pub fn malformed(&self) -> impl Iterator<Item = &MalformedRecord> {
        self.agencies.iter().flat_map(|entry| {
            entry
                .record
                .as_ref()
                .err()
                .into_iter()
                .chain(entry.children.iter().filter_map(|c| c.as_ref().err()))
        })
    }
}

fn parse_entry(location: String, value: Value) -> SnapshotEntry {
    let children = match value.get("children") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, child)| {
                let child_location = format!("{}.children[{}]", location, i);
                AgencyRecord::from_value(&child_location, child.clone())
            })
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => vec![Err(MalformedRecord::new(
            format!("{}.children", location),
            "expected an array",
        ))],
    };

    SnapshotEntry {
        record: AgencyRecord::from_value(&location, value),
        location,
        children,
    }
}

// ============================================================================
// AGENCY RECORD PARSING
// ============================================================================

impl AgencyRecord {
    pub fn from_value(location: &str, raw: Value) -> Result<Self, MalformedRecord> {
        let obj = raw
            .as_object()
            .ok_or_else(|| MalformedRecord::new(location, "expected an object"))?;

        let slug = required_text(obj, "slug", location)?;
        let name = required_text(obj, "name", location)?;

        let cfr_references = match obj.get("cfr_references") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    let reference = CfrReferenceRecord::from_value(item);
                    if reference.is_none() {
                        warn!(
                            location = %format!("{}.cfr_references[{}]", location, i),
                            "ignoring cfr reference without a numeric title"
                        );
                    }
                    reference
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(AgencyRecord {
            slug,
            name,
            short_name: optional_text(obj, "short_name"),
            display_name: optional_text(obj, "display_name"),
            sortable_name: optional_text(obj, "sortable_name"),
            cfr_references,
            raw,
        })
    }
}

impl CfrReferenceRecord {
    /// `title` may arrive as a number or a numeric string; chapter and subtitle
    /// may be strings or numbers.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let title = match obj.get("title")? {
            Value::Number(n) => n.as_i64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };

        Some(CfrReferenceRecord {
            title,
            chapter: scalar_text(obj, "chapter"),
            subtitle: scalar_text(obj, "subtitle"),
        })
    }
}

fn required_text(obj: &Map<String, Value>, key: &str, location: &str) -> Result<String, MalformedRecord> {
    match obj.get(key).and_then(Value::as_str).map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(MalformedRecord::new(
            location,
            format!("missing required field `{}`", key),
        )),
    }
}

fn optional_text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn scalar_text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

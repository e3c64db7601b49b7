// 🌳 Hierarchy Builder - two-pass ingestion of parent/child agencies
//
// Pass 1: top-level agencies → reconcile, sync references, remember slug → id
// Pass 2: children → look up the parent's id from pass 1, reconcile
//
// Children point at their parent's INTERNAL key, which only exists once the
// parent is persisted (possibly in this same run), hence two passes.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::MalformedPolicy;
use crate::db::ConnectionPool;
use crate::error::{DbError, IngestError};
use crate::reconciler::{self, AgencyOutcome, AuditStatus, Decision};
use crate::references;
use crate::snapshot::{AgencyRecord, MalformedRecord, Snapshot};
use crate::source::SnapshotSource;

// ============================================================================
// INGEST REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Top-level agencies reconciled (the number an ingest run reports back)
    pub top_level_processed: usize,
    pub children_processed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub references_upserted: usize,
    /// Rows committed without their change event
    pub audit_failures: usize,
    pub skipped: Vec<MalformedRecord>,
}

impl IngestReport {
    /// Rows committed by this run: agencies created or updated plus
    /// reference rows inserted or changed.
    pub fn entities_written(&self) -> usize {
        self.created + self.updated + self.references_upserted
    }

    pub fn audit_complete(&self) -> bool {
        self.audit_failures == 0
    }

    fn record(&mut self, outcome: &AgencyOutcome) {
        match outcome.decision {
            Decision::Created => self.created += 1,
            Decision::Updated => self.updated += 1,
            Decision::Unchanged => self.unchanged += 1,
        }
        if outcome.audit == AuditStatus::Failed {
            self.audit_failures += 1;
        }
    }

    fn skip(&mut self, record: MalformedRecord) {
        warn!(location = %record.location, reason = %record.reason, "skipping malformed record");
        self.skipped.push(record);
    }

    fn storage_failure(&self, source: DbError) -> IngestError {
        IngestError::StorageUnavailable {
            entities_written: self.entities_written(),
            source,
        }
    }
}

// ============================================================================
// PLACEMENT
// ============================================================================

/// Where one slug lands in this run: its record and its parent's slug.
#[derive(Debug)]
struct Placement<'a> {
    location: String,
    record: &'a AgencyRecord,
    parent: Option<&'a str>,
}

/// One placement per slug. A slug listed more than once (top level and
/// nested, or under two parents) keeps its last placement in document order,
/// so every slug is reconciled exactly once per run.
struct Placements<'a> {
    order: Vec<&'a str>,
    by_slug: HashMap<&'a str, Placement<'a>>,
}

impl<'a> Placements<'a> {
    fn settle(snapshot: &'a Snapshot, report: &mut IngestReport) -> Self {
        let mut plan = Placements {
            order: Vec::new(),
            by_slug: HashMap::new(),
        };

        for entry in &snapshot.agencies {
            let parent = match &entry.record {
                Ok(record) => {
                    plan.place(entry.location.clone(), record, None);
                    record
                }
                Err(bad) => {
                    report.skip(bad.clone());
                    for (i, child) in entry.children.iter().enumerate() {
                        report.skip(match child {
                            Err(child_bad) => child_bad.clone(),
                            Ok(_) => MalformedRecord {
                                location: format!("{}.children[{}]", entry.location, i),
                                reason: "parent agency is malformed".to_string(),
                            },
                        });
                    }
                    continue;
                }
            };

            for (i, child) in entry.children.iter().enumerate() {
                match child {
                    Ok(record) => plan.place(
                        format!("{}.children[{}]", entry.location, i),
                        record,
                        Some(parent.slug.as_str()),
                    ),
                    Err(bad) => report.skip(bad.clone()),
                }
            }
        }

        plan
    }

    fn place(&mut self, location: String, record: &'a AgencyRecord, parent: Option<&'a str>) {
        let slug = record.slug.as_str();
        let placement = Placement { location, record, parent };

        match self.by_slug.insert(slug, placement) {
            Some(earlier) => debug!(
                slug,
                earlier = %earlier.location,
                "slug listed more than once; last placement wins"
            ),
            None => self.order.push(slug),
        }
    }

    fn in_order(&self) -> impl Iterator<Item = &Placement<'a>> {
        self.order.iter().filter_map(move |slug| self.by_slug.get(slug))
    }

    fn top_level(&self) -> impl Iterator<Item = &Placement<'a>> {
        self.in_order().filter(|p| p.parent.is_none())
    }

    fn children(&self) -> impl Iterator<Item = &Placement<'a>> {
        self.in_order().filter(|p| p.parent.is_some())
    }
}

// ============================================================================
// INGESTOR
// ============================================================================

/// Owns nothing but its dependencies: the pool and the malformed-record policy.
#[derive(Clone)]
pub struct Ingestor {
    pool: ConnectionPool,
    policy: MalformedPolicy,
}

impl Ingestor {
    pub fn new(pool: ConnectionPool, policy: MalformedPolicy) -> Self {
        Ingestor { pool, policy }
    }

    /// Fetch once, then ingest. A failed fetch writes nothing.
    pub fn ingest_from(&self, source: &dyn SnapshotSource) -> Result<IngestReport, IngestError> {
        info!(source = %source.describe(), "fetching snapshot");
        let document = source.fetch()?;
        let snapshot = Snapshot::from_value(document)?;
        self.ingest(&snapshot)
    }

    pub fn ingest(&self, snapshot: &Snapshot) -> Result<IngestReport, IngestError> {
        if self.policy == MalformedPolicy::Abort {
            if let Some(bad) = snapshot.malformed().next() {
                return Err(IngestError::MalformedRecord(bad.clone()));
            }
        }

        let mut report = IngestReport::default();
        let plan = Placements::settle(snapshot, &mut report);
        let mut conn = self.pool.get().map_err(|e| report.storage_failure(e))?;
        let mut resolved: HashMap<&str, i64> = HashMap::new();

        info!(top_level = snapshot.len(), policy = %self.policy, "ingesting snapshot");

        // ====================================================================
        // PASS 1: agencies placed at the top level
        // ====================================================================
        for placement in plan.top_level() {
            let id = self
                .reconcile_one(&mut conn, placement.record, None, &mut report)
                .map_err(|e| report.storage_failure(e))?;
            resolved.insert(placement.record.slug.as_str(), id);
            report.top_level_processed += 1;
        }

        // ====================================================================
        // PASS 2: children, once their parent's id is known
        // ====================================================================
        let mut pending: Vec<&Placement> = plan.children().collect();
        loop {
            let before = pending.len();
            let mut waiting = Vec::new();

            for placement in pending {
                let parent_id = placement.parent.and_then(|slug| resolved.get(slug).copied());
                let Some(parent_id) = parent_id else {
                    waiting.push(placement);
                    continue;
                };

                let id = self
                    .reconcile_one(&mut conn, placement.record, Some(parent_id), &mut report)
                    .map_err(|e| report.storage_failure(e))?;
                resolved.insert(placement.record.slug.as_str(), id);
                report.children_processed += 1;
            }

            pending = waiting;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        for placement in pending {
            report.skip(MalformedRecord {
                location: placement.location.clone(),
                reason: "parent agency could not be resolved".to_string(),
            });
        }

        info!(
            top_level = report.top_level_processed,
            children = report.children_processed,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            audit_failures = report.audit_failures,
            "snapshot ingested"
        );

        Ok(report)
    }

    fn reconcile_one(
        &self,
        conn: &mut rusqlite::Connection,
        record: &AgencyRecord,
        parent_id: Option<i64>,
        report: &mut IngestReport,
    ) -> Result<i64, DbError> {
        let outcome = reconciler::persist(conn, record, parent_id)?;
        report.record(&outcome);
        report.references_upserted += references::sync(conn, outcome.id, &record.cfr_references)?;
        Ok(outcome.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{find_agency_by_slug, get_all_agencies, verify_count, PoolOptions};
    use crate::error::SourceError;
    use crate::ledger::{self, ChangeKind, ENTITY_AGENCY};
    use crate::references::references_for_agency;
    use serde_json::{json, Value};

    fn pool() -> ConnectionPool {
        ConnectionPool::open_in_memory(PoolOptions::default()).unwrap()
    }

    fn snapshot(value: Value) -> Snapshot {
        Snapshot::from_value(value).unwrap()
    }

    fn agriculture() -> Value {
        json!({
            "agencies": [
                {
                    "name": "Department of Agriculture",
                    "short_name": "USDA",
                    "display_name": "Department of Agriculture",
                    "sortable_name": "Agriculture, Department of",
                    "slug": "agriculture-department",
                    "children": [
                        {
                            "name": "Forest Service",
                            "display_name": "Forest Service, Agriculture Department",
                            "sortable_name": "Forest Service",
                            "slug": "forest-service"
                        },
                        {
                            "name": "Rural Utilities Service",
                            "display_name": "Rural Utilities Service, Agriculture Department",
                            "sortable_name": "Rural Utilities Service",
                            "slug": "rural-utilities-service"
                        }
                    ],
                    "cfr_references": [
                        { "title": 2, "chapter": "IV" },
                        { "title": 5, "chapter": "LXXIII" }
                    ]
                },
                {
                    "name": "Administrative Conference of the United States",
                    "short_name": "ACUS",
                    "display_name": "Administrative Conference of the United States",
                    "sortable_name": "Administrative Conference of the United States",
                    "slug": "administrative-conference-of-the-united-states",
                    "children": [],
                    "cfr_references": [{ "title": 1, "chapter": "III" }]
                }
            ]
        })
    }

    struct FailingSource;

    impl SnapshotSource for FailingSource {
        fn describe(&self) -> String {
            "failing".to_string()
        }

        fn fetch(&self) -> Result<Value, SourceError> {
            Err(SourceError::Http { status: 503, body: "maintenance".to_string() })
        }
    }

    #[test]
    fn test_ingest_builds_hierarchy() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);

        let report = ingestor.ingest(&snapshot(agriculture())).unwrap();
        assert_eq!(report.top_level_processed, 2);
        assert_eq!(report.children_processed, 2);
        assert_eq!(report.created, 4);
        assert_eq!(report.references_upserted, 3);
        assert!(report.audit_complete());

        let conn = pool.get().unwrap();
        let parent = find_agency_by_slug(&conn, "agriculture-department").unwrap().unwrap();
        let child = find_agency_by_slug(&conn, "forest-service").unwrap().unwrap();
        assert!(parent.is_top_level());
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(references_for_agency(&conn, parent.id).unwrap().len(), 2);
        assert_eq!(ledger::count_events(&conn).unwrap(), 4);

        println!("✅ Hierarchy test PASSED: children resolved to parent created in the same run");
    }

    #[test]
    fn test_ingest_twice_is_idempotent() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);
        let data = snapshot(agriculture());

        ingestor.ingest(&data).unwrap();
        let rows_after_first = get_all_agencies(&pool.get().unwrap()).unwrap();

        let second = ingestor.ingest(&data).unwrap();
        let conn = pool.get().unwrap();
        let rows_after_second = get_all_agencies(&conn).unwrap();

        assert_eq!(second.top_level_processed, 2);
        assert_eq!(second.entities_written(), 0);
        assert_eq!(second.unchanged, 4);
        assert_eq!(rows_after_first, rows_after_second, "stored rows untouched");
        assert_eq!(ledger::count_events(&conn).unwrap(), 4, "no new change events");

        println!("✅ Idempotency test PASSED: second ingest wrote nothing");
    }

    #[test]
    fn test_slug_at_both_levels_is_reconciled_once() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);
        let data = snapshot(json!({
            "agencies": [
                { "slug": "p", "name": "Pea", "children": [ { "slug": "c", "name": "Cee" } ] },
                { "slug": "c", "name": "Cee" }
            ]
        }));

        let first = ingestor.ingest(&data).unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(first.top_level_processed, 2);
        assert_eq!(first.children_processed, 0, "last placement (top level) wins");

        let conn = pool.get().unwrap();
        let events_after_first = ledger::count_events(&conn).unwrap();
        assert!(find_agency_by_slug(&conn, "c").unwrap().unwrap().is_top_level());
        drop(conn);

        for _ in 0..2 {
            let again = ingestor.ingest(&data).unwrap();
            assert_eq!(again.updated, 0);
            assert_eq!(again.unchanged, 2);
        }
        assert_eq!(ledger::count_events(&pool.get().unwrap()).unwrap(), events_after_first);

        println!("✅ Duplicate slug test PASSED: repeated ingest adds no events");
    }

    #[test]
    fn test_child_under_two_parents_keeps_last_parent() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);
        let data = snapshot(json!([
            { "slug": "p1", "name": "First", "children": [ { "slug": "c", "name": "Cee" } ] },
            { "slug": "p2", "name": "Second", "children": [ { "slug": "c", "name": "Cee" } ] }
        ]));

        ingestor.ingest(&data).unwrap();
        let second = ingestor.ingest(&data).unwrap();
        assert_eq!(second.updated, 0);

        let conn = pool.get().unwrap();
        let p2 = find_agency_by_slug(&conn, "p2").unwrap().unwrap();
        let child = find_agency_by_slug(&conn, "c").unwrap().unwrap();
        assert_eq!(child.parent_id, Some(p2.id));
        assert_eq!(ledger::count_events(&conn).unwrap(), 3);
    }

    #[test]
    fn test_child_waits_for_nested_parent() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);
        // c ends up under p, and p itself ends up under q
        let data = snapshot(json!([
            { "slug": "r", "name": "Are", "children": [ { "slug": "c", "name": "Cee" } ] },
            { "slug": "p", "name": "Pea", "children": [ { "slug": "c", "name": "Cee" } ] },
            { "slug": "q", "name": "Queue", "children": [ { "slug": "p", "name": "Pea" } ] }
        ]));

        let report = ingestor.ingest(&data).unwrap();
        assert_eq!(report.top_level_processed, 2);
        assert_eq!(report.children_processed, 2);
        assert!(report.skipped.is_empty());

        let conn = pool.get().unwrap();
        let q = find_agency_by_slug(&conn, "q").unwrap().unwrap();
        let p = find_agency_by_slug(&conn, "p").unwrap().unwrap();
        let c = find_agency_by_slug(&conn, "c").unwrap().unwrap();
        assert_eq!(p.parent_id, Some(q.id));
        assert_eq!(c.parent_id, Some(p.id));
        let events = ledger::count_events(&conn).unwrap();
        drop(conn);

        assert_eq!(ingestor.ingest(&data).unwrap().entities_written(), 0);
        assert_eq!(ledger::count_events(&pool.get().unwrap()).unwrap(), events);
    }

    #[test]
    fn test_create_then_update_chains_checksums() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);

        ingestor
            .ingest(&snapshot(json!({"agencies": [{"slug": "a", "name": "Alpha", "display_name": "Alpha Agency"}]})))
            .unwrap();
        let report = ingestor
            .ingest(&snapshot(json!({"agencies": [{"slug": "a", "name": "Alpha", "display_name": "Alpha Agency Renamed"}]})))
            .unwrap();
        assert_eq!(report.updated, 1);

        let conn = pool.get().unwrap();
        let id = find_agency_by_slug(&conn, "a").unwrap().unwrap().id;
        let events = ledger::events_for_entity(&conn, ENTITY_AGENCY, id).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ChangeKind::Created);
        assert_eq!(events[1].kind, ChangeKind::Updated);
        assert_eq!(events[1].old_checksum.as_deref(), Some(events[0].new_checksum.as_str()));
        assert_eq!(events[1].old_word_count, Some(3));
        assert_eq!(events[1].new_word_count, 4);
        assert_eq!(verify_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_child_edit_also_updates_parent_checksum() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);
        ingestor.ingest(&snapshot(agriculture())).unwrap();

        let mut edited = agriculture();
        edited["agencies"][0]["children"][0]["display_name"] = json!("Forest Service (renamed)");
        let report = ingestor.ingest(&snapshot(edited)).unwrap();

        // The parent's payload embeds its children, so both register a change
        assert_eq!(report.updated, 2);
        assert_eq!(report.unchanged, 2);
    }

    #[test]
    fn test_reordered_keys_register_as_update() {
        // Known behavior: the checksum covers the payload as received, so a
        // source that reorders keys produces an `updated` event with no
        // semantic change.
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);

        ingestor
            .ingest(&Snapshot::from_json_str(r#"[{"slug":"a","name":"Alpha"}]"#).unwrap())
            .unwrap();
        let report = ingestor
            .ingest(&Snapshot::from_json_str(r#"[{"name":"Alpha","slug":"a"}]"#).unwrap())
            .unwrap();

        assert_eq!(report.updated, 1);
        let conn = pool.get().unwrap();
        let records = ledger::recent(&conn, 10).unwrap();
        assert_eq!(records[0].event.old_word_count, Some(records[0].event.new_word_count));
    }

    #[test]
    fn test_agency_moving_between_levels_is_reparented() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);
        let standalone = json!({"slug": "c", "name": "Cee"});

        // First seen at the top level
        ingestor
            .ingest(&snapshot(json!({"agencies": [{"slug": "p", "name": "Pea"}, standalone.clone()]})))
            .unwrap();

        // Then nested under p
        let report = ingestor
            .ingest(&snapshot(json!({"agencies": [{"slug": "p", "name": "Pea", "children": [standalone.clone()]}]})))
            .unwrap();
        assert_eq!(report.children_processed, 1);

        let conn = pool.get().unwrap();
        let parent = find_agency_by_slug(&conn, "p").unwrap().unwrap();
        let child = find_agency_by_slug(&conn, "c").unwrap().unwrap();
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(verify_count(&conn).unwrap(), 2, "no duplicate row for the moved slug");
        drop(conn);

        // And back to the top level
        ingestor
            .ingest(&snapshot(json!({"agencies": [{"slug": "p", "name": "Pea"}, standalone]})))
            .unwrap();
        let conn = pool.get().unwrap();
        assert!(find_agency_by_slug(&conn, "c").unwrap().unwrap().is_top_level());
    }

    #[test]
    fn test_absent_agencies_are_kept() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);

        ingestor.ingest(&snapshot(agriculture())).unwrap();
        ingestor
            .ingest(&snapshot(json!({"agencies": [{"slug": "new", "name": "Newcomer"}]})))
            .unwrap();

        assert_eq!(verify_count(&pool.get().unwrap()).unwrap(), 5);
    }

    #[test]
    fn test_skip_policy_continues_past_malformed_records() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);

        let report = ingestor
            .ingest(&snapshot(json!({
                "agencies": [
                    { "name": "No Slug", "children": [ { "slug": "orphan", "name": "Orphan" } ] },
                    { "slug": "ok", "name": "Okay", "children": [ { "name": "Missing Slug" } ] }
                ]
            })))
            .unwrap();

        assert_eq!(report.top_level_processed, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(report.skipped[1].reason, "parent agency is malformed");
        assert_eq!(report.skipped[2].location, "agencies[1].children[0]");

        let conn = pool.get().unwrap();
        assert!(find_agency_by_slug(&conn, "orphan").unwrap().is_none());
        assert_eq!(verify_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_abort_policy_writes_nothing() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Abort);

        let err = ingestor
            .ingest(&snapshot(json!({
                "agencies": [
                    { "slug": "ok", "name": "Okay" },
                    { "slug": "ok-too", "name": "Okay Too", "children": [ { "slug": "nameless" } ] }
                ]
            })))
            .unwrap_err();

        assert!(err.nothing_stored());
        match err {
            IngestError::MalformedRecord(bad) => assert_eq!(bad.location, "agencies[1].children[0]"),
            other => panic!("expected MalformedRecord, got {}", other),
        }
        assert_eq!(verify_count(&pool.get().unwrap()).unwrap(), 0);
    }

    #[test]
    fn test_source_failure_writes_nothing() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);

        let err = ingestor.ingest_from(&FailingSource).unwrap_err();
        assert!(matches!(err, IngestError::SourceUnavailable(SourceError::Http { status: 503, .. })));
        assert!(err.nothing_stored());
        assert_eq!(verify_count(&pool.get().unwrap()).unwrap(), 0);
    }

    #[test]
    fn test_audit_failure_does_not_fail_the_run() {
        let pool = pool();
        pool.get()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER history_offline BEFORE INSERT ON data_history
                 BEGIN SELECT RAISE(ABORT, 'history offline'); END;",
            )
            .unwrap();

        let report = Ingestor::new(pool.clone(), MalformedPolicy::Skip)
            .ingest(&snapshot(agriculture()))
            .unwrap();

        assert_eq!(report.created, 4);
        assert_eq!(report.audit_failures, 4);
        assert!(!report.audit_complete());
        assert_eq!(verify_count(&pool.get().unwrap()).unwrap(), 4);
    }

    #[test]
    fn test_pool_exhaustion_is_storage_unavailable() {
        let pool = ConnectionPool::open_in_memory(PoolOptions {
            size: 1,
            acquire_timeout: std::time::Duration::from_millis(50),
            ..PoolOptions::default()
        })
        .unwrap();
        let _held = pool.get().unwrap();

        let err = Ingestor::new(pool.clone(), MalformedPolicy::Skip)
            .ingest(&snapshot(agriculture()))
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::StorageUnavailable { entities_written: 0, source: DbError::PoolExhausted { .. } }
        ));
        assert!(err.nothing_stored());
    }

    #[test]
    fn test_storage_failure_counts_committed_references() {
        let pool = pool();
        pool.get()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER disk_full BEFORE INSERT ON agencies WHEN NEW.slug = 'b'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let err = Ingestor::new(pool.clone(), MalformedPolicy::Skip)
            .ingest(&snapshot(json!([
                { "slug": "a", "name": "Alpha", "cfr_references": [ { "title": 4 } ] },
                { "slug": "b", "name": "Bravo" }
            ])))
            .unwrap_err();

        // One agency row plus its reference row were committed before the failure
        assert!(matches!(err, IngestError::StorageUnavailable { entities_written: 2, .. }));
        assert!(!err.nothing_stored());
    }

    #[test]
    fn test_reference_overwrite_on_reingest() {
        let pool = pool();
        let ingestor = Ingestor::new(pool.clone(), MalformedPolicy::Skip);

        ingestor
            .ingest(&snapshot(json!([{"slug": "a", "name": "Alpha", "cfr_references": [{"title": 7, "chapter": "I"}]}])))
            .unwrap();
        ingestor
            .ingest(&snapshot(json!([{"slug": "a", "name": "Alpha", "cfr_references": [{"title": 7, "chapter": "II"}]}])))
            .unwrap();

        let conn = pool.get().unwrap();
        let id = find_agency_by_slug(&conn, "a").unwrap().unwrap().id;
        let refs = references_for_agency(&conn, id).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].chapter.as_deref(), Some("II"));
    }
}

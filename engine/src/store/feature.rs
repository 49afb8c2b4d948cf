//! Feature rows and the mutation contracts over them (§4.A).
//!
//! Grounded on the original `Feature` SQLAlchemy model and the
//! `feature_*` MCP tool implementations (bulk create, claim_and_get,
//! mark_passing/failing, skip), reshaped onto `rusqlite` with the same
//! atomic compare-and-set claim semantics and additive-priority bulk
//! insert.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub const MAX_DEPENDENCIES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    None,
    PendingReview,
    Approved,
    Rejected,
}

impl ReviewStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "pending_review" => Self::PendingReview,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: i64,
    pub priority: i64,
    pub category: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<String>,
    pub dependencies: Vec<i64>,
    pub passes: bool,
    pub in_progress: bool,
    pub review_status: ReviewStatus,
    pub review_notes: Option<String>,
    pub planning_work_item_id: Option<String>,
    pub synced_at: Option<String>,
    pub updated_at: Option<String>,
    pub last_status_hash: Option<String>,
}

impl Feature {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let steps_json: String = row.get("steps")?;
        let deps_json: String = row.get("dependencies")?;
        let review_status: String = row.get("review_status")?;
        Ok(Self {
            id: row.get("id")?,
            priority: row.get("priority")?,
            category: row.get("category")?,
            name: row.get("name")?,
            description: row.get("description")?,
            steps: serde_json::from_str(&steps_json).unwrap_or_default(),
            dependencies: serde_json::from_str(&deps_json).unwrap_or_default(),
            passes: row.get::<_, i64>("passes")? != 0,
            in_progress: row.get::<_, i64>("in_progress")? != 0,
            review_status: ReviewStatus::parse(&review_status),
            review_notes: row.get("review_notes")?,
            planning_work_item_id: row.get("planning_work_item_id")?,
            synced_at: row.get("synced_at")?,
            updated_at: row.get("updated_at")?,
            last_status_hash: row.get("last_status_hash")?,
        })
    }
}

/// One entry in a bulk-create request: `depends_on_indices` are positions
/// within the same batch and must all be `< self_index` (backward-only).
pub struct NewFeature {
    pub category: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<String>,
    pub depends_on_indices: Vec<usize>,
}

pub struct BulkCreateOutcome {
    pub created: Vec<i64>,
    pub with_dependencies: usize,
}

pub fn create_features_bulk(
    conn: &mut Connection,
    entries: &[NewFeature],
) -> EngineResult<BulkCreateOutcome> {
    for (i, entry) in entries.iter().enumerate() {
        if entry.depends_on_indices.len() > MAX_DEPENDENCIES {
            return Err(EngineError::constraint(format!(
                "feature at batch index {i} declares {} dependencies, exceeding the limit of {MAX_DEPENDENCIES}",
                entry.depends_on_indices.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for &dep_idx in &entry.depends_on_indices {
            if dep_idx >= i {
                return Err(EngineError::programmer(format!(
                    "feature at batch index {i} references forward or self index {dep_idx}"
                )));
            }
            if !seen.insert(dep_idx) {
                return Err(EngineError::constraint(format!(
                    "feature at batch index {i} declares duplicate dependency index {dep_idx}"
                )));
            }
        }
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let start_priority: i64 = tx.query_row(
        "SELECT COALESCE(MAX(priority), 0) + 1 FROM features",
        [],
        |r| r.get(0),
    )?;

    let mut batch_ids = Vec::with_capacity(entries.len());
    let now = Utc::now().to_rfc3339();
    for (i, entry) in entries.iter().enumerate() {
        let steps_json = serde_json::to_string(&entry.steps).unwrap_or_else(|_| "[]".into());
        tx.execute(
            "INSERT INTO features (priority, category, name, description, steps, dependencies, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '[]', ?6)",
            params![
                start_priority + i as i64,
                entry.category,
                entry.name,
                entry.description,
                steps_json,
                now,
            ],
        )?;
        batch_ids.push(tx.last_insert_rowid());
    }

    let mut with_dependencies = 0;
    for (i, entry) in entries.iter().enumerate() {
        if entry.depends_on_indices.is_empty() {
            continue;
        }
        let mut dep_ids: Vec<i64> = entry
            .depends_on_indices
            .iter()
            .map(|&idx| batch_ids[idx])
            .collect();
        dep_ids.sort_unstable();
        dep_ids.dedup();
        let deps_json = serde_json::to_string(&dep_ids).unwrap_or_else(|_| "[]".into());
        tx.execute(
            "UPDATE features SET dependencies = ?1 WHERE id = ?2",
            params![deps_json, batch_ids[i]],
        )?;
        with_dependencies += 1;
    }

    tx.commit()?;
    Ok(BulkCreateOutcome {
        created: batch_ids,
        with_dependencies,
    })
}

pub fn get_by_id(conn: &Connection, id: i64) -> EngineResult<Feature> {
    conn.query_row("SELECT * FROM features WHERE id = ?1", params![id], Feature::from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("feature {id}")))
}

pub fn list_all(conn: &Connection) -> EngineResult<Vec<Feature>> {
    let mut stmt = conn.prepare("SELECT * FROM features")?;
    let rows = stmt
        .query_map([], Feature::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_pending_review(conn: &Connection, limit: usize) -> EngineResult<Vec<Feature>> {
    let mut stmt = conn.prepare("SELECT * FROM features WHERE review_status = 'pending_review' ORDER BY priority, id LIMIT ?1")?;
    let rows = stmt
        .query_map(params![limit as i64], Feature::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_passing(conn: &Connection, limit: usize) -> EngineResult<Vec<Feature>> {
    let mut stmt = conn.prepare("SELECT * FROM features WHERE passes = 1 ORDER BY priority, id LIMIT ?1")?;
    let rows = stmt
        .query_map(params![limit as i64], Feature::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct Stats {
    pub total: i64,
    pub passing: i64,
    pub in_progress: i64,
}

pub fn get_stats(conn: &Connection) -> EngineResult<Stats> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(passes), 0), COALESCE(SUM(in_progress), 0) FROM features",
        [],
        |row| {
            Ok(Stats {
                total: row.get(0)?,
                passing: row.get(1)?,
                in_progress: row.get(2)?,
            })
        },
    )
    .map_err(EngineError::from)
}

/// Atomic compare-and-set claim. `already_claimed` is true when this call
/// lost the race (another claimant already holds the feature); the
/// caller must treat its own prior claim as still valid in that case.
pub struct ClaimOutcome {
    pub feature: Feature,
    pub already_claimed: bool,
}

pub fn claim_and_get(conn: &mut Connection, id: i64) -> EngineResult<ClaimOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let feature = tx
        .query_row("SELECT * FROM features WHERE id = ?1", params![id], Feature::from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("feature {id}")))?;
    if feature.passes {
        return Err(EngineError::constraint(format!("feature {id} already passing")));
    }
    let updated = tx.execute(
        "UPDATE features SET in_progress = 1 WHERE id = ?1 AND passes = 0 AND in_progress = 0",
        params![id],
    )?;
    let already_claimed = updated == 0;
    let feature = tx
        .query_row("SELECT * FROM features WHERE id = ?1", params![id], Feature::from_row)
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("feature {id}")))?;
    tx.commit()?;
    Ok(ClaimOutcome { feature, already_claimed })
}

pub fn mark_in_progress(conn: &mut Connection, id: i64, blocked: bool) -> EngineResult<()> {
    if blocked {
        return Err(EngineError::constraint(format!(
            "feature {id} is blocked by a non-passing dependency"
        )));
    }
    conn.execute(
        "UPDATE features SET in_progress = 1 WHERE id = ?1 AND passes = 0",
        params![id],
    )?;
    Ok(())
}

pub fn mark_passing(conn: &mut Connection, id: i64) -> EngineResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let passes: Option<i64> = tx
        .query_row("SELECT passes FROM features WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    match passes {
        None => return Err(EngineError::not_found(format!("feature {id}"))),
        Some(1) => return Err(EngineError::constraint(format!("feature {id} already passing"))),
        _ => {}
    }
    tx.execute(
        "UPDATE features SET passes = 1, in_progress = 0, updated_at = ?2 WHERE id = ?1",
        params![id, Utc::now().to_rfc3339()],
    )?;
    tx.commit()?;
    Ok(())
}

pub fn mark_failing(conn: &mut Connection, id: i64) -> EngineResult<()> {
    let updated = conn.execute(
        "UPDATE features SET passes = 0, in_progress = 0, updated_at = ?2 WHERE id = ?1",
        params![id, Utc::now().to_rfc3339()],
    )?;
    if updated == 0 {
        return Err(EngineError::not_found(format!("feature {id}")));
    }
    Ok(())
}

pub fn clear_in_progress(conn: &mut Connection, id: i64) -> EngineResult<()> {
    conn.execute("UPDATE features SET in_progress = 0 WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn skip(conn: &mut Connection, id: i64) -> EngineResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let passes: Option<i64> = tx
        .query_row("SELECT passes FROM features WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    match passes {
        None => return Err(EngineError::not_found(format!("feature {id}"))),
        Some(1) => return Err(EngineError::constraint(format!("feature {id} is already passing, cannot skip"))),
        _ => {}
    }
    let max_priority: i64 = tx.query_row("SELECT COALESCE(MAX(priority), 0) FROM features", [], |r| r.get(0))?;
    tx.execute(
        "UPDATE features SET priority = ?2, in_progress = 0 WHERE id = ?1",
        params![id, max_priority + 1],
    )?;
    tx.commit()?;
    Ok(())
}

pub fn mark_for_review(conn: &mut Connection, id: i64) -> EngineResult<()> {
    conn.execute(
        "UPDATE features SET review_status = 'pending_review' WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub fn approve(conn: &mut Connection, id: i64) -> EngineResult<()> {
    conn.execute(
        "UPDATE features SET review_status = 'approved', review_notes = NULL WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub fn reject(conn: &mut Connection, id: i64, notes: &str) -> EngineResult<()> {
    conn.execute(
        "UPDATE features SET review_status = 'rejected', review_notes = ?2 WHERE id = ?1",
        params![id, notes],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::open_and_migrate;
    use tempfile::tempdir;

    fn open_test_conn() -> Connection {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.db");
        std::mem::forget(dir);
        open_and_migrate(&path).unwrap()
    }

    #[test]
    fn bulk_create_resolves_backward_indices() {
        let mut conn = open_test_conn();
        let entries = vec![
            NewFeature { category: "a".into(), name: "f0".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![] },
            NewFeature { category: "a".into(), name: "f1".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![] },
            NewFeature { category: "a".into(), name: "f2".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![] },
            NewFeature { category: "a".into(), name: "f3".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![] },
            NewFeature { category: "a".into(), name: "f4".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![0, 2] },
        ];
        let outcome = create_features_bulk(&mut conn, &entries).unwrap();
        assert_eq!(outcome.created.len(), 5);
        assert_eq!(outcome.with_dependencies, 1);
        let last = get_by_id(&conn, outcome.created[4]).unwrap();
        assert_eq!(last.dependencies, vec![outcome.created[0], outcome.created[2]]);
    }

    #[test]
    fn bulk_create_rejects_forward_reference() {
        let mut conn = open_test_conn();
        let entries = vec![
            NewFeature { category: "a".into(), name: "f0".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![1] },
            NewFeature { category: "a".into(), name: "f1".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![] },
        ];
        let err = create_features_bulk(&mut conn, &entries).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Programmer);
    }

    #[test]
    fn claim_and_get_is_idempotent_on_second_caller() {
        let mut conn = open_test_conn();
        let entries = vec![NewFeature { category: "a".into(), name: "f0".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![] }];
        let outcome = create_features_bulk(&mut conn, &entries).unwrap();
        let id = outcome.created[0];

        let first = claim_and_get(&mut conn, id).unwrap();
        assert!(!first.already_claimed);
        let second = claim_and_get(&mut conn, id).unwrap();
        assert!(second.already_claimed);
        assert!(second.feature.in_progress);
    }

    #[test]
    fn mark_passing_twice_errors_second_time() {
        let mut conn = open_test_conn();
        let entries = vec![NewFeature { category: "a".into(), name: "f0".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![] }];
        let outcome = create_features_bulk(&mut conn, &entries).unwrap();
        let id = outcome.created[0];
        mark_passing(&mut conn, id).unwrap();
        let err = mark_passing(&mut conn, id).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Constraint);
    }

    #[test]
    fn skip_moves_to_end_of_queue() {
        let mut conn = open_test_conn();
        let entries: Vec<_> = (0..5)
            .map(|i| NewFeature { category: "a".into(), name: format!("f{i}"), description: "d".into(), steps: vec![], depends_on_indices: vec![] })
            .collect();
        let outcome = create_features_bulk(&mut conn, &entries).unwrap();
        let target = outcome.created[3];
        skip(&mut conn, target).unwrap();
        let feature = get_by_id(&conn, target).unwrap();
        assert_eq!(feature.priority, 6);
        assert!(!feature.in_progress);
    }
}

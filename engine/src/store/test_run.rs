//! Append-only TestRun audit rows (§3). Never mutated after insertion;
//! cascade-deleted with their parent feature by the foreign key.

use rusqlite::{params, Connection};

use crate::error::EngineResult;

pub struct NewTestRun<'a> {
    pub feature_id: i64,
    pub passed: bool,
    pub agent_type: &'a str,
    pub agent_pid: Option<u32>,
    pub feature_ids_in_batch: Option<&'a [i64]>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub return_code: Option<i32>,
}

pub fn append_test_run(conn: &Connection, run: &NewTestRun) -> EngineResult<i64> {
    let batch_json = run
        .feature_ids_in_batch
        .map(|ids| serde_json::to_string(ids).unwrap_or_else(|_| "[]".into()));
    conn.execute(
        "INSERT INTO test_runs (feature_id, passed, agent_type, agent_pid, feature_ids_in_batch, started_at, completed_at, return_code)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.feature_id,
            run.passed,
            run.agent_type,
            run.agent_pid,
            batch_json,
            run.started_at,
            run.completed_at,
            run.return_code,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::feature::{create_features_bulk, NewFeature};
    use crate::store::schema::open_and_migrate;
    use tempfile::tempdir;

    #[test]
    fn test_runs_cascade_delete_with_their_feature() {
        let dir = tempdir().unwrap();
        let mut conn = open_and_migrate(&dir.path().join("runs.db")).unwrap();
        let ids = create_features_bulk(
            &mut conn,
            &[NewFeature { category: "a".into(), name: "f0".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![] }],
        )
        .unwrap()
        .created;
        let id = ids[0];

        append_test_run(
            &conn,
            &NewTestRun {
                feature_id: id,
                passed: true,
                agent_type: "coding",
                agent_pid: Some(123),
                feature_ids_in_batch: None,
                started_at: "2026-01-01T00:00:00Z".into(),
                completed_at: None,
                return_code: Some(0),
            },
        )
        .unwrap();

        conn.execute("DELETE FROM features WHERE id = ?1", params![id]).unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM test_runs WHERE feature_id = ?1", params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}

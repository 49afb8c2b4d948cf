//! Backlog store (§4.A) — durable, concurrency-safe feature repository.
//!
//! `Store` is a thin facade over a single `rusqlite::Connection` opened
//! against one sqlite file per project. It does not itself provide
//! cross-process mutual exclusion beyond sqlite's own locking; §4.G's
//! advisory PID lock (see `crate::lock`) is what keeps a second
//! orchestrator from running concurrently against the same project.

pub mod dependency;
pub mod feature;
pub mod memory;
pub mod schedule;
pub mod scheduler;
pub mod schema;
pub mod test_run;

use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;

pub use feature::{BulkCreateOutcome, ClaimOutcome, Feature, NewFeature, ReviewStatus, Stats, MAX_DEPENDENCIES};
pub use memory::{MemoryCategory, MemoryEntry};
pub use scheduler::{BlockedFeature, Graph, GraphEdge, GraphNode, NodeStatus};
pub use test_run::NewTestRun;

use crate::error::EngineResult;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> EngineResult<Self> {
        let conn = schema::open_and_migrate(path)?;
        Ok(Self { conn })
    }

    pub fn create_features_bulk(&mut self, entries: &[NewFeature]) -> EngineResult<BulkCreateOutcome> {
        feature::create_features_bulk(&mut self.conn, entries)
    }

    pub fn get_by_id(&self, id: i64) -> EngineResult<Feature> {
        feature::get_by_id(&self.conn, id)
    }

    pub fn list_all(&self) -> EngineResult<Vec<Feature>> {
        feature::list_all(&self.conn)
    }

    pub fn list_pending_review(&self, limit: usize) -> EngineResult<Vec<Feature>> {
        feature::list_pending_review(&self.conn, limit)
    }

    pub fn list_passing(&self, limit: usize) -> EngineResult<Vec<Feature>> {
        feature::list_passing(&self.conn, limit)
    }

    pub fn get_stats(&self) -> EngineResult<Stats> {
        feature::get_stats(&self.conn)
    }

    pub fn claim_and_get(&mut self, id: i64) -> EngineResult<ClaimOutcome> {
        feature::claim_and_get(&mut self.conn, id)
    }

    pub fn mark_in_progress(&mut self, id: i64) -> EngineResult<()> {
        let snapshot = self.snapshot()?;
        let f = feature::get_by_id(&self.conn, id)?;
        let blocked = scheduler::blocked(&snapshot, &f);
        feature::mark_in_progress(&mut self.conn, id, blocked)
    }

    pub fn mark_passing(&mut self, id: i64) -> EngineResult<()> {
        feature::mark_passing(&mut self.conn, id)
    }

    pub fn mark_failing(&mut self, id: i64) -> EngineResult<()> {
        feature::mark_failing(&mut self.conn, id)
    }

    pub fn clear_in_progress(&mut self, id: i64) -> EngineResult<()> {
        feature::clear_in_progress(&mut self.conn, id)
    }

    pub fn skip(&mut self, id: i64) -> EngineResult<()> {
        feature::skip(&mut self.conn, id)
    }

    pub fn mark_for_review(&mut self, id: i64) -> EngineResult<()> {
        feature::mark_for_review(&mut self.conn, id)
    }

    pub fn approve(&mut self, id: i64) -> EngineResult<()> {
        feature::approve(&mut self.conn, id)
    }

    pub fn reject(&mut self, id: i64, notes: &str) -> EngineResult<()> {
        feature::reject(&mut self.conn, id, notes)
    }

    pub fn add_dependency(&mut self, feature_id: i64, dep_id: i64) -> EngineResult<()> {
        dependency::add_dependency(&mut self.conn, feature_id, dep_id)
    }

    pub fn remove_dependency(&mut self, feature_id: i64, dep_id: i64) -> EngineResult<()> {
        dependency::remove_dependency(&mut self.conn, feature_id, dep_id)
    }

    pub fn set_dependencies(&mut self, feature_id: i64, dep_ids: &[i64]) -> EngineResult<()> {
        dependency::set_dependencies(&mut self.conn, feature_id, dep_ids)
    }

    pub fn append_test_run(&self, run: &NewTestRun) -> EngineResult<i64> {
        test_run::append_test_run(&self.conn, run)
    }

    pub fn store_memory(
        &mut self,
        category: MemoryCategory,
        key: &str,
        value: &str,
        feature_id: Option<i64>,
    ) -> EngineResult<i64> {
        memory::store_memory(&mut self.conn, category, key, value, feature_id)
    }

    pub fn recall_memory(&self, category: MemoryCategory) -> EngineResult<Vec<MemoryEntry>> {
        memory::recall_memory(&self.conn, category)
    }

    pub fn recall_memory_for_feature(&self, feature_id: i64) -> EngineResult<Vec<MemoryEntry>> {
        memory::recall_memory_for_feature(&self.conn, feature_id)
    }

    /// An in-memory `{id -> feature}` view, the only input the resolver
    /// (`store::scheduler`) ever takes. Callers that need several
    /// resolver queries in a row should take one snapshot and reuse it
    /// rather than re-querying between each call.
    pub fn snapshot(&self) -> EngineResult<HashMap<i64, Feature>> {
        Ok(feature::list_all(&self.conn)?.into_iter().map(|f| (f.id, f)).collect())
    }

    pub fn ready_features(&self, limit: usize) -> EngineResult<Vec<Feature>> {
        let snapshot = self.snapshot()?;
        Ok(scheduler::ready_features(&snapshot, limit))
    }

    pub fn blocked_features(&self, limit: usize) -> EngineResult<Vec<BlockedFeature>> {
        let snapshot = self.snapshot()?;
        Ok(scheduler::blocked_features(&snapshot, limit))
    }

    pub fn graph(&self) -> EngineResult<Graph> {
        let snapshot = self.snapshot()?;
        Ok(scheduler::graph(&snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn end_to_end_unblock_scenario() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("features.db")).unwrap();

        let outcome = store
            .create_features_bulk(&[
                NewFeature { category: "a".into(), name: "A".into(), description: "d".into(), steps: vec![], depends_on_indices: vec![] },
                NewFeature { category: "a".into(), name: "B".into(), description: "d".into(), steps: vec![0], depends_on_indices: vec![0] },
            ])
            .unwrap();
        let (a, b) = (outcome.created[0], outcome.created[1]);

        let ready = store.ready_features(10).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, a);

        store.mark_passing(a).unwrap();
        let ready = store.ready_features(10).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, b);
    }
}

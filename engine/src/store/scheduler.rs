//! Dependency resolver (§4.B) — ready/blocked partition and scheduling
//! score, as pure functions over an in-memory snapshot of the backlog.
//! Nothing in this module mutates the store.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::store::feature::Feature;

pub fn blocked(features: &HashMap<i64, Feature>, f: &Feature) -> bool {
    f.dependencies
        .iter()
        .any(|d| !features.get(d).map(|dep| dep.passes).unwrap_or(false))
}

pub fn is_ready(features: &HashMap<i64, Feature>, f: &Feature) -> bool {
    !f.passes && !f.in_progress && !blocked(features, f)
}

/// Count of features that would newly become ready if `f` passed (i.e.
/// features whose only unsatisfied dependency is `f`).
fn unblock_count(features: &HashMap<i64, Feature>, f: &Feature) -> usize {
    features
        .values()
        .filter(|other| {
            !other.passes
                && other.dependencies.contains(&f.id)
                && other
                    .dependencies
                    .iter()
                    .filter(|&&d| d != f.id)
                    .all(|d| features.get(&d).map(|x| x.passes).unwrap_or(false))
        })
        .count()
}

/// Number of distinct features reachable by following dependency edges
/// transitively from `f` (depth of the dependency subtree below it).
fn transitive_depth(features: &HashMap<i64, Feature>, f: &Feature) -> usize {
    let mut visited = HashSet::new();
    let mut stack = f.dependencies.clone();
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        if let Some(dep) = features.get(&id) {
            stack.extend(dep.dependencies.iter().copied());
        }
    }
    visited.len()
}

/// The total order used to select among ready features: higher
/// unblock-count first, then fewer transitive dependencies, then lower
/// priority, then lower id. Implemented once here; every caller in the
/// orchestrator and CLI goes through this function so ordering can never
/// diverge across code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchedulingKey {
    neg_unblock_count: i64,
    transitive_depth: i64,
    priority: i64,
    id: i64,
}

pub fn scheduling_key(features: &HashMap<i64, Feature>, f: &Feature) -> SchedulingKey {
    SchedulingKey {
        neg_unblock_count: -(unblock_count(features, f) as i64),
        transitive_depth: transitive_depth(features, f) as i64,
        priority: f.priority,
        id: f.id,
    }
}

pub fn ready_features(features: &HashMap<i64, Feature>, limit: usize) -> Vec<Feature> {
    let mut ready: Vec<&Feature> = features.values().filter(|f| is_ready(features, f)).collect();
    ready.sort_by_key(|f| scheduling_key(features, f));
    ready.into_iter().take(limit).cloned().collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedFeature {
    pub feature: Feature,
    pub blocking: Vec<i64>,
}

pub fn blocked_features(features: &HashMap<i64, Feature>, limit: usize) -> Vec<BlockedFeature> {
    features
        .values()
        .filter(|f| !f.passes && blocked(features, f))
        .take(limit)
        .map(|f| BlockedFeature {
            feature: f.clone(),
            blocking: f
                .dependencies
                .iter()
                .filter(|d| !features.get(d).map(|x| x.passes).unwrap_or(false))
                .copied()
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Done,
    Blocked,
    InProgress,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: i64,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: i64,
    pub target: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

pub fn graph(features: &HashMap<i64, Feature>) -> Graph {
    let mut nodes = Vec::with_capacity(features.len());
    let mut edges = Vec::new();
    for f in features.values() {
        let status = if f.passes {
            NodeStatus::Done
        } else if f.in_progress {
            NodeStatus::InProgress
        } else if blocked(features, f) {
            NodeStatus::Blocked
        } else {
            NodeStatus::Pending
        };
        nodes.push(GraphNode { id: f.id, status });
        for &dep in &f.dependencies {
            edges.push(GraphEdge { source: dep, target: f.id });
        }
    }
    nodes.sort_by_key(|n| n.id);
    Graph { nodes, edges }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(id: i64, priority: i64, passes: bool, deps: Vec<i64>) -> Feature {
        Feature {
            id,
            priority,
            category: "c".into(),
            name: "n".into(),
            description: "d".into(),
            steps: vec![],
            dependencies: deps,
            passes,
            in_progress: false,
            review_status: crate::store::feature::ReviewStatus::None,
            review_notes: None,
            planning_work_item_id: None,
            synced_at: None,
            updated_at: None,
            last_status_hash: None,
        }
    }

    #[test]
    fn unblocks_exactly_the_dependent_feature() {
        let a = feature(1, 1, false, vec![]);
        let b = feature(2, 2, false, vec![1]);
        let map: HashMap<i64, Feature> = [(1, a), (2, b)].into_iter().collect();
        assert!(!is_ready(&map, map.get(&2).unwrap()));
        assert!(is_ready(&map, map.get(&1).unwrap()));

        let ready = ready_features(&map, 10);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, 1);
    }

    #[test]
    fn dependency_unblock_scenario() {
        let a = feature(1, 1, true, vec![]);
        let b = feature(2, 2, false, vec![1]);
        let map: HashMap<i64, Feature> = [(1, a), (2, b)].into_iter().collect();
        let ready = ready_features(&map, 10);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, 2);
    }

    #[test]
    fn scheduling_order_is_deterministic() {
        let a = feature(1, 5, false, vec![]);
        let b = feature(2, 1, false, vec![]);
        let c = feature(3, 1, false, vec![]);
        let map: HashMap<i64, Feature> = [(1, a), (2, b), (3, c)].into_iter().collect();
        let ready1 = ready_features(&map, 10);
        let ready2 = ready_features(&map, 10);
        let ids1: Vec<i64> = ready1.iter().map(|f| f.id).collect();
        let ids2: Vec<i64> = ready2.iter().map(|f| f.id).collect();
        assert_eq!(ids1, ids2);
        // priority 1 features (ids 2, 3) come before priority 5 (id 1); ties by id
        assert_eq!(ids1, vec![2, 3, 1]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::store::dependency::would_create_cycle;
    use proptest::collection::vec as pvec;
    use proptest::prelude::*;

    fn feature(id: i64, priority: i64, passes: bool, deps: Vec<i64>) -> Feature {
        Feature {
            id,
            priority,
            category: "c".into(),
            name: "n".into(),
            description: "d".into(),
            steps: vec![],
            dependencies: deps,
            passes,
            in_progress: false,
            review_status: crate::store::feature::ReviewStatus::None,
            review_notes: None,
            planning_work_item_id: None,
            synced_at: None,
            updated_at: None,
            last_status_hash: None,
        }
    }

    /// One row's raw generated data before it is pinned to an index: up to
    /// three candidate dependency ids (drawn from the whole `0..n` range,
    /// narrowed per-row below), a pass/fail flag, and a priority.
    fn row_strategy(n: usize) -> impl Strategy<Value = (Vec<usize>, bool, i64)> {
        (pvec(0..n.max(1), 0..3), any::<bool>(), 0i64..10)
    }

    /// Builds a DAG over ids `0..n`: feature `i` may depend only on ids
    /// strictly less than `i`, so the construction itself can never
    /// produce a cycle — the strategy generates the edge set, not an
    /// arbitrary graph that might need rejecting. Every row is drawn from
    /// the same strategy (required for `proptest::collection::vec`); the
    /// per-index truncation to "ids below i" happens afterward in
    /// `prop_map`.
    fn dag_strategy(n: usize) -> impl Strategy<Value = HashMap<i64, Feature>> {
        pvec(row_strategy(n), n).prop_map(move |rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (raw_deps, passes, priority))| {
                    let deps: Vec<i64> = raw_deps
                        .into_iter()
                        .filter(|&d| d < i)
                        .map(|d| d as i64)
                        .collect();
                    (i as i64, feature(i as i64, priority, passes, deps))
                })
                .collect()
        })
    }

    proptest! {
        /// Every edge in a graph built by `dag_strategy` only ever points
        /// from a higher id to a lower one, so no edge can ever close a
        /// cycle back to its own source.
        #[test]
        fn dag_strategy_never_produces_a_cycle(features in dag_strategy(12)) {
            for f in features.values() {
                for &dep in &f.dependencies {
                    prop_assert!(!would_create_cycle(&features, dep, f.id));
                }
            }
        }

        /// `ready_features` never returns a feature that is already
        /// passing, in progress, or has an unsatisfied dependency —
        /// regardless of the graph shape or the requested limit.
        #[test]
        fn ready_features_only_returns_eligible_nodes(features in dag_strategy(12), limit in 0usize..20) {
            let ready = ready_features(&features, limit);
            prop_assert!(ready.len() <= limit);
            for f in &ready {
                prop_assert!(!f.passes);
                prop_assert!(!f.in_progress);
                for &dep in &f.dependencies {
                    prop_assert!(features.get(&dep).map(|d| d.passes).unwrap_or(false));
                }
            }
        }

        /// Sorting the same ready set by `scheduling_key` twice always
        /// produces the same order: the key is a pure function of the
        /// snapshot, so there is no hidden nondeterminism (hash-map
        /// iteration order, unstable sort ties) leaking into it.
        #[test]
        fn scheduling_order_is_stable_across_repeated_calls(features in dag_strategy(12)) {
            let first: Vec<i64> = ready_features(&features, usize::MAX).iter().map(|f| f.id).collect();
            let second: Vec<i64> = ready_features(&features, usize::MAX).iter().map(|f| f.id).collect();
            prop_assert_eq!(first, second);
        }

        /// `would_create_cycle` is symmetric with the definition of a
        /// cycle: adding `from -> to` and then checking reachability of
        /// `from` from `to` must agree with asking the question the
        /// other way only when a path actually exists both ways (which,
        /// for a DAG plus one new edge, only happens at `from == to`).
        #[test]
        fn self_dependency_is_always_a_cycle(features in dag_strategy(12), id in 0i64..12) {
            prop_assert!(would_create_cycle(&features, id, id));
        }
    }
}

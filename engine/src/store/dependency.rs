//! Dependency edge mutation with cycle rejection (§4.A, §4.B).
//!
//! The graph lives in rows (each feature's `dependencies` column), never
//! as in-memory pointers, so "detecting a cycle" is a reachability test
//! performed fresh against the current snapshot at mutation time, not a
//! structure maintained incrementally.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, TransactionBehavior};

use crate::error::{EngineError, EngineResult};
use crate::store::feature::{get_by_id, list_all, Feature, MAX_DEPENDENCIES};

/// True iff adding the edge `from -> to` would create a cycle, i.e. `from`
/// is reachable from `to` by following existing `dependencies` edges
/// (including the degenerate case `from == to`).
pub fn would_create_cycle(features: &HashMap<i64, Feature>, from: i64, to: i64) -> bool {
    if from == to {
        return true;
    }
    let mut stack = vec![to];
    let mut visited = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == from {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(f) = features.get(&node) {
            for &dep in &f.dependencies {
                stack.push(dep);
            }
        }
    }
    false
}

fn snapshot(conn: &Connection) -> EngineResult<HashMap<i64, Feature>> {
    Ok(list_all(conn)?.into_iter().map(|f| (f.id, f)).collect())
}

fn write_dependencies(conn: &Connection, id: i64, deps: &[i64]) -> EngineResult<()> {
    let mut sorted = deps.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let json = serde_json::to_string(&sorted).unwrap_or_else(|_| "[]".into());
    conn.execute("UPDATE features SET dependencies = ?2 WHERE id = ?1", params![id, json])?;
    Ok(())
}

pub fn add_dependency(conn: &mut Connection, feature_id: i64, dep_id: i64) -> EngineResult<()> {
    if feature_id == dep_id {
        return Err(EngineError::programmer(format!(
            "feature {feature_id} cannot depend on itself"
        )));
    }
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let feature = get_by_id(&tx, feature_id)?;
    let _ = get_by_id(&tx, dep_id)?;

    if feature.dependencies.contains(&dep_id) {
        return Err(EngineError::constraint(format!(
            "feature {feature_id} already depends on {dep_id}"
        )));
    }
    if feature.dependencies.len() >= MAX_DEPENDENCIES {
        return Err(EngineError::constraint(format!(
            "feature {feature_id} already has the maximum of {MAX_DEPENDENCIES} dependencies"
        )));
    }

    let features = snapshot(&tx)?;
    if would_create_cycle(&features, feature_id, dep_id) {
        return Err(EngineError::constraint(format!(
            "adding {feature_id} -> {dep_id} would create a dependency cycle"
        )));
    }

    let mut new_deps = feature.dependencies.clone();
    new_deps.push(dep_id);
    write_dependencies(&tx, feature_id, &new_deps)?;
    tx.commit()?;
    Ok(())
}

pub fn remove_dependency(conn: &mut Connection, feature_id: i64, dep_id: i64) -> EngineResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let feature = get_by_id(&tx, feature_id)?;
    let new_deps: Vec<i64> = feature.dependencies.into_iter().filter(|&d| d != dep_id).collect();
    write_dependencies(&tx, feature_id, &new_deps)?;
    tx.commit()?;
    Ok(())
}

pub fn set_dependencies(conn: &mut Connection, feature_id: i64, dep_ids: &[i64]) -> EngineResult<()> {
    if dep_ids.contains(&feature_id) {
        return Err(EngineError::programmer(format!(
            "feature {feature_id} cannot depend on itself"
        )));
    }
    // Dedup before the limit check: a caller passing the same id twice
    // shouldn't be rejected for a count the write path collapses anyway.
    let mut dep_ids: Vec<i64> = dep_ids.to_vec();
    dep_ids.sort_unstable();
    dep_ids.dedup();
    let dep_ids = dep_ids.as_slice();

    if dep_ids.len() > MAX_DEPENDENCIES {
        return Err(EngineError::constraint(format!(
            "feature {feature_id} would have {} dependencies, exceeding the limit of {MAX_DEPENDENCIES}",
            dep_ids.len()
        )));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let _ = get_by_id(&tx, feature_id)?;
    for &dep_id in dep_ids {
        let _ = get_by_id(&tx, dep_id)?;
    }

    let mut features = snapshot(&tx)?;
    // Validate against a snapshot with this feature's edges cleared, so a
    // previously-accepted edge doesn't spuriously self-block the check.
    if let Some(f) = features.get_mut(&feature_id) {
        f.dependencies.clear();
    }
    for &dep_id in dep_ids {
        if would_create_cycle(&features, feature_id, dep_id) {
            return Err(EngineError::constraint(format!(
                "setting dependency {feature_id} -> {dep_id} would create a cycle"
            )));
        }
        if let Some(f) = features.get_mut(&feature_id) {
            f.dependencies.push(dep_id);
        }
    }

    write_dependencies(&tx, feature_id, dep_ids)?;
    tx.commit()?;
    Ok(())
}

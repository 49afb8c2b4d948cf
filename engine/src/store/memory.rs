//! AgentMemory: append-only memory slots with supersession (§3).
//!
//! A `(category, memory_key)` pair names a logical slot. Storing a new
//! value never overwrites the previous row; instead the previous row's
//! `superseded_by` is set to the new row's id, so the full history of a
//! slot is always recoverable.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Decision,
    Pattern,
    Learning,
    Architecture,
    SpecConstraint,
}

impl MemoryCategory {
    fn as_str(self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Pattern => "pattern",
            Self::Learning => "learning",
            Self::Architecture => "architecture",
            Self::SpecConstraint => "spec_constraint",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: i64,
    pub category: String,
    pub memory_key: String,
    pub value: String,
    pub feature_id: Option<i64>,
    pub relevance_count: i64,
    pub superseded_by: Option<i64>,
    pub created_at: String,
}

pub fn store_memory(
    conn: &mut Connection,
    category: MemoryCategory,
    memory_key: &str,
    value: &str,
    feature_id: Option<i64>,
) -> EngineResult<i64> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let prior: Option<i64> = tx
        .query_row(
            "SELECT id FROM agent_memory WHERE category = ?1 AND memory_key = ?2 AND superseded_by IS NULL
             ORDER BY id DESC LIMIT 1",
            params![category.as_str(), memory_key],
            |r| r.get(0),
        )
        .optional()?;

    tx.execute(
        "INSERT INTO agent_memory (category, memory_key, value, feature_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![category.as_str(), memory_key, value, feature_id, Utc::now().to_rfc3339()],
    )?;
    let new_id = tx.last_insert_rowid();

    if let Some(prior_id) = prior {
        tx.execute(
            "UPDATE agent_memory SET superseded_by = ?2 WHERE id = ?1",
            params![prior_id, new_id],
        )?;
    }
    tx.commit()?;
    Ok(new_id)
}

/// Recall the current (non-superseded) value for every slot in a category.
pub fn recall_memory(conn: &Connection, category: MemoryCategory) -> EngineResult<Vec<MemoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, category, memory_key, value, feature_id, relevance_count, superseded_by, created_at
         FROM agent_memory WHERE category = ?1 AND superseded_by IS NULL ORDER BY id DESC",
    )?;
    let rows = stmt
        .query_map(params![category.as_str()], |row| {
            Ok(MemoryEntry {
                id: row.get(0)?,
                category: row.get(1)?,
                memory_key: row.get(2)?,
                value: row.get(3)?,
                feature_id: row.get(4)?,
                relevance_count: row.get(5)?,
                superseded_by: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for entry in &rows {
        conn.execute(
            "UPDATE agent_memory SET relevance_count = relevance_count + 1 WHERE id = ?1",
            params![entry.id],
        )?;
    }
    Ok(rows)
}

pub fn recall_memory_for_feature(conn: &Connection, feature_id: i64) -> EngineResult<Vec<MemoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, category, memory_key, value, feature_id, relevance_count, superseded_by, created_at
         FROM agent_memory WHERE feature_id = ?1 AND superseded_by IS NULL ORDER BY id DESC",
    )?;
    let rows = stmt
        .query_map(params![feature_id], |row| {
            Ok(MemoryEntry {
                id: row.get(0)?,
                category: row.get(1)?,
                memory_key: row.get(2)?,
                value: row.get(3)?,
                feature_id: row.get(4)?,
                relevance_count: row.get(5)?,
                superseded_by: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

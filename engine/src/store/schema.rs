//! Schema creation, additive migrations, and journal-mode selection.
//!
//! Grounded on the original project's SQLAlchemy engine setup: network
//! filesystems are detected and downgraded to a rollback journal because
//! WAL semantics do not hold over NFS/CIFS/SMB; local filesystems get a
//! write-ahead log. `busy_timeout` bounds how long a writer waits for the
//! immediate-mode lock before the store surfaces a transient error.

use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::error::EngineResult;

const BUSY_TIMEOUT_MS: u32 = 30_000;

/// Returns true if `path` resides on a filesystem known to corrupt WAL
/// semantics (NFS, CIFS/SMB, sshfs via FUSE). Consults `/proc/mounts` on
/// platforms that have it; defaults to `false` (local) everywhere else,
/// matching the original's conservative fallback.
pub fn is_network_path(path: &Path) -> bool {
    #[cfg(target_os = "linux")]
    {
        if let Ok(mounts) = std::fs::read_to_string("/proc/mounts") {
            let canonical = path
                .canonicalize()
                .unwrap_or_else(|_| path.to_path_buf());
            let mut best_match: Option<(&str, &str)> = None;
            for line in mounts.lines() {
                let mut fields = line.split_whitespace();
                let (Some(_device), Some(mount_point), Some(fstype)) =
                    (fields.next(), fields.next(), fields.next())
                else {
                    continue;
                };
                if canonical.starts_with(mount_point) {
                    let better = match best_match {
                        Some((prev, _)) => mount_point.len() > prev.len(),
                        None => true,
                    };
                    if better {
                        best_match = Some((mount_point, fstype));
                    }
                }
            }
            if let Some((_, fstype)) = best_match {
                return matches!(
                    fstype,
                    "nfs" | "nfs4" | "cifs" | "smbfs" | "smb3" | "fuse.sshfs"
                );
            }
        }
        false
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = path;
        false
    }
}

/// Opens (creating if needed) the sqlite database at `path`, selects the
/// journal mode appropriate to the underlying filesystem, sets the busy
/// timeout, and applies all additive migrations. Idempotent across calls.
pub fn open_and_migrate(path: &Path) -> EngineResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_handler(None)?;
    conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)?;
    // sqlite ignores `ON DELETE CASCADE` unless this is set per-connection.
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let journal_mode = if is_network_path(path) {
        "DELETE"
    } else {
        "WAL"
    };
    let actual: String =
        conn.pragma_update_and_check(None, "journal_mode", journal_mode, |row| row.get(0))?;
    info!(journal_mode = %actual, path = %path.display(), "backlog store opened");

    create_schema(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS features (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            priority                INTEGER NOT NULL DEFAULT 999,
            category                TEXT NOT NULL,
            name                    TEXT NOT NULL,
            description             TEXT NOT NULL,
            steps                   TEXT NOT NULL DEFAULT '[]',
            dependencies            TEXT NOT NULL DEFAULT '[]',
            passes                  INTEGER NOT NULL DEFAULT 0,
            in_progress             INTEGER NOT NULL DEFAULT 0,
            review_status           TEXT NOT NULL DEFAULT 'none',
            review_notes            TEXT,
            planning_work_item_id   TEXT,
            synced_at               TEXT,
            updated_at              TEXT,
            last_status_hash        TEXT
        );
        CREATE INDEX IF NOT EXISTS ix_feature_status ON features(passes, in_progress);
        CREATE INDEX IF NOT EXISTS ix_feature_priority ON features(priority);

        CREATE TABLE IF NOT EXISTS test_runs (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            feature_id              INTEGER NOT NULL REFERENCES features(id) ON DELETE CASCADE,
            passed                  INTEGER NOT NULL,
            agent_type              TEXT NOT NULL,
            agent_pid               INTEGER,
            feature_ids_in_batch    TEXT,
            started_at              TEXT NOT NULL,
            completed_at            TEXT,
            return_code             INTEGER
        );
        CREATE INDEX IF NOT EXISTS ix_test_run_feature ON test_runs(feature_id);

        CREATE TABLE IF NOT EXISTS agent_memory (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            category                TEXT NOT NULL,
            memory_key              TEXT NOT NULL,
            value                   TEXT NOT NULL,
            feature_id              INTEGER,
            relevance_count         INTEGER NOT NULL DEFAULT 0,
            superseded_by           INTEGER,
            created_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS ix_memory_slot ON agent_memory(category, memory_key);

        CREATE TABLE IF NOT EXISTS schedules (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            project_dir             TEXT NOT NULL,
            window_spec             TEXT NOT NULL,
            enabled                 INTEGER NOT NULL DEFAULT 1,
            created_at              TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS schedule_overrides (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            schedule_id             INTEGER NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
            override_date           TEXT NOT NULL,
            active                  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS schema_meta (
            key                     TEXT PRIMARY KEY,
            value                   TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Additive-only migrations, applied in order, each guarded so re-running
/// against an already-migrated database is a no-op. New migrations are
/// appended; existing ones are never edited.
fn run_migrations(conn: &Connection) -> EngineResult<()> {
    normalize_null_booleans(conn)?;
    Ok(())
}

fn normalize_null_booleans(conn: &Connection) -> EngineResult<()> {
    conn.execute(
        "UPDATE features SET passes = 0 WHERE passes IS NULL",
        [],
    )?;
    conn.execute(
        "UPDATE features SET in_progress = 0 WHERE in_progress IS NULL",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_creates_schema() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='features'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn local_path_is_not_network() {
        assert!(!is_network_path(Path::new("/tmp")));
    }
}

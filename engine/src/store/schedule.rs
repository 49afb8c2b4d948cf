//! Schedule / ScheduleOverride — optional timed-window activation
//! records (§3). Not wired into the orchestrator loop; the core loop is
//! the only scheduling authority. This table exists so a CLI or external
//! tool can record and query timed-activation windows without the core
//! needing to understand cron syntax or timezones.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub project_dir: String,
    pub window_spec: String,
    pub enabled: bool,
}

pub fn create_schedule(conn: &Connection, project_dir: &str, window_spec: &str) -> EngineResult<i64> {
    conn.execute(
        "INSERT INTO schedules (project_dir, window_spec, enabled, created_at) VALUES (?1, ?2, 1, ?3)",
        params![project_dir, window_spec, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_override(conn: &Connection, schedule_id: i64, date: NaiveDate, active: bool) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO schedule_overrides (schedule_id, override_date, active) VALUES (?1, ?2, ?3)",
        params![schedule_id, date.to_string(), active as i64],
    )?;
    Ok(())
}

/// True if `schedule` is enabled and has no override for `date` disabling
/// it. This does not parse `window_spec` at all — cron-like evaluation is
/// left to whatever external tool authored the spec; overrides are the
/// only thing the core evaluates.
pub fn is_active_on(conn: &Connection, schedule_id: i64, date: NaiveDate) -> EngineResult<bool> {
    let enabled: bool = conn.query_row(
        "SELECT enabled FROM schedules WHERE id = ?1",
        params![schedule_id],
        |r| r.get::<_, i64>(0).map(|v| v != 0),
    )?;
    if !enabled {
        return Ok(false);
    }
    let override_active: Option<i64> = conn
        .query_row(
            "SELECT active FROM schedule_overrides WHERE schedule_id = ?1 AND override_date = ?2",
            params![schedule_id, date.to_string()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(override_active.map(|v| v != 0).unwrap_or(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::open_and_migrate;
    use tempfile::tempdir;

    fn open_test_conn() -> Connection {
        let dir = tempdir().unwrap();
        let path = dir.path().join("schedule.db");
        std::mem::forget(dir);
        open_and_migrate(&path).unwrap()
    }

    #[test]
    fn disabled_schedule_is_never_active() {
        let conn = open_test_conn();
        let id = create_schedule(&conn, "/proj", "0 9 * * mon-fri").unwrap();
        conn.execute("UPDATE schedules SET enabled = 0 WHERE id = ?1", params![id]).unwrap();
        assert!(!is_active_on(&conn, id, NaiveDate::from_ymd_opt(2026, 7, 28).unwrap()).unwrap());
    }

    #[test]
    fn override_can_disable_a_single_date_without_touching_the_schedule() {
        let conn = open_test_conn();
        let id = create_schedule(&conn, "/proj", "0 9 * * mon-fri").unwrap();
        let holiday = NaiveDate::from_ymd_opt(2026, 12, 25).unwrap();
        set_override(&conn, id, holiday, false).unwrap();

        assert!(!is_active_on(&conn, id, holiday).unwrap());
        assert!(is_active_on(&conn, id, NaiveDate::from_ymd_opt(2026, 12, 24).unwrap()).unwrap());
    }
}

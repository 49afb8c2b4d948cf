//! Cross-process lock contention, simulated within a single test process
//! by hand-writing lock files with PIDs that are live, dead, or foreign.

use std::fs;

use engine::{EngineError, ProjectLock};

#[test]
fn second_orchestrator_fails_while_first_is_alive() {
    let dir = tempfile::tempdir().unwrap();
    let _first = ProjectLock::acquire(dir.path()).unwrap();

    let err = ProjectLock::acquire(dir.path()).unwrap_err();
    match err {
        EngineError::AlreadyRunning { pid } => assert_eq!(pid, std::process::id()),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
}

#[test]
fn stale_lock_from_a_simulated_crash_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    // PID 1 (init) never resolves to this tempdir's cwd, so the lock
    // looks stale regardless of whether PID 1 itself is alive.
    fs::write(dir.path().join(".agent.lock"), "1").unwrap();

    let _lock = ProjectLock::acquire(dir.path()).unwrap();
    let contents = fs::read_to_string(dir.path().join(".agent.lock")).unwrap();
    assert_eq!(contents.trim(), std::process::id().to_string());
}

#[test]
fn lock_is_released_on_drop_so_a_later_orchestrator_can_acquire_it() {
    let dir = tempfile::tempdir().unwrap();
    {
        let _lock = ProjectLock::acquire(dir.path()).unwrap();
    }
    let _second = ProjectLock::acquire(dir.path()).unwrap();
}

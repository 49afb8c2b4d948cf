//! Cross-process single-writer lock (§4.G).
//!
//! Grounded on the original `_check_lock`/`_create_lock`/`_remove_lock`
//! trio, generalized from "is some agent process running" to "is the
//! orchestrator that owns this exact project directory still alive":
//! staleness is decided by resolving the locking PID's `/proc` entry
//! and comparing its working directory, not by matching an argv
//! substring against a hardcoded script name.

use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::signal::{kill as send_signal, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};

const LOCK_FILE_NAME: &str = ".agent.lock";

pub struct ProjectLock {
    path: PathBuf,
    held: bool,
}

fn lock_path(project_dir: &Path) -> PathBuf {
    project_dir.join(LOCK_FILE_NAME)
}

fn pid_is_alive(pid: i32) -> bool {
    // Signal 0 performs no-op permission/existence checking only.
    send_signal(Pid::from_raw(pid), None::<Signal>).is_ok()
}

fn process_cwd(pid: i32) -> Option<PathBuf> {
    fs::read_link(format!("/proc/{pid}/cwd")).ok()
}

/// A lock is stale if its PID is dead, or alive but rooted in some
/// other working directory (a PID got recycled for an unrelated
/// process after the original orchestrator exited).
fn is_stale(pid: i32, project_dir: &Path) -> bool {
    if !pid_is_alive(pid) {
        return true;
    }
    // /proc/{pid}/cwd is always an absolute, symlink-resolved path;
    // project_dir may be relative or carry un-resolved symlinks, so
    // canonicalize before comparing or a live, correctly-rooted lock
    // would be misreported as stale.
    let project_dir = project_dir.canonicalize().unwrap_or_else(|_| project_dir.to_path_buf());
    match process_cwd(pid) {
        Some(cwd) => cwd != project_dir,
        None => true,
    }
}

impl ProjectLock {
    /// Acquire the lock for `project_dir`, reclaiming a stale lock if
    /// found. Fails with `EngineError::AlreadyRunning` when a live
    /// orchestrator already owns this project.
    pub fn acquire(project_dir: &Path) -> EngineResult<Self> {
        let path = lock_path(project_dir);
        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(pid) = contents.trim().parse::<i32>() {
                if !is_stale(pid, project_dir) {
                    return Err(EngineError::AlreadyRunning { pid: pid as u32 });
                }
                warn!(pid, "reclaiming stale agent lock");
                let _ = fs::remove_file(&path);
            } else {
                let _ = fs::remove_file(&path);
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, std::process::id().to_string())?;
        info!(path = %path.display(), "acquired project lock");
        Ok(Self { path, held: true })
    }

    pub fn release(&mut self) {
        if self.held {
            let _ = fs::remove_file(&self.path);
            self.held = false;
        }
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquires_and_releases_cleanly() {
        let dir = tempdir().unwrap();
        {
            let _lock = ProjectLock::acquire(dir.path()).unwrap();
            assert!(dir.path().join(LOCK_FILE_NAME).exists());
        }
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn reclaims_a_lock_with_unparsable_contents() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), "not-a-pid").unwrap();
        let _lock = ProjectLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn reclaims_a_lock_pointing_at_a_dead_pid() {
        let dir = tempdir().unwrap();
        // PID 1 belongs to init, cwd resolution for it will not match
        // our tempdir, so it is treated as stale regardless of liveness.
        fs::write(dir.path().join(LOCK_FILE_NAME), "1").unwrap();
        let _lock = ProjectLock::acquire(dir.path()).unwrap();
    }
}

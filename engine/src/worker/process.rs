//! Worker subprocess lifecycle (§4.C).
//!
//! Grounded on the original `AgentProcessManager`: launch, graceful
//! stop with an escalation to kill, a liveness check, and line-by-line
//! output streaming. Reshaped from Python's single mutable-status
//! object plus callback registries into a value returned by `launch`
//! that the orchestrator drives directly — there is no hidden global
//! registry of running workers; that set is owned by `Supervisor`.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::provider::ProviderProfile;
use crate::worker::redact::sanitize_output;
use crate::worker::role::Role;

const GRACEFUL_SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Running,
    FinishedOk,
    FinishedError,
    RateLimited,
    Crashed,
    Killed,
}

/// What to pre-assign a worker when it is launched: nothing (it must
/// discover work itself, as an `initializer` does), a single feature,
/// or a batch processed sequentially within the one subprocess.
#[derive(Debug, Clone)]
pub enum Assignment {
    None,
    Single(i64),
    Batch(Vec<i64>),
}

pub struct LaunchSpec<'a> {
    pub role: Role,
    pub project_dir: &'a Path,
    pub entrypoint: &'a Path,
    pub assignment: Assignment,
    pub yolo: bool,
    pub profile: &'a ProviderProfile,
}

/// Result of `WorkerHandle::await_completion`. A zero exit code with no
/// sentinel "result" record observed in the tail is elevated to
/// `Crashed` — the contract requires an explicit success marker, so a
/// process that merely exits 0 without one is not trusted silently.
pub struct CompletionReport {
    pub status: WorkerStatus,
    pub exit_code: Option<i32>,
    pub ran_for: Duration,
    pub last_lines: Vec<String>,
}

const TAIL_CAPACITY: usize = 20;

pub struct WorkerHandle {
    pub role: Role,
    pub pid: u32,
    started_at: Instant,
    child: Child,
    pub lines: mpsc::Receiver<String>,
    saw_result_sentinel: bool,
    tail: std::collections::VecDeque<String>,
}

/// stdout and stderr are merged into one logical stream (mirroring the
/// original's `stderr=subprocess.STDOUT`) by pumping both pipes into
/// the same channel from independent tasks; interleaving between the
/// two is acceptable since downstream consumers only care about
/// feature-tagged lines, not which fd produced them.
fn spawn_line_pump<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let sanitized = sanitize_output(&line);
                    if tx.send(sanitized).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "worker output stream read error");
                    break;
                }
            }
        }
    });
}

fn build_argv(spec: &LaunchSpec) -> Vec<String> {
    let mut argv = vec![spec.entrypoint.display().to_string()];
    argv.push("--project-dir".into());
    argv.push(spec.project_dir.display().to_string());
    argv.push("--role".into());
    argv.push(spec.role.as_str().into());
    if let Some(model) = spec.profile.model_for(spec.role.model_tier()) {
        argv.push("--model".into());
        argv.push(model.to_string());
    }
    match &spec.assignment {
        Assignment::None => {}
        Assignment::Single(id) => {
            argv.push("--feature-id".into());
            argv.push(id.to_string());
        }
        Assignment::Batch(ids) => {
            argv.push("--feature-ids".into());
            argv.push(ids.iter().map(i64::to_string).collect::<Vec<_>>().join(","));
        }
    }
    if spec.yolo {
        argv.push("--yolo".into());
    }
    argv
}

/// Launch a worker subprocess. stdout+stderr are merged into a single
/// pipe; stdin is closed. The working directory is the project
/// directory so any sandbox scoped to it behaves consistently.
pub fn launch(spec: &LaunchSpec) -> EngineResult<WorkerHandle> {
    let argv = build_argv(spec);
    let (program, args) = argv.split_first().expect("argv always has an entrypoint");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(spec.project_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Own process group so `stop()` can SIGKILL the whole
        // descendant tree instead of leaving orphans behind.
        .process_group(0);

    for (key, value) in spec.profile.env_overrides() {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| EngineError::WorkerCrashed {
        feature_id: spec.assignment.primary_feature_id(),
        message: format!("failed to spawn {}: {e}", program),
    })?;
    let pid = child.id().ok_or_else(|| EngineError::WorkerCrashed {
        feature_id: spec.assignment.primary_feature_id(),
        message: "spawned child has no pid".into(),
    })?;

    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");
    let (tx, rx) = mpsc::channel(256);
    spawn_line_pump(stdout, tx.clone());
    spawn_line_pump(stderr, tx);

    info!(pid, role = spec.role.as_str(), "spawned worker");
    Ok(WorkerHandle {
        role: spec.role,
        pid,
        started_at: Instant::now(),
        child,
        lines: rx,
        saw_result_sentinel: false,
        tail: std::collections::VecDeque::with_capacity(TAIL_CAPACITY),
    })
}

impl WorkerHandle {
    /// Record a line observed from this worker's output for crash
    /// reporting and sentinel detection. The orchestrator calls this as
    /// it drains `self.lines` so the event multiplexer and the tail
    /// buffer see the same stream.
    pub fn observe_line(&mut self, line: &str) {
        if line.contains("\"event\":\"result\"") || line.starts_with("RESULT:") {
            self.saw_result_sentinel = true;
        }
        if self.tail.len() == TAIL_CAPACITY {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());
    }

    pub async fn healthcheck(&mut self) -> EngineResult<bool> {
        match self.child.try_wait() {
            Ok(Some(_)) => Ok(false),
            Ok(None) => Ok(true),
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    /// Graceful-then-kill termination. SIGTERM, wait up to the shutdown
    /// budget, then SIGKILL the whole process group so helper processes
    /// spawned by the worker don't survive as orphans.
    pub async fn stop(mut self) -> EngineResult<CompletionReport> {
        let _ = kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM);

        let waited = timeout(GRACEFUL_SHUTDOWN_BUDGET, self.child.wait()).await;
        let exit_status = match waited {
            Ok(status) => status.ok(),
            Err(_) => {
                debug!(pid = self.pid, "graceful shutdown budget exceeded, escalating to SIGKILL");
                let _ = kill(Pid::from_raw(-(self.pid as i32)), Signal::SIGKILL);
                self.child.wait().await.ok()
            }
        };

        Ok(CompletionReport {
            status: WorkerStatus::Killed,
            exit_code: exit_status.and_then(|s| s.code()),
            ran_for: self.started_at.elapsed(),
            last_lines: self.tail.into_iter().collect(),
        })
    }

    /// Wait for natural exit and classify the terminal status. Does not
    /// itself classify rate-limit vs plain error — that distinction is
    /// made by `crate::backoff` from the tail lines, since it requires
    /// the rate-limit regex grammar, not just the exit code.
    pub async fn await_exit(mut self) -> EngineResult<CompletionReport> {
        let status = self.child.wait().await.map_err(EngineError::Io)?;
        let ran_for = self.started_at.elapsed();
        let code = status.code();
        let status = if code == Some(0) {
            if self.saw_result_sentinel {
                WorkerStatus::FinishedOk
            } else {
                WorkerStatus::Crashed
            }
        } else {
            WorkerStatus::FinishedError
        };
        Ok(CompletionReport {
            status,
            exit_code: code,
            ran_for,
            last_lines: self.tail.into_iter().collect(),
        })
    }
}

impl Assignment {
    fn primary_feature_id(&self) -> Option<i64> {
        match self {
            Assignment::None => None,
            Assignment::Single(id) => Some(*id),
            Assignment::Batch(ids) => ids.first().copied(),
        }
    }
}


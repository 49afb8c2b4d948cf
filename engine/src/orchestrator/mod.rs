//! The orchestrator loop (§4.E): a single-threaded cooperative
//! supervisor that holds the project lock for its entire lifetime,
//! dispatches workers against ready features, and reacts to their
//! terminal signals with backoff.
//!
//! All mutable runtime state — live worker slots, the lock guard, the
//! event bus, the store handle, backoff counters — lives on one
//! `Supervisor` value, per the redesign note replacing the original's
//! module-level globals (engine cache, session registry, managers map).

pub mod executor;

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::backoff::{self, BackoffState};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{orchestrator_state, parse_line, EngineEvent, EventBus, RawLine, SharedEventBus};
use crate::lock::ProjectLock;
use crate::provider::ProviderCatalog;
use crate::store::{Feature, Store};
use crate::worker::{self, Assignment, LaunchSpec, Role, WorkerHandle, WorkerStatus};

/// Outcome of one full run of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Complete,
    ShutdownRequested,
}

struct LiveSlot {
    role: Role,
    feature_id: Option<i64>,
    handle: WorkerHandle,
}

/// A role is withheld from the next dispatch round until this instant,
/// set whenever its backoff classifies a delay.
#[derive(Default)]
struct RoleGate {
    backoff: BackoffState,
    not_before: Option<Instant>,
}

impl RoleGate {
    fn is_open(&self) -> bool {
        self.not_before.map(|t| Instant::now() >= t).unwrap_or(true)
    }
}

pub struct Supervisor {
    config: EngineConfig,
    store: Arc<Mutex<Store>>,
    executor: executor::BlockingExecutor,
    events: SharedEventBus,
    providers: ProviderCatalog,
    entrypoint: PathBuf,
    project_dir: PathBuf,
    gates: HashMap<Role, RoleGate>,
    slots: Vec<LiveSlot>,
    shutdown_requested: bool,
    debug_log: Option<File>,
    _lock: ProjectLock,
}

impl Supervisor {
    pub fn new(project_dir: PathBuf, entrypoint: PathBuf) -> EngineResult<Self> {
        let lock = ProjectLock::acquire(&project_dir)?;
        let config = EngineConfig::load(&project_dir)?.apply_env();
        let db_path = project_dir.join(".engine/features.db");
        let store = Store::open(&db_path)?;
        let providers_path = project_dir.join(&config.providers_file);
        let providers = ProviderCatalog::load(&providers_path)?;

        let mut gates = HashMap::new();
        for role in [Role::Initializer, Role::Coding, Role::Testing, Role::Reviewer, Role::Architect] {
            gates.insert(role, RoleGate::default());
        }

        Ok(Self {
            executor: executor::BlockingExecutor::new(config.max_concurrency.max(1)),
            config,
            store: Arc::new(Mutex::new(store)),
            events: EventBus::new().shared(),
            providers,
            entrypoint,
            project_dir,
            gates,
            slots: Vec::new(),
            shutdown_requested: false,
            debug_log: None,
            _lock: lock,
        })
    }

    pub fn events(&self) -> SharedEventBus {
        self.events.clone()
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Writes one line to `.engine/orchestrator-debug.log`, best-effort.
    /// The file is truncated exactly once, at the start of `run()` below
    /// — never on construction, so multiple `Supervisor`s built against
    /// the same project directory without ever calling `run()` (e.g. a
    /// CLI command that only inspects state) don't clobber a log a
    /// concurrent supervisor is actively appending to.
    fn debug_log(&mut self, line: impl AsRef<str>) {
        if let Some(f) = self.debug_log.as_mut() {
            let _ = writeln!(f, "{} {}", chrono::Utc::now().to_rfc3339(), line.as_ref());
        }
    }

    /// Drive the loop until the backlog is 100% passing or shutdown is
    /// requested (cooperative: stops spawning, signals live workers,
    /// waits up to the shutdown budget, then force-kills stragglers).
    pub async fn run(&mut self) -> EngineResult<RunOutcome> {
        let debug_log_path = self.project_dir.join(".engine/orchestrator-debug.log");
        self.debug_log = File::create(&debug_log_path).ok();
        self.debug_log("orchestrator loop starting");

        loop {
            if self.shutdown_requested {
                self.debug_log("shutdown requested, draining live slots");
                self.drain_for_shutdown().await;
                return Ok(RunOutcome::ShutdownRequested);
            }

            let stats = self.with_store(|store| store.get_stats()).await?;
            if stats.total > 0 && stats.passing == stats.total {
                info!("backlog complete");
                self.debug_log("backlog complete, all features passing");
                return Ok(RunOutcome::Complete);
            }

            self.reap_finished_slots().await?;
            self.dispatch_ready_work(stats.total == 0).await?;

            sleep(Duration::from_secs(self.config.tick_interval_secs)).await;
        }
    }

    async fn with_store<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut Store) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        self.executor
            .run(move || {
                let mut guard = store.blocking_lock();
                f(&mut guard)
            })
            .await
    }

    async fn dispatch_ready_work(&mut self, backlog_empty: bool) -> EngineResult<()> {
        if backlog_empty {
            if self.slots.iter().any(|s| s.role == Role::Initializer) {
                return Ok(());
            }
            if self.gate_open(Role::Initializer) {
                self.spawn_worker(Role::Initializer, Assignment::None)?;
            }
            return Ok(());
        }

        let capacity = self.config.max_concurrency.saturating_sub(self.slots.len());
        if capacity == 0 {
            self.events.publish_structured(orchestrator_state("At max capacity"));
            return Ok(());
        }

        let ready = self.with_store(move |store| store.ready_features(capacity)).await?;
        self.events
            .publish_structured(orchestrator_state(format!("Spawning loop: {} ready, {} slots", ready.len(), capacity)));

        self.dispatch_coding_batches(ready).await?;
        self.dispatch_testing_workers().await?;
        self.dispatch_reviewers().await?;
        Ok(())
    }

    /// Groups ready features into `config.batch_size`-sized chunks and
    /// claims each member before spawning. A chunk whose every claim
    /// lost the race to another process is simply skipped — the spec
    /// treats a lost claim race as routine, not an error.
    async fn dispatch_coding_batches(&mut self, ready: Vec<Feature>) -> EngineResult<()> {
        let batch_size = self.config.batch_size.max(1);
        for chunk in ready.chunks(batch_size) {
            if self.slots.len() >= self.config.max_concurrency {
                break;
            }
            if !self.gate_open(Role::Coding) {
                break;
            }
            let mut claimed = Vec::with_capacity(chunk.len());
            for feature in chunk {
                let id = feature.id;
                let outcome = self.with_store(move |store| store.claim_and_get(id)).await?;
                if !outcome.already_claimed {
                    claimed.push(id);
                }
            }
            if claimed.is_empty() {
                continue;
            }
            let assignment = if claimed.len() == 1 {
                Assignment::Single(claimed[0])
            } else {
                Assignment::Batch(claimed)
            };
            self.spawn_worker(Role::Coding, assignment)?;
        }
        Ok(())
    }

    /// Spawns `testing` workers against already-passing features to
    /// re-verify them, bounded by `testing_to_coding_ratio` against the
    /// number of currently-live `coding` slots.
    async fn dispatch_testing_workers(&mut self) -> EngineResult<()> {
        if !self.gate_open(Role::Testing) {
            return Ok(());
        }
        let coding_live = self.slots.iter().filter(|s| s.role == Role::Coding).count();
        let testing_live = self.slots.iter().filter(|s| s.role == Role::Testing).count();
        let testing_cap = (self.config.testing_to_coding_ratio * coding_live.max(1) as f64).floor() as usize;
        if testing_live >= testing_cap {
            return Ok(());
        }
        let capacity = self.config.max_concurrency.saturating_sub(self.slots.len()).min(testing_cap - testing_live);
        if capacity == 0 {
            return Ok(());
        }
        let candidates = self.with_store(move |store| store.list_passing(capacity)).await?;
        for feature in candidates {
            if self.slots.len() >= self.config.max_concurrency {
                break;
            }
            self.spawn_worker(Role::Testing, Assignment::Single(feature.id))?;
        }
        Ok(())
    }

    /// Spawns `reviewer` workers against features awaiting review, only
    /// when `review_mode` is enabled. A feature already claimed by a
    /// live reviewer slot is skipped to avoid double-dispatch.
    async fn dispatch_reviewers(&mut self) -> EngineResult<()> {
        if !self.config.review_mode || !self.gate_open(Role::Reviewer) {
            return Ok(());
        }
        let capacity = self.config.max_concurrency.saturating_sub(self.slots.len());
        if capacity == 0 {
            return Ok(());
        }
        let in_review: std::collections::HashSet<i64> =
            self.slots.iter().filter(|s| s.role == Role::Reviewer).filter_map(|s| s.feature_id).collect();
        let candidates = self.with_store(move |store| store.list_pending_review(capacity)).await?;
        for feature in candidates {
            if self.slots.len() >= self.config.max_concurrency {
                break;
            }
            if in_review.contains(&feature.id) {
                continue;
            }
            self.spawn_worker(Role::Reviewer, Assignment::Single(feature.id))?;
        }
        Ok(())
    }

    fn gate_open(&self, role: Role) -> bool {
        self.gates.get(&role).map(RoleGate::is_open).unwrap_or(true)
    }

    fn spawn_worker(&mut self, role: Role, assignment: Assignment) -> EngineResult<()> {
        let profile = self.providers.active_profile()?;
        let spec = LaunchSpec {
            role,
            project_dir: &self.project_dir,
            entrypoint: &self.entrypoint,
            assignment: assignment.clone(),
            yolo: false,
            profile,
        };
        let handle = worker::process::launch(&spec)?;
        self.events.publish_structured(orchestrator_state(format!("Started {} agent", role.as_str())));
        self.debug_log(format!("spawned {} agent, assignment={assignment:?}", role.as_str()));
        let feature_id = match &assignment {
            Assignment::None => None,
            Assignment::Single(id) => Some(*id),
            Assignment::Batch(ids) => ids.first().copied(),
        };
        self.slots.push(LiveSlot { role, feature_id, handle });
        Ok(())
    }

    /// Poll every live slot for new output and for exit. A slot that
    /// has exited is removed and classified; concurrency is freed
    /// immediately, per the redesign note that the live count must be
    /// read directly rather than tracked via a semaphore permit that
    /// only frees on the next explicit release.
    async fn reap_finished_slots(&mut self) -> EngineResult<()> {
        let mut rate_limited: HashMap<usize, Option<Duration>> = HashMap::new();
        let mut dead: Vec<usize> = Vec::new();

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            while let Ok(line) = slot.handle.lines.try_recv() {
                slot.handle.observe_line(&line);
                self.events.publish_raw(RawLine {
                    feature_id: slot.feature_id,
                    role: Some(slot.role),
                    line: line.clone(),
                    timestamp: chrono::Utc::now(),
                });
                if let Some(event) = parse_line(&line) {
                    self.events.publish_structured(event);
                }
                if backoff::is_rate_limit_signal(&line) {
                    rate_limited.entry(idx).or_insert_with(|| backoff::extract_retry_hint(&line));
                }
            }
            if !slot.handle.healthcheck().await? {
                dead.push(idx);
            }
        }

        let mut finished: Vec<usize> = rate_limited.keys().copied().chain(dead).collect();
        finished.sort_unstable();
        finished.dedup();
        finished.sort_by(|a, b| b.cmp(a)); // highest index first so earlier indices stay valid

        for idx in finished {
            let slot = self.slots.remove(idx);
            let hint = rate_limited.get(&idx).copied();
            self.finish_slot(slot, hint).await?;
        }
        Ok(())
    }

    /// `rate_limit_hint` is `Some(delay_hint)` when the slot's output
    /// matched the rate-limit predicate (`delay_hint` itself may be
    /// `None` if no explicit retry-after was present); `None` means the
    /// slot simply exited.
    async fn finish_slot(&mut self, slot: LiveSlot, rate_limit_hint: Option<Option<Duration>>) -> EngineResult<()> {
        let role = slot.role;
        let feature_id = slot.feature_id;
        let report = slot.handle.await_exit().await?;

        // An initializer that exits without having created any features
        // has not made progress; treat it the same as a plain error so
        // the loop doesn't spin re-spawning it with no backoff at all.
        let forced_error = if role == Role::Initializer && report.status == WorkerStatus::FinishedOk {
            let stats = self.with_store(|store| store.get_stats()).await?;
            stats.total == 0
        } else {
            false
        };

        // Every `gate` borrow below is scoped to plain synchronous code;
        // none of them may cross an `.await` on `self`, since `gates` is
        // a field of `self` and `with_store`/`report_permanent_failure`
        // both need to borrow `self` again to run.
        if let Some(hint) = rate_limit_hint {
            let jitter_frac = rand::Rng::gen_range(&mut rand::thread_rng(), -0.1..=0.1);
            let gate = self.gates.entry(role).or_default();
            let delay = gate.backoff.on_rate_limited(hint, jitter_frac);
            gate.not_before = Some(Instant::now() + delay);
            warn!(role = role.as_str(), delay_secs = delay.as_secs(), "rate limited, backing off");
            self.debug_log(format!("{} rate limited, backing off {}s", role.as_str(), delay.as_secs()));
            return Ok(());
        }

        if forced_error {
            let gate = self.gates.entry(role).or_default();
            let delay = gate.backoff.on_error();
            gate.not_before = Some(Instant::now() + delay);
            warn!(role = role.as_str(), "initializer exited without creating features, backing off");
            self.debug_log(format!("{} exited without creating features, backing off {}s", role.as_str(), delay.as_secs()));
            return Ok(());
        }

        match report.status {
            WorkerStatus::FinishedOk => {
                self.gates.entry(role).or_default().backoff.on_success();
            }
            WorkerStatus::FinishedError | WorkerStatus::Crashed => {
                if let Some(id) = feature_id {
                    self.with_store(move |store| store.clear_in_progress(id)).await.ok();
                }
                let (attempts, last_lines) = {
                    let gate = self.gates.entry(role).or_default();
                    let delay = gate.backoff.on_error();
                    gate.not_before = Some(Instant::now() + delay);
                    (gate.backoff.error_attempts(), report.last_lines.clone())
                };
                warn!(role = role.as_str(), feature_id, attempts, last_lines = ?last_lines, "worker failed, backing off");
                self.debug_log(format!("{} failed on feature {feature_id:?}, attempt {attempts}"));

                if attempts >= self.config.max_retries {
                    if let Some(id) = feature_id {
                        self.report_permanent_failure(role, id, &last_lines).await?;
                    }
                    let gate = self.gates.entry(role).or_default();
                    gate.backoff.on_success();
                    gate.not_before = None;
                }
            }
            WorkerStatus::Killed | WorkerStatus::Starting | WorkerStatus::Running => {}
        }
        Ok(())
    }

    /// A role's gate has now failed the same in-flight feature
    /// `config.max_retries` times in a row. Record a failing audit row,
    /// clear the in-progress flag so the feature returns to the ready
    /// pool (or stays blocked, if some other precondition regressed),
    /// and emit a structured log marking the feature as permanently
    /// failed for this role rather than silently retried forever.
    async fn report_permanent_failure(&mut self, role: Role, feature_id: i64, last_lines: &[String]) -> EngineResult<()> {
        let agent_type = role.as_str();
        let tail = last_lines.join("\n");
        self.with_store(move |store| {
            store.append_test_run(&crate::store::NewTestRun {
                feature_id,
                passed: false,
                agent_type,
                agent_pid: None,
                feature_ids_in_batch: None,
                started_at: chrono::Utc::now().to_rfc3339(),
                completed_at: Some(chrono::Utc::now().to_rfc3339()),
                return_code: None,
            })?;
            store.clear_in_progress(feature_id)
        })
        .await?;
        self.events.publish_structured(orchestrator_state(format!(
            "Feature #{feature_id} permanently failed under {agent_type} after repeated errors: {tail}"
        )));
        tracing::error!(role = agent_type, feature_id, "permanent feature failure, retry budget exhausted");
        self.debug_log(format!("feature {feature_id} permanently failed under {agent_type}"));
        Ok(())
    }

    async fn drain_for_shutdown(&mut self) {
        let budget = Duration::from_secs(self.config.shutdown_budget_secs);
        let deadline = Instant::now() + budget;
        let slots = std::mem::take(&mut self.slots);
        for slot in slots {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let stopped = tokio::time::timeout(remaining, slot.handle.stop()).await;
            if stopped.is_err() {
                warn!("shutdown budget exceeded, worker force-killed by stop()'s own escalation");
                self.debug_log("shutdown budget exceeded, a worker was force-killed");
            }
        }
        self.debug_log("shutdown drain complete");
    }
}

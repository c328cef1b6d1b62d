pub mod events;
pub mod job;
pub mod persistence;

pub use events::{EngineEvent, EngineEventKind, EventBus};
pub use job::{Cancellation, Job, JobState, StepRecord, StepState};
pub use persistence::{JobJournal, JournalError};

use crate::cache::{step_fingerprint, tool_versions_for, CacheStore};
use crate::protocol::{RequestEnvelope, ResponseEnvelope, WorkerKind};
use crate::recipes::Plan;
use crate::shared::{append_log_event, next_opaque_id, now_millis, WorkerFault};
use crate::supervisor::WorkerSupervisor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Delay before the forced worker kill when a running step's cancellation
/// race resolves as failure. The in-process worker has no cooperative cancel
/// channel; killing the process is the only hard interrupt.
pub const CANCEL_KILL_DELAY: Duration = Duration::from_millis(1_000);

/// How the engine reaches workers. The supervisor is the production
/// implementation; engine tests drive a scripted transport.
pub trait StepTransport: Send + Sync {
    fn call(
        &self,
        env: &RequestEnvelope,
        timeout: Option<Duration>,
    ) -> Result<ResponseEnvelope, WorkerFault>;

    fn restart_worker(&self, worker: WorkerKind, reason: &str) -> Result<(), WorkerFault>;
}

impl StepTransport for WorkerSupervisor {
    fn call(
        &self,
        env: &RequestEnvelope,
        timeout: Option<Duration>,
    ) -> Result<ResponseEnvelope, WorkerFault> {
        WorkerSupervisor::call(self, env, timeout)
    }

    fn restart_worker(&self, worker: WorkerKind, reason: &str) -> Result<(), WorkerFault> {
        self.restart(worker, reason)
    }
}

pub fn default_concurrency() -> BTreeMap<WorkerKind, usize> {
    BTreeMap::from([
        (WorkerKind::Resolve, 1),
        (WorkerKind::Media, 2),
        (WorkerKind::Platform, 2),
    ])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueItem {
    job_id: String,
    step_id: String,
}

struct EngineState {
    jobs: HashMap<String, Job>,
    order: Vec<String>,
    idempotency: HashMap<String, String>,
    queues: BTreeMap<WorkerKind, VecDeque<QueueItem>>,
    active: BTreeMap<WorkerKind, usize>,
    concurrency: BTreeMap<WorkerKind, usize>,
}

struct EngineInner {
    transport: Arc<dyn StepTransport>,
    journal: JobJournal,
    cache: Mutex<CacheStore>,
    events: EventBus,
    log_path: PathBuf,
    state: Mutex<EngineState>,
}

/// The job engine: accepts plans, materializes jobs with a step DAG,
/// schedules steps onto per-worker FIFO queues under per-worker concurrency,
/// runs them with timeout/retry/cancellation, persists every transition and
/// fans out events.
///
/// All job and step mutations happen under one scheduler lock; step
/// execution threads only re-enter through `apply_step_result`.
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

impl JobEngine {
    pub fn new(
        transport: Arc<dyn StepTransport>,
        journal: JobJournal,
        cache: CacheStore,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        let queues = WorkerKind::ALL
            .into_iter()
            .map(|worker| (worker, VecDeque::new()))
            .collect();
        let active = WorkerKind::ALL.into_iter().map(|worker| (worker, 0)).collect();
        Self {
            inner: Arc::new(EngineInner {
                transport,
                journal,
                cache: Mutex::new(cache),
                events: EventBus::default(),
                log_path: log_path.into(),
                state: Mutex::new(EngineState {
                    jobs: HashMap::new(),
                    order: Vec::new(),
                    idempotency: HashMap::new(),
                    queues,
                    active,
                    concurrency: default_concurrency(),
                }),
            }),
        }
    }

    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().expect("engine state lock poisoned")
    }

    fn log(&self, level: &str, event: &str, message: &str) {
        append_log_event(&self.inner.log_path, level, event, message);
    }

    /// Accept a plan. A repeated idempotency key returns the already-known
    /// job unchanged and creates nothing.
    pub fn submit(&self, plan: &Plan) -> Job {
        let mut state = self.lock_state();
        if let Some(key) = &plan.idempotency_key {
            if let Some(job_id) = state.idempotency.get(key).cloned() {
                if let Some(existing) = state.jobs.get(&job_id) {
                    return existing.clone();
                }
            }
        }

        let job_id = next_opaque_id("job");
        let job = Job::from_plan(&job_id, plan, now_millis());
        if let Some(key) = &plan.idempotency_key {
            state.idempotency.insert(key.clone(), job_id.clone());
        }
        state.order.push(job_id.clone());
        state.jobs.insert(job_id.clone(), job);

        let snapshot = state.jobs.get(&job_id).cloned();
        if let Some(job) = &snapshot {
            self.persist(job);
            self.emit_job_state(job, None);
        }
        self.log(
            "info",
            "job.submitted",
            &format!("job_id={job_id} preset_id={}", plan.preset_id),
        );
        self.schedule_and_drain(&mut state, &job_id);
        state
            .jobs
            .get(&job_id)
            .cloned()
            .expect("submitted job is indexed")
    }

    /// Replay the journal: the last snapshot per job wins, the idempotency
    /// index is rebuilt, and every recoverable job is re-enqueued with its
    /// in-flight steps demoted back to queued. Returns the resumed count.
    pub fn hydrate(&self) -> Result<usize, JournalError> {
        let jobs = self.inner.journal.hydrate()?;
        let mut resumed = 0;
        let mut state = self.lock_state();
        for mut job in jobs {
            if state.jobs.contains_key(&job.job_id) {
                continue;
            }
            let recoverable = !job.state.is_terminal();
            if recoverable {
                for step in &mut job.steps {
                    if matches!(step.state, StepState::Running | StepState::Dispatching) {
                        step.state = StepState::Queued;
                        step.started_at = None;
                        step.finished_at = None;
                    }
                }
            }
            if let Some(key) = &job.idempotency_key {
                state.idempotency.insert(key.clone(), job.job_id.clone());
            }
            let job_id = job.job_id.clone();
            state.order.push(job_id.clone());
            state.jobs.insert(job_id.clone(), job);
            if recoverable {
                resumed += 1;
                if let Some(job) = state.jobs.get(&job_id) {
                    self.persist(job);
                }
                self.schedule_and_drain(&mut state, &job_id);
            }
        }
        if resumed > 0 {
            self.log("info", "engine.resumed", &format!("jobs={resumed}"));
        }
        Ok(resumed)
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.lock_state().jobs.get(job_id).cloned()
    }

    /// Jobs in submission order.
    pub fn list_jobs(&self) -> Vec<Job> {
        let state = self.lock_state();
        state
            .order
            .iter()
            .filter_map(|job_id| state.jobs.get(job_id).cloned())
            .collect()
    }

    pub fn queue_depth(&self, worker: WorkerKind) -> usize {
        self.lock_state()
            .queues
            .get(&worker)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn active_count(&self, worker: WorkerKind) -> usize {
        self.lock_state().active.get(&worker).copied().unwrap_or(0)
    }

    /// Re-apply per-worker concurrency and drain anything a raised limit
    /// just unblocked. Limits below one clamp to one.
    pub fn set_concurrency(&self, limits: &BTreeMap<WorkerKind, usize>) {
        let mut state = self.lock_state();
        for (worker, limit) in limits {
            state.concurrency.insert(*worker, (*limit).max(1));
        }
        self.drain_queues(&mut state);
    }

    /// Request cancellation. Steps not yet running cancel immediately. A
    /// running step keeps its flag; since workers have no cooperative cancel
    /// channel, a forced worker restart is armed about a second out, which
    /// flushes the pending request and resolves the step as canceled.
    pub fn cancel(&self, job_id: &str) -> CancelAck {
        let mut running_steps = Vec::new();
        {
            let mut state = self.lock_state();
            let Some(job) = state.jobs.get_mut(job_id) else {
                return CancelAck {
                    ok: false,
                    message: "job not found".to_string(),
                };
            };
            if job.state.is_terminal() {
                return CancelAck {
                    ok: true,
                    message: "cancellation requested".to_string(),
                };
            }

            let now = now_millis();
            let mut canceled_steps = Vec::new();
            for step in &mut job.steps {
                match step.state {
                    StepState::Queued | StepState::Dispatching => {
                        step.cancellation.requested = true;
                        step.state = StepState::Canceled;
                        step.finished_at = Some(now);
                        step.error = Some(WorkerFault::retryable("canceled"));
                        canceled_steps.push(step.clone());
                    }
                    StepState::Running => {
                        if !step.cancellation.requested {
                            step.cancellation.requested = true;
                            running_steps.push((step.worker, step.step_id.clone()));
                        }
                    }
                    _ => {}
                }
            }

            let job_id_owned = job.job_id.clone();
            let snapshot = job.clone();
            for step in &canceled_steps {
                self.emit_step(&job_id_owned, step, Some("canceled"), None);
            }
            self.persist(&snapshot);
            self.finalize_job(&mut state, &job_id_owned);
            self.log(
                "info",
                "job.cancel_requested",
                &format!("job_id={job_id_owned}"),
            );
        }

        for (worker, step_id) in running_steps {
            self.arm_cancel_kill(worker, job_id.to_string(), step_id);
        }
        CancelAck {
            ok: true,
            message: "cancellation requested".to_string(),
        }
    }

    /// Delayed hard interrupt for a canceled running step. If the step has
    /// not managed to succeed by the time the delay elapses, the worker is
    /// restarted; the pending flush fails the step and the cancellation flag
    /// resolves it as canceled.
    fn arm_cancel_kill(&self, worker: WorkerKind, job_id: String, step_id: String) {
        let engine = self.clone();
        thread::spawn(move || {
            thread::sleep(CANCEL_KILL_DELAY);
            let resolved_ok = engine
                .get_job(&job_id)
                .and_then(|job| job.step(&step_id).map(|step| step.state))
                .map(|state| state == StepState::Succeeded)
                .unwrap_or(true);
            if resolved_ok {
                return;
            }
            let reason = format!("canceled {job_id}:{step_id}");
            if let Err(fault) = engine.inner.transport.restart_worker(worker, &reason) {
                engine.log(
                    "warn",
                    "worker.cancel_restart_failed",
                    &format!("worker={worker} error={}", fault.message),
                );
            }
        });
    }

    /// One scheduling pass for a job: start cache-satisfied and runnable
    /// steps, drain the per-worker queues, then re-check finalization.
    fn schedule_and_drain(&self, state: &mut EngineState, job_id: &str) {
        loop {
            let runnable: Vec<String> = match state.jobs.get(job_id) {
                Some(job) if !job.state.is_terminal() => job
                    .steps
                    .iter()
                    .filter(|step| job.step_is_runnable(&step.step_id))
                    .map(|step| step.step_id.clone())
                    .collect(),
                _ => Vec::new(),
            };
            if runnable.is_empty() {
                break;
            }

            let mut progressed = false;
            for step_id in runnable {
                progressed |= self.start_step(state, job_id, &step_id);
            }
            if !progressed {
                break;
            }
        }
        self.drain_queues(state);
        self.finalize_job(state, job_id);
    }

    /// Move one runnable step forward: a cache hit satisfying the output
    /// contract succeeds it immediately at attempt zero; otherwise it goes
    /// to dispatching on its worker's FIFO queue. Returns whether a cache
    /// hit may have unlocked dependent steps.
    fn start_step(&self, state: &mut EngineState, job_id: &str, step_id: &str) -> bool {
        self.mark_job_running(state, job_id);

        let cached = self.cached_output(state, job_id, step_id);
        let Some(job) = state.jobs.get_mut(job_id) else {
            return false;
        };
        let Some(step) = job.step_mut(step_id) else {
            return false;
        };

        if let Some(output) = cached {
            step.state = StepState::Succeeded;
            step.output = Some(output);
            step.finished_at = Some(now_millis());
            let step_snapshot = step.clone();
            let snapshot = job.clone();
            self.emit_step(job_id, &step_snapshot, Some("cache_hit"), Some(0));
            self.persist(&snapshot);
            return true;
        }

        step.state = StepState::Dispatching;
        let worker = step.worker;
        let step_snapshot = step.clone();
        let snapshot = job.clone();
        state
            .queues
            .entry(worker)
            .or_default()
            .push_back(QueueItem {
                job_id: job_id.to_string(),
                step_id: step_id.to_string(),
            });
        self.emit_step(job_id, &step_snapshot, None, None);
        self.persist(&snapshot);
        false
    }

    fn mark_job_running(&self, state: &mut EngineState, job_id: &str) {
        let Some(job) = state.jobs.get_mut(job_id) else {
            return;
        };
        if job.state != JobState::Queued {
            return;
        }
        job.state = JobState::Running;
        job.started_at = Some(now_millis());
        let snapshot = job.clone();
        self.persist(&snapshot);
        self.emit_job_state(&snapshot, None);
    }

    /// Consult the step cache when the step's policy enables it. The cached
    /// output must still satisfy the output contract.
    fn cached_output(&self, state: &EngineState, job_id: &str, step_id: &str) -> Option<Value> {
        let job = state.jobs.get(job_id)?;
        let step = job.step(step_id)?;
        if !step.cache_policy.enabled {
            return None;
        }
        let versions = tool_versions_for(step.worker, &step.tool_versions);
        let fingerprint = match step_fingerprint(&step.cmd, &step.payload, &versions) {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                self.log(
                    "warn",
                    "cache.fingerprint_failed",
                    &format!("job_id={job_id} step_id={step_id} error={err}"),
                );
                return None;
            }
        };
        let cache = self.inner.cache.lock().expect("cache lock poisoned");
        let entry = cache.get(&fingerprint, step.cache_policy.ttl_ms)?;
        if step.output_contract.validate(&entry.output).is_err() {
            return None;
        }
        Some(entry.output.clone())
    }

    /// Start queued work while each worker has spare concurrency. Dispatch
    /// never blocks: the actual worker call happens on a fresh thread.
    fn drain_queues(&self, state: &mut EngineState) {
        for worker in WorkerKind::ALL {
            loop {
                let active = state.active.get(&worker).copied().unwrap_or(0);
                let limit = state.concurrency.get(&worker).copied().unwrap_or(1);
                if active >= limit {
                    break;
                }
                let Some(item) = state.queues.get_mut(&worker).and_then(VecDeque::pop_front)
                else {
                    break;
                };
                let Some(job) = state.jobs.get_mut(&item.job_id) else {
                    continue;
                };
                let timeout_ms = job.timeout_ms;
                let Some(step) = job.step_mut(&item.step_id) else {
                    continue;
                };
                // A step canceled while waiting in the queue is left alone.
                if step.state != StepState::Dispatching {
                    continue;
                }

                step.state = StepState::Running;
                step.attempt += 1;
                step.started_at = Some(now_millis());
                step.finished_at = None;
                let env = RequestEnvelope {
                    id: next_opaque_id("req"),
                    worker,
                    cmd: step.cmd.clone(),
                    payload: step.payload.clone(),
                    trace_id: format!("{}:{}:{}", item.job_id, item.step_id, step.attempt),
                };
                let step_snapshot = step.clone();
                let snapshot = job.clone();
                *state.active.entry(worker).or_insert(0) += 1;

                self.emit_step(&item.job_id, &step_snapshot, None, None);
                self.persist(&snapshot);

                let engine = self.clone();
                let contract = step_snapshot.output_contract;
                let cache_policy = step_snapshot.cache_policy.clone();
                let tool_versions = step_snapshot.tool_versions.clone();
                thread::spawn(move || {
                    let timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
                    let outcome = engine
                        .inner
                        .transport
                        .call(&env, timeout)
                        .map(|response| response.data.unwrap_or(Value::Null))
                        .and_then(|output| {
                            contract.validate(&output)?;
                            Ok(output)
                        });

                    if let Ok(output) = &outcome {
                        if cache_policy.enabled {
                            engine.populate_cache(
                                &env.cmd,
                                &env.payload,
                                &tool_versions,
                                env.worker,
                                output,
                            );
                        }
                    }
                    engine.apply_step_result(&item.job_id, &item.step_id, outcome);
                });
            }
        }
    }

    fn populate_cache(
        &self,
        cmd: &str,
        payload: &serde_json::Map<String, Value>,
        declared_versions: &BTreeMap<String, String>,
        worker: WorkerKind,
        output: &Value,
    ) {
        let versions = tool_versions_for(worker, declared_versions);
        match step_fingerprint(cmd, payload, &versions) {
            Ok(fingerprint) => {
                let mut cache = self.inner.cache.lock().expect("cache lock poisoned");
                if let Err(err) = cache.set(&fingerprint, output.clone()) {
                    self.log("warn", "cache.write_failed", &format!("error={err}"));
                }
            }
            Err(err) => {
                self.log("warn", "cache.fingerprint_failed", &format!("error={err}"));
            }
        }
    }

    /// Apply a finished worker call back onto the job index. This is the
    /// only path a step execution thread mutates engine state through.
    fn apply_step_result(
        &self,
        job_id: &str,
        step_id: &str,
        outcome: Result<Value, WorkerFault>,
    ) {
        let mut retry_backoff_ms: Option<u64> = None;
        {
            let mut state = self.lock_state();
            let Some(job) = state.jobs.get_mut(job_id) else {
                return;
            };

            let worker;
            let timing_ms;
            let (step_snapshot, code, job_error) = {
                let Some(step) = job.step_mut(step_id) else {
                    return;
                };
                if step.state != StepState::Running {
                    return;
                }

                worker = step.worker;
                let now = now_millis();
                timing_ms = step.started_at.map(|started| now.saturating_sub(started));
                step.finished_at = Some(now);

                match outcome {
                    Ok(output) => {
                        step.state = StepState::Succeeded;
                        step.output = Some(output);
                        step.error = None;
                        (step.clone(), None, None)
                    }
                    Err(fault) => {
                        if step.cancellation.requested {
                            step.state = StepState::Canceled;
                            step.error = Some(WorkerFault::retryable("canceled"));
                            (step.clone(), Some("canceled"), None)
                        } else if fault.is_retryable()
                            && step.attempt < step.retry_policy.max_attempts
                        {
                            step.state = StepState::Queued;
                            step.error = Some(fault);
                            retry_backoff_ms = Some(step.retry_policy.backoff_ms);
                            (step.clone(), Some("retry"), None)
                        } else {
                            step.state = StepState::Failed;
                            step.error = Some(fault.clone());
                            (step.clone(), Some("failed"), Some(fault))
                        }
                    }
                }
            };
            if let Some(fault) = job_error {
                job.errors.push(fault);
            }

            let snapshot = job.clone();
            if let Some(count) = state.active.get_mut(&worker) {
                *count = count.saturating_sub(1);
            }
            self.emit_step(job_id, &step_snapshot, code, timing_ms);
            self.persist(&snapshot);

            match retry_backoff_ms {
                // Requeue waits out its backoff before the next scheduling
                // pass; the worker queue still drains for other jobs.
                Some(backoff) if backoff > 0 => {
                    self.drain_queues(&mut state);
                    self.finalize_job(&mut state, job_id);
                }
                _ => {
                    self.schedule_and_drain(&mut state, job_id);
                }
            }
        }

        if let Some(backoff) = retry_backoff_ms.filter(|backoff| *backoff > 0) {
            let engine = self.clone();
            let job_id = job_id.to_string();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(backoff));
                let mut state = engine.lock_state();
                engine.schedule_and_drain(&mut state, &job_id);
            });
        }
    }

    /// Decide job finalization. Terminal jobs are never re-finalized.
    fn finalize_job(&self, state: &mut EngineState, job_id: &str) {
        let Some(job) = state.jobs.get_mut(job_id) else {
            return;
        };
        if job.state.is_terminal() {
            return;
        }

        let any_failed = job.steps.iter().any(|s| s.state == StepState::Failed);
        let any_canceled = job.steps.iter().any(|s| s.state == StepState::Canceled);
        let any_in_flight = job
            .steps
            .iter()
            .any(|s| matches!(s.state, StepState::Running | StepState::Dispatching));
        let all_succeeded = job.steps.iter().all(|s| s.state == StepState::Succeeded);

        let next = if any_failed {
            // Remaining queued steps stay queued; the job is terminal.
            Some(JobState::Failed)
        } else if any_canceled && !any_in_flight {
            Some(JobState::Canceled)
        } else if all_succeeded {
            Some(JobState::Succeeded)
        } else {
            None
        };
        let Some(next) = next else {
            return;
        };

        job.state = next;
        let now = now_millis();
        job.finished_at = Some(now);
        if next == JobState::Succeeded {
            job.outputs = job
                .steps
                .iter()
                .filter_map(|step| step.output.clone())
                .collect();
        }
        let timing_ms = now.saturating_sub(job.started_at.unwrap_or(job.created_at));
        let snapshot = job.clone();
        self.persist(&snapshot);
        self.emit_job_state(&snapshot, Some(timing_ms));
        self.log(
            "info",
            "job.finalized",
            &format!("job_id={job_id} state={next}"),
        );
    }

    /// Every mutation appends one self-contained snapshot. Journal failures
    /// are logged, never propagated into scheduling.
    fn persist(&self, job: &Job) {
        if let Err(err) = self.inner.journal.append(job) {
            self.log(
                "error",
                "journal.append_failed",
                &format!("job_id={} error={err}", job.job_id),
            );
        }
    }

    fn emit_job_state(&self, job: &Job, timing_ms: Option<i64>) {
        self.inner.events.publish(EngineEvent {
            kind: EngineEventKind::JobState,
            job_id: job.job_id.clone(),
            step_id: None,
            worker: None,
            state: job.state.as_str().to_string(),
            code: None,
            output: None,
            error: job.errors.first().cloned(),
            timing_ms,
        });
    }

    fn emit_step(
        &self,
        job_id: &str,
        step: &StepRecord,
        code: Option<&str>,
        timing_ms: Option<i64>,
    ) {
        self.inner.events.publish(EngineEvent {
            kind: EngineEventKind::StepProgress,
            job_id: job_id.to_string(),
            step_id: Some(step.step_id.clone()),
            worker: Some(step.worker),
            state: step.state.as_str().to_string(),
            code: code.map(str::to_string),
            output: if step.state == StepState::Succeeded {
                step.output.clone()
            } else {
                None
            },
            error: step.error.clone(),
            timing_ms,
        });
    }
}

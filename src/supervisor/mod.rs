pub mod health;
pub mod signals;

pub use health::start_health_monitor;
pub use signals::{SignalHub, WorkerSignal, WORKER_AVAILABLE};

use crate::config::Settings;
use crate::protocol::{normalize_response, to_wire_line, RequestEnvelope, ResponseEnvelope, WorkerKind, WorkerReply};
use crate::shared::{append_log_event, next_opaque_id, now_millis, WorkerFault};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Restart delay table indexed by crash count, clamped to the last entry.
pub const RESTART_BACKOFF_MS: &[u64] = &[500, 1_000, 2_000, 5_000, 10_000];

pub fn restart_backoff(crash_count: u32) -> Duration {
    let index = (crash_count.saturating_sub(1) as usize).min(RESTART_BACKOFF_MS.len() - 1);
    Duration::from_millis(RESTART_BACKOFF_MS[index])
}

type ReplySender = SyncSender<Result<ResponseEnvelope, WorkerFault>>;

/// Point-in-time view of one worker slot.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStatus {
    pub worker: WorkerKind,
    pub running: bool,
    pub healthy: bool,
    pub crash_count: u32,
    #[serde(default)]
    pub started_at: Option<i64>,
    pub pending_requests: usize,
}

#[derive(Debug)]
struct PendingEntry {
    sender: ReplySender,
    started_at: i64,
    trace_id: String,
    cmd: String,
}

#[derive(Debug, Default)]
struct WorkerSlot {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    pending: HashMap<String, PendingEntry>,
    healthy: bool,
    crash_count: u32,
    stopping: bool,
    started_at: Option<i64>,
    transcribe_in_progress: bool,
    /// Bumped on every spawn and intentional teardown so stale reader
    /// threads and restart timers cannot act on a newer incarnation.
    generation: u64,
}

struct SupervisorInner {
    settings: Settings,
    log_path: PathBuf,
    slots: HashMap<WorkerKind, Mutex<WorkerSlot>>,
    signals: SignalHub,
}

/// Owns the lifecycle of the three worker processes: spawn, stdout reading,
/// pending-request bookkeeping, crash-restart with backoff, health checks.
#[derive(Clone)]
pub struct WorkerSupervisor {
    inner: Arc<SupervisorInner>,
}

impl WorkerSupervisor {
    pub fn new(settings: Settings, log_path: impl Into<PathBuf>) -> Self {
        let slots = WorkerKind::ALL
            .into_iter()
            .map(|worker| (worker, Mutex::new(WorkerSlot::default())))
            .collect();
        Self {
            inner: Arc::new(SupervisorInner {
                settings,
                log_path: log_path.into(),
                slots,
                signals: SignalHub::default(),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> Receiver<WorkerSignal> {
        self.inner.signals.subscribe()
    }

    fn slot(&self, worker: WorkerKind) -> &Mutex<WorkerSlot> {
        self.inner
            .slots
            .get(&worker)
            .expect("supervisor carries a slot for every worker")
    }

    fn log(&self, level: &str, event: &str, message: &str) {
        append_log_event(&self.inner.log_path, level, event, message);
    }

    pub fn is_running(&self, worker: WorkerKind) -> bool {
        let slot = self.slot(worker).lock().expect("worker slot lock poisoned");
        slot.child.is_some()
    }

    pub fn is_healthy(&self, worker: WorkerKind) -> bool {
        let slot = self.slot(worker).lock().expect("worker slot lock poisoned");
        slot.child.is_some() && slot.healthy
    }

    pub fn transcribe_in_progress(&self) -> bool {
        let slot = self
            .slot(WorkerKind::Media)
            .lock()
            .expect("worker slot lock poisoned");
        slot.transcribe_in_progress
    }

    pub fn status(&self, worker: WorkerKind) -> WorkerStatus {
        let slot = self.slot(worker).lock().expect("worker slot lock poisoned");
        WorkerStatus {
            worker,
            running: slot.child.is_some(),
            healthy: slot.child.is_some() && slot.healthy,
            crash_count: slot.crash_count,
            started_at: slot.started_at,
            pending_requests: slot.pending.len(),
        }
    }

    /// Spawn the worker if it is not already running. On success the crash
    /// counter resets and subscribers observe `WORKER_AVAILABLE`.
    pub fn start(&self, worker: WorkerKind) -> Result<(), WorkerFault> {
        let spawn = self.inner.settings.spawn_config(worker);
        let mut slot = self.slot(worker).lock().expect("worker slot lock poisoned");
        if slot.child.is_some() {
            return Ok(());
        }

        let mut command = Command::new(&spawn.command);
        command
            .args(&spawn.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(cwd) = &spawn.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spawn.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|err| {
            WorkerFault::retryable(format!("failed to spawn worker `{worker}`: {err}"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            WorkerFault::retryable(format!("worker `{worker}` has no stdout pipe"))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            WorkerFault::retryable(format!("worker `{worker}` has no stdin pipe"))
        })?;

        slot.child = Some(child);
        slot.stdin = Some(stdin);
        slot.healthy = true;
        slot.crash_count = 0;
        slot.stopping = false;
        slot.started_at = Some(now_millis());
        slot.transcribe_in_progress = false;
        slot.generation += 1;
        let generation = slot.generation;
        drop(slot);

        let supervisor = self.clone();
        thread::spawn(move || supervisor.read_worker_stdout(worker, stdout, generation));

        self.log("info", "worker.started", &format!("worker={worker}"));
        self.inner
            .signals
            .publish(WorkerSignal::Available { worker });
        Ok(())
    }

    /// Intentional teardown: pending requests are flushed by the exit path,
    /// and no restart is scheduled.
    pub fn stop(&self, worker: WorkerKind) {
        let child = {
            let mut slot = self.slot(worker).lock().expect("worker slot lock poisoned");
            slot.stopping = true;
            slot.stdin = None;
            slot.child.take()
        };
        if let Some(mut child) = child {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.log("info", "worker.stopped", &format!("worker={worker}"));
    }

    pub fn stop_all(&self) {
        for worker in WorkerKind::ALL {
            self.stop(worker);
        }
    }

    /// Kill and respawn, failing every pending request with a retryable
    /// fault naming the reason.
    pub fn restart(&self, worker: WorkerKind, reason: &str) -> Result<(), WorkerFault> {
        let (child, pending) = {
            let mut slot = self.slot(worker).lock().expect("worker slot lock poisoned");
            slot.generation += 1;
            slot.stdin = None;
            slot.healthy = false;
            slot.transcribe_in_progress = false;
            (
                slot.child.take(),
                std::mem::take(&mut slot.pending),
            )
        };
        self.flush_pending(worker, pending, WorkerFault::retryable(reason));
        if let Some(mut child) = child {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.log(
            "warn",
            "worker.restarted",
            &format!("worker={worker} reason={reason}"),
        );
        self.inner.signals.publish(WorkerSignal::Exited {
            worker,
            reason: reason.to_string(),
        });
        self.start(worker)
    }

    /// Register a pending entry and write the wire line. The returned
    /// receiver resolves when the matching response arrives or the pending
    /// map is flushed by an exit, restart or health failure.
    pub fn send_request(
        &self,
        env: &RequestEnvelope,
    ) -> Result<Receiver<Result<ResponseEnvelope, WorkerFault>>, WorkerFault> {
        let worker = env.worker;
        let line = to_wire_line(env);
        let (tx, rx) = std::sync::mpsc::sync_channel(1);

        let mut slot = self.slot(worker).lock().expect("worker slot lock poisoned");
        if slot.child.is_none() || slot.stopping {
            return Err(WorkerFault::retryable(format!(
                "worker `{worker}` is not running"
            )));
        }
        slot.pending.insert(
            env.id.clone(),
            PendingEntry {
                sender: tx,
                started_at: now_millis(),
                trace_id: env.trace_id.clone(),
                cmd: env.cmd.clone(),
            },
        );
        if env.cmd.starts_with("transcribe") {
            slot.transcribe_in_progress = true;
        }

        let write_result = slot
            .stdin
            .as_mut()
            .ok_or_else(|| WorkerFault::retryable(format!("worker `{worker}` has no stdin")))
            .and_then(|stdin| {
                writeln!(stdin, "{line}").and_then(|()| stdin.flush()).map_err(|err| {
                    WorkerFault::retryable(format!("failed to write to worker `{worker}`: {err}"))
                })
            });
        if let Err(fault) = write_result {
            slot.pending.remove(&env.id);
            return Err(fault);
        }
        Ok(rx)
    }

    /// Drop a pending entry without resolving it. Used by callers that gave
    /// up on a request (step timeout); a late response is then ignored.
    pub fn forget(&self, worker: WorkerKind, id: &str) {
        let mut slot = self.slot(worker).lock().expect("worker slot lock poisoned");
        slot.pending.remove(id);
    }

    /// Blocking request/response round trip with an optional timeout.
    pub fn call(
        &self,
        env: &RequestEnvelope,
        timeout: Option<Duration>,
    ) -> Result<ResponseEnvelope, WorkerFault> {
        let rx = self.send_request(env)?;
        let reply = match timeout {
            Some(timeout) => rx.recv_timeout(timeout).map_err(|_| {
                self.forget(env.worker, &env.id);
                WorkerFault::retryable(format!(
                    "timeout waiting for `{}` on worker `{}`",
                    env.cmd, env.worker
                ))
            })?,
            None => rx.recv().map_err(|_| {
                self.forget(env.worker, &env.id);
                WorkerFault::retryable(format!(
                    "worker `{}` dropped request `{}`",
                    env.worker, env.cmd
                ))
            })?,
        };
        reply
    }

    /// Health probe: every worker must answer `ping`.
    pub fn ping(&self, worker: WorkerKind) -> Result<(), WorkerFault> {
        let env = RequestEnvelope {
            id: next_opaque_id("ping"),
            worker,
            cmd: "ping".to_string(),
            payload: serde_json::Map::new(),
            trace_id: next_opaque_id("trace"),
        };
        let timeout = Duration::from_millis(self.inner.settings.ping_timeout_ms);
        self.call(&env, Some(timeout)).map(|_| ())
    }

    /// Mark a worker unhealthy, flush its pending map and kill the process
    /// so the exit path restarts it. Called by the health monitor.
    pub fn mark_unhealthy(&self, worker: WorkerKind, reason: &str) {
        let pending = {
            let mut slot = self.slot(worker).lock().expect("worker slot lock poisoned");
            slot.healthy = false;
            if let Some(child) = slot.child.as_mut() {
                let _ = child.kill();
            }
            std::mem::take(&mut slot.pending)
        };
        self.flush_pending(worker, pending, WorkerFault::retryable(reason));
        self.log(
            "warn",
            "worker.unhealthy",
            &format!("worker={worker} reason={reason}"),
        );
        self.inner.signals.publish(WorkerSignal::Unhealthy {
            worker,
            reason: reason.to_string(),
        });
    }

    fn read_worker_stdout(
        &self,
        worker: WorkerKind,
        stdout: std::process::ChildStdout,
        generation: u64,
    ) {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            self.dispatch_line(worker, trimmed);
        }
        self.handle_exit(worker, generation);
    }

    fn dispatch_line(&self, worker: WorkerKind, line: &str) {
        let raw: serde_json::Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(err) => {
                // An unparseable line has no id to resolve; log and move on.
                self.log(
                    "warn",
                    "worker.invalid_response",
                    &format!("worker={worker} error={err}"),
                );
                return;
            }
        };

        let id = raw
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let started_at = id.as_deref().and_then(|id| {
            let slot = self.slot(worker).lock().expect("worker slot lock poisoned");
            slot.pending.get(id).map(|entry| entry.started_at)
        });

        match normalize_response(&raw, None, started_at) {
            WorkerReply::Event(event) => {
                self.inner
                    .signals
                    .publish(WorkerSignal::Event { worker, event });
            }
            WorkerReply::Response(response) => {
                let Some(id) = response.id.clone() else {
                    return;
                };
                let entry = {
                    let mut slot =
                        self.slot(worker).lock().expect("worker slot lock poisoned");
                    let entry = slot.pending.remove(&id);
                    if let Some(entry) = &entry {
                        if entry.cmd.starts_with("transcribe") {
                            slot.transcribe_in_progress = false;
                        }
                    }
                    entry
                };
                // A response matching no pending entry is dropped silently.
                let Some(entry) = entry else {
                    return;
                };
                let outcome = if response.ok {
                    Ok(response)
                } else {
                    Err(response
                        .error
                        .clone()
                        .unwrap_or_else(|| WorkerFault::user("worker error")))
                };
                let _ = entry.sender.try_send(outcome);
            }
        }
    }

    fn handle_exit(&self, worker: WorkerKind, generation: u64) {
        let (stopping, crash_count, pending) = {
            let mut slot = self.slot(worker).lock().expect("worker slot lock poisoned");
            if slot.generation != generation {
                return;
            }
            slot.child = None;
            slot.stdin = None;
            slot.healthy = false;
            slot.transcribe_in_progress = false;
            let stopping = slot.stopping;
            if !stopping {
                slot.crash_count += 1;
            }
            (stopping, slot.crash_count, std::mem::take(&mut slot.pending))
        };

        let reason = format!("{worker} process exited");
        self.flush_pending(worker, pending, WorkerFault::retryable(reason.clone()));
        self.log("warn", "worker.exited", &format!("worker={worker}"));
        self.inner.signals.publish(WorkerSignal::Exited {
            worker,
            reason,
        });

        if stopping {
            return;
        }

        let delay = restart_backoff(crash_count);
        let supervisor = self.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            {
                let slot = supervisor
                    .slot(worker)
                    .lock()
                    .expect("worker slot lock poisoned");
                if slot.generation != generation || slot.child.is_some() || slot.stopping {
                    return;
                }
            }
            if let Err(fault) = supervisor.start(worker) {
                supervisor.log(
                    "error",
                    "worker.restart_failed",
                    &format!("worker={worker} error={}", fault.message),
                );
            }
        });
    }

    fn flush_pending(
        &self,
        worker: WorkerKind,
        pending: HashMap<String, PendingEntry>,
        fault: WorkerFault,
    ) {
        for (id, entry) in pending {
            self.log(
                "warn",
                "worker.pending_flushed",
                &format!("worker={worker} id={id} trace_id={}", entry.trace_id),
            );
            let _ = entry.sender.try_send(Err(fault.clone()));
        }
    }
}

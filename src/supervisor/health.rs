use crate::protocol::WorkerKind;
use crate::supervisor::WorkerSupervisor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often the waiting monitor checks the stop flag between rounds.
const STOP_POLL: Duration = Duration::from_millis(250);

/// Periodically ping every running worker. A failed or timed-out ping marks
/// the worker unhealthy, flushes its pending requests and kills the process;
/// the supervisor's exit path then restarts it with backoff. A zero interval
/// disables health checking.
pub fn start_health_monitor(
    supervisor: WorkerSupervisor,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let interval = Duration::from_millis(supervisor.settings().health_check_interval_ms);
    thread::spawn(move || {
        if interval.is_zero() {
            return;
        }
        let mut next_round = Instant::now() + interval;
        loop {
            // Wait out the interval, waking often enough to honor a stop
            // request promptly.
            loop {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let remaining = next_round.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                thread::sleep(remaining.min(STOP_POLL));
            }
            next_round = Instant::now() + interval;

            for worker in WorkerKind::ALL {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                if !supervisor.is_running(worker) {
                    continue;
                }
                if let Err(fault) = supervisor.ping(worker) {
                    supervisor.mark_unhealthy(
                        worker,
                        &format!("health check failed: {}", fault.message),
                    );
                }
            }
        }
    })
}

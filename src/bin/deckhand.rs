//! Orchestrator daemon: spawns the worker fleet, hydrates recoverable jobs
//! and serves the control plane until a stop signal file appears.

use deckhand::cache::CacheStore;
use deckhand::config::{bootstrap_state_root, default_state_root_path, Settings, StatePaths};
use deckhand::control::ControlPlane;
use deckhand::engine::{JobEngine, JobJournal};
use deckhand::protocol::WorkerKind;
use deckhand::recipes::RecipeCatalog;
use deckhand::shared::append_log_event;
use deckhand::supervisor::{start_health_monitor, WorkerSupervisor};
use deckhand::templates::{default_recipe_catalog, default_settings};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn seed_default_documents(paths: &StatePaths) -> Result<(), Box<dyn std::error::Error>> {
    if !paths.settings_file().exists() {
        let body = serde_yaml::to_string(&default_settings())?;
        fs::write(paths.settings_file(), body)?;
    }
    if !paths.catalog_path().exists() {
        let body = serde_yaml::to_string(&default_recipe_catalog())?;
        fs::write(paths.catalog_path(), body)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = match std::env::args().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => default_state_root_path()?,
    };
    let paths = StatePaths::new(root);
    bootstrap_state_root(&paths)?;
    seed_default_documents(&paths)?;

    let settings = Settings::from_path(&paths.settings_file())?;
    let catalog = RecipeCatalog::load(&paths.catalog_path())?;
    let log_path = paths.orchestrator_log_path();

    let supervisor = WorkerSupervisor::new(settings, &log_path);
    for worker in WorkerKind::ALL {
        supervisor.start(worker)?;
    }
    let stop = Arc::new(AtomicBool::new(false));
    let health = start_health_monitor(supervisor.clone(), stop.clone());

    let engine = JobEngine::new(
        Arc::new(supervisor.clone()),
        JobJournal::new(paths.jobs_log_path()),
        CacheStore::open(paths.cache_store_path())?,
        &log_path,
    );
    let resumed = engine.hydrate()?;
    append_log_event(
        &log_path,
        "info",
        "daemon.started",
        &format!("pid={} resumed_jobs={resumed}", std::process::id()),
    );

    // The front-end transport attaches here; the daemon only has to keep
    // the control plane alive until it is told to stop.
    let _control = ControlPlane::new(engine, catalog, paths.clone())?;

    let stop_path = paths.stop_signal_path();
    let _ = fs::remove_file(&stop_path);
    while !stop_path.exists() {
        thread::sleep(Duration::from_millis(500));
    }

    stop.store(true, Ordering::Relaxed);
    supervisor.stop_all();
    let _ = health.join();
    let _ = fs::remove_file(&stop_path);
    append_log_event(&log_path, "info", "daemon.stopped", "stopped cleanly");
    Ok(())
}

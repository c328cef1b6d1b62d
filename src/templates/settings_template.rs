use crate::config::{Settings, WorkerSpawnConfig};
use crate::protocol::WorkerKind;
use std::collections::BTreeMap;

fn python_worker(module: &str) -> WorkerSpawnConfig {
    WorkerSpawnConfig {
        command: "python3".to_string(),
        args: vec!["-u".to_string(), "-m".to_string(), module.to_string()],
        cwd: None,
        env: BTreeMap::from([("PYTHONUNBUFFERED".to_string(), "1".to_string())]),
    }
}

/// Spawn configuration matching the production worker deployment: one
/// long-lived Python process per role, line-delimited JSON over stdio.
pub fn default_settings() -> Settings {
    Settings {
        workers: BTreeMap::from([
            (WorkerKind::Resolve, python_worker("helper.resolve_worker")),
            (WorkerKind::Media, python_worker("helper.media_worker")),
            (WorkerKind::Platform, python_worker("helper.platform_worker")),
        ]),
        health_check_interval_ms: 15_000,
        ping_timeout_ms: 3_000,
    }
}

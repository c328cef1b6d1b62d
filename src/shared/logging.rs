use crate::shared::fs_atomic::append_line;
use std::path::Path;

/// Append a structured line to the orchestrator log. Logging is best-effort:
/// a failure to log never fails the operation being logged.
pub fn append_log_event(log_path: &Path, level: &str, event: &str, message: &str) {
    let payload = serde_json::json!({
        "timestamp": crate::shared::now_millis(),
        "level": level,
        "event": event,
        "message": message,
    });
    let Ok(line) = serde_json::to_string(&payload) else {
        return;
    };
    let _ = append_line(log_path, &line);
}

//! Line-delimited JSON worker used by integration tests and local smoke
//! runs. Speaks the same wire protocol as the production workers: one
//! request object per stdin line, one response or event object per stdout
//! line, and always answers `ping`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

#[derive(Debug, Default)]
struct Options {
    /// Commands that always reply `ok: false` with a transient error.
    fail_cmds: Vec<String>,
    /// Commands whose first request fails transiently, later ones succeed.
    fail_once_cmds: Vec<String>,
    /// Commands that never get a reply.
    hang_cmds: Vec<String>,
    /// Emit a progress event before every response.
    event_before_reply: bool,
}

fn parse_options() -> Options {
    let mut options = Options::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fail-cmd" => options.fail_cmds.extend(args.next()),
            "--fail-once-cmd" => options.fail_once_cmds.extend(args.next()),
            "--hang-cmd" => options.hang_cmds.extend(args.next()),
            "--event-before-reply" => options.event_before_reply = true,
            _ => {}
        }
    }
    options
}

fn transcribe_folder(payload: &Value) -> Result<Value, String> {
    let Some(folder_path) = payload.get("folder_path").and_then(Value::as_str) else {
        return Err("folder_path is required".to_string());
    };
    let root = Path::new(folder_path);
    if !root.is_dir() {
        return Err(format!(
            "folder_path does not exist or is not a directory: {folder_path}"
        ));
    }

    let mut outputs = Vec::new();
    let mut entries: Vec<_> = fs::read_dir(root)
        .map_err(|err| err.to_string())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) != Some("txt"))
        .collect();
    entries.sort();
    for source in entries {
        let output = source.with_extension("txt");
        fs::write(&output, "transcript\n").map_err(|err| err.to_string())?;
        outputs.push(json!({
            "file": source.display().to_string(),
            "output_paths": [output.display().to_string()],
            "status": "done",
        }));
    }

    Ok(json!({
        "folder_path": folder_path,
        "files_processed": outputs.len(),
        "outputs": outputs,
        "failures": [],
    }))
}

fn handle(cmd: &str, payload: &Value) -> Result<Value, String> {
    match cmd {
        "ping" => Ok(json!({"status": "ok"})),
        "transcribe" | "transcribe_folder" => transcribe_folder(payload),
        "test_cuda" => Ok(json!({"cuda": false})),
        "connect" => Ok(json!({
            "connected": true,
            "project": payload.get("project").cloned().unwrap_or(Value::String("Untitled".to_string())),
        })),
        "context" => Ok(json!({"project": "Untitled", "timeline": null})),
        "lp_base_export" => Ok(json!({"result": true, "jobs": [["Timeline 1", 1]]})),
        "start_render" => Ok(json!({"result": true})),
        "stop_render" => Ok(json!({"result": true})),
        "create_project_bins" => Ok(json!({"result": true})),
        "add_marker" | "update_text" | "goto" | "spellcheck" => Ok(json!({"result": true})),
        "leaderpass_auth" => Ok(json!({"authenticated": true})),
        "leaderpass_upload" => Ok(json!({
            "uploaded": true,
            "file_path": payload.get("file_path").cloned().unwrap_or(Value::Null),
        })),
        "shutdown" => Ok(json!({"result": true})),
        other => Err(format!("unknown command: {other}")),
    }
}

fn main() {
    let options = parse_options();
    let mut seen: HashMap<String, u32> = HashMap::new();
    let stdin = io::stdin();
    let stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(err) => {
                emit(
                    &stdout,
                    &json!({"id": null, "ok": false, "data": null, "error": format!("invalid request: {err}")}),
                );
                continue;
            }
        };
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let trace_id = request.get("trace_id").cloned().unwrap_or(Value::Null);
        let cmd = request
            .get("cmd")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if options.hang_cmds.contains(&cmd) {
            continue;
        }
        let attempts = seen.entry(cmd.clone()).or_insert(0);
        *attempts += 1;
        let fail = options.fail_cmds.contains(&cmd)
            || (options.fail_once_cmds.contains(&cmd) && *attempts == 1);

        if options.event_before_reply {
            emit(
                &stdout,
                &json!({
                    "event": "progress",
                    "trace_id": trace_id,
                    "code": "STEP_PROGRESS",
                    "data": {"cmd": cmd},
                    "error": null,
                    "message": null,
                    "metrics": {},
                }),
            );
        }

        let response = if fail {
            json!({
                "id": id,
                "ok": false,
                "data": null,
                "error": {"category": "retryable", "message": "temporary"},
                "trace_id": trace_id,
            })
        } else {
            match handle(&cmd, &request) {
                Ok(data) => json!({
                    "id": id,
                    "ok": true,
                    "data": data,
                    "error": null,
                    "trace_id": trace_id,
                    "metrics": {"worker_latency_ms": 1, "cmd": cmd},
                }),
                Err(error) => json!({
                    "id": id,
                    "ok": false,
                    "data": null,
                    "error": error,
                    "trace_id": trace_id,
                }),
            }
        };
        emit(&stdout, &response);
        if cmd == "shutdown" {
            break;
        }
    }
}

fn emit(stdout: &io::Stdout, value: &Value) {
    let mut handle = stdout.lock();
    let _ = writeln!(handle, "{value}");
    let _ = handle.flush();
}

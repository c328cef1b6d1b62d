use crate::protocol::WorkerKind;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

/// Payload keys recognized as carrying input paths. Only these contribute
/// source signatures; any other payload value hashes as plain text.
const SOURCE_PAYLOAD_KEYS: &[&str] = &["folder_path", "path", "file", "source"];

const RESOLVE_ENGINE_ID: &str = "resolve-scripting-api";

/// Render a value as canonical JSON: object keys sorted recursively, array
/// order preserved. Identical inputs always render byte-identically.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> = map
                .iter()
                .map(|(key, value)| (key, canonical_json(value)))
                .collect();
            let body = sorted
                .iter()
                .map(|(key, rendered)| format!("{}:{rendered}", Value::String((*key).clone())))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items
                .iter()
                .map(canonical_json)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

fn content_checksum(path: &Path) -> std::io::Result<String> {
    let content = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}

fn file_signature(path: &Path) -> std::io::Result<Value> {
    let metadata = fs::metadata(path)?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(json!({
        "absolute_path": path.display().to_string(),
        "size": metadata.len(),
        "mtime": mtime,
        "content_checksum": content_checksum(path)?,
    }))
}

fn directory_signature(path: &Path) -> std::io::Result<Value> {
    let mut files = Vec::new();
    collect_files(path, &mut files)?;
    files.sort();
    let mut signatures = Vec::with_capacity(files.len());
    for file in files {
        signatures.push(file_signature(&file)?);
    }
    Ok(json!({
        "absolute_path": path.display().to_string(),
        "directory": true,
        "files": signatures,
    }))
}

fn collect_files(dir: &Path, into: &mut Vec<std::path::PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, into)?;
        } else if path.is_file() {
            into.push(path);
        }
    }
    Ok(())
}

/// Signature of one payload-referenced path. Missing paths still contribute
/// distinguishable input instead of failing the fingerprint.
pub fn source_signature(raw_path: &str) -> std::io::Result<Value> {
    let path = Path::new(raw_path);
    if path.is_dir() {
        directory_signature(path)
    } else if path.is_file() {
        file_signature(path)
    } else {
        Ok(json!({
            "absolute_path": raw_path,
            "exists": false,
        }))
    }
}

fn detect_transcoder_version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| {
        Command::new("ffmpeg")
            .arg("-version")
            .output()
            .ok()
            .and_then(|output| {
                let text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.lines().next().map(str::trim).map(str::to_string)
            })
            .filter(|line| !line.is_empty())
            .unwrap_or_else(|| "unavailable".to_string())
    })
}

/// Tool versions participating in a step fingerprint: the detected media
/// transcoder for media steps, the engine identifier for resolve steps, plus
/// whatever the recipe declared by policy (declared entries win).
pub fn tool_versions_for(
    worker: WorkerKind,
    declared: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut versions = BTreeMap::new();
    match worker {
        WorkerKind::Media => {
            versions.insert(
                "transcoder".to_string(),
                detect_transcoder_version().to_string(),
            );
        }
        WorkerKind::Resolve => {
            versions.insert("engine".to_string(), RESOLVE_ENGINE_ID.to_string());
        }
        WorkerKind::Platform => {}
    }
    for (name, version) in declared {
        versions.insert(name.clone(), version.clone());
    }
    versions
}

/// Content fingerprint of a step: SHA-256 over the canonical serialization
/// of command, full interpolated payload, source signatures and tool
/// versions. Stable across runs on the same inputs.
pub fn step_fingerprint(
    cmd: &str,
    payload: &Map<String, Value>,
    tool_versions: &BTreeMap<String, String>,
) -> std::io::Result<String> {
    let mut sources = Map::new();
    for key in SOURCE_PAYLOAD_KEYS {
        if let Some(Value::String(raw_path)) = payload.get(*key) {
            sources.insert(key.to_string(), source_signature(raw_path)?);
        }
    }

    let document = json!({
        "cmd": cmd,
        "payload": Value::Object(payload.clone()),
        "sources": Value::Object(sources),
        "tool_versions": tool_versions,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&document).as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

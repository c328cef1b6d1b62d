use crate::protocol::router::{command_owner, WorkerKind};
use crate::shared::{next_opaque_id, now_millis, WorkerFault};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RESERVED_ENVELOPE_FIELDS: &[&str] = &["id", "worker", "cmd", "payload", "trace_id"];

/// Canonical request crossing the orchestrator → worker boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: String,
    pub worker: WorkerKind,
    pub cmd: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub trace_id: String,
}

/// Terminal reply for one request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerFault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,
}

/// Fan-out notification carrying no request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    Response(ResponseEnvelope),
    Event(EventEnvelope),
}

/// Canonicalize a raw front-end payload into a request envelope.
///
/// Accepts a bare command name or a mapping; any top-level field outside the
/// reserved set folds into the payload, winning over an explicit `payload`
/// entry of the same name. Fresh opaque ids are minted for `id` and
/// `trace_id` when the caller did not supply them.
pub fn to_request_envelope(
    raw: &Value,
    worker_hint: Option<WorkerKind>,
) -> Result<RequestEnvelope, WorkerFault> {
    let (cmd, raw_map) = match raw {
        Value::String(cmd) => (cmd.clone(), Map::new()),
        Value::Object(map) => {
            let cmd = map
                .get("cmd")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (cmd, map.clone())
        }
        _ => {
            return Err(WorkerFault::user(
                "request must be a command name or a mapping",
            ))
        }
    };

    let declared_worker = match raw_map.get("worker") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw_worker)) => Some(
            WorkerKind::parse(raw_worker)
                .map_err(|err| WorkerFault::user(format!("invalid `worker`: {err}")))?,
        ),
        Some(_) => return Err(WorkerFault::user("`worker` must be a string")),
    };

    let worker = worker_hint
        .or(declared_worker)
        .or_else(|| command_owner(&cmd))
        .ok_or_else(|| {
            WorkerFault::user(format!("unable to determine worker for command `{cmd}`"))
        })?;

    let mut payload = match raw_map.get("payload") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(WorkerFault::user("`payload` must be a mapping")),
    };
    for (key, value) in &raw_map {
        if RESERVED_ENVELOPE_FIELDS.contains(&key.as_str()) {
            continue;
        }
        payload.insert(key.clone(), value.clone());
    }

    let id = raw_map
        .get("id")
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| next_opaque_id("req"));
    let trace_id = raw_map
        .get("trace_id")
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| next_opaque_id("trace"));

    Ok(RequestEnvelope {
        id,
        worker,
        cmd,
        payload,
        trace_id,
    })
}

/// Serialize the envelope as one wire line: payload fields flattened at the
/// top level next to `id`/`cmd`/`trace_id`. Workers predate the nested
/// payload form and read their arguments from the top level.
pub fn to_wire_line(env: &RequestEnvelope) -> String {
    let mut wire = env.payload.clone();
    wire.insert("id".to_string(), Value::String(env.id.clone()));
    wire.insert("cmd".to_string(), Value::String(env.cmd.clone()));
    wire.insert("trace_id".to_string(), Value::String(env.trace_id.clone()));
    Value::Object(wire).to_string()
}

/// Classify one raw message received from a worker.
///
/// A message carrying an `event` field is a fan-out event and consumes no
/// pending id. Otherwise it is a response: `ok: false` rejects with the
/// normalized fault, and a success without `data` acts as its own data
/// object (legacy wire). With `started_at_ms` the normalizer attaches
/// `metrics.latency_ms`.
pub fn normalize_response(
    raw: &Value,
    expected_id: Option<&str>,
    started_at_ms: Option<i64>,
) -> WorkerReply {
    if let Some(event) = raw.get("event").and_then(Value::as_str) {
        return WorkerReply::Event(EventEnvelope {
            event: event.to_string(),
            trace_id: raw
                .get("trace_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            code: raw.get("code").and_then(Value::as_str).map(str::to_string),
            data: raw.get("data").cloned().filter(|v| !v.is_null()),
            error: raw
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
            message: raw
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            metrics: raw
                .get("metrics")
                .and_then(Value::as_object)
                .cloned(),
        });
    }

    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| expected_id.map(str::to_string));
    let mut metrics = raw.get("metrics").and_then(Value::as_object).cloned();
    if let Some(started_at) = started_at_ms {
        metrics
            .get_or_insert_with(Map::new)
            .insert(
                "latency_ms".to_string(),
                Value::from(now_millis().saturating_sub(started_at)),
            );
    }

    let ok = raw.get("ok").and_then(Value::as_bool).unwrap_or(true);
    if !ok {
        let error = raw.get("error").cloned().unwrap_or(Value::Null);
        return WorkerReply::Response(ResponseEnvelope {
            id,
            ok: false,
            data: None,
            error: Some(WorkerFault::from_wire(&error)),
            metrics,
        });
    }

    let data = match raw.get("data") {
        Some(data) if !data.is_null() => data.clone(),
        _ => raw.clone(),
    };
    WorkerReply::Response(ResponseEnvelope {
        id,
        ok: true,
        data: Some(data),
        error: None,
        metrics,
    })
}

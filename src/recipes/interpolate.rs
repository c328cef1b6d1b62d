use serde_json::{Map, Value};

/// Interpolate `${...}` references in a value tree against a context.
///
/// A string that is exactly one placeholder substitutes by value, keeping the
/// type of the resolved leaf. A string with embedded placeholders substitutes
/// by string conversion. Missing paths resolve to nothing: the value form
/// drops the mapping entry (or yields null inside arrays and at the top
/// level), the embedded form renders as the empty string. The rewrite
/// recurses into arrays and mappings.
///
/// Resolved leaves are interpolated in turn, so a context value that is
/// itself a placeholder chases through to the final leaf. A reference cycle
/// is unresolvable and counts as missing. Both rules keep the rewrite
/// idempotent for a fixed context.
pub fn interpolate(value: &Value, ctx: &Value) -> Value {
    interpolate_value(value, ctx, &mut Vec::new()).unwrap_or(Value::Null)
}

/// Interpolate a template that must produce a mapping (step payloads).
pub fn interpolate_map(template: &Value, ctx: &Value) -> Map<String, Value> {
    match interpolate(template, ctx) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn interpolate_value(value: &Value, ctx: &Value, active: &mut Vec<String>) -> Option<Value> {
    match value {
        Value::String(text) => interpolate_string(text, ctx, active),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, ctx, active).unwrap_or(Value::Null))
                .collect(),
        )),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, entry) in map {
                if let Some(resolved) = interpolate_value(entry, ctx, active) {
                    out.insert(key.clone(), resolved);
                }
            }
            Some(Value::Object(out))
        }
        other => Some(other.clone()),
    }
}

fn interpolate_string(text: &str, ctx: &Value, active: &mut Vec<String>) -> Option<Value> {
    if let Some(path) = whole_placeholder(text) {
        return resolve_path(ctx, path, active);
    }
    if !text.contains("${") {
        return Some(Value::String(text.to_string()));
    }

    let mut rendered = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("${") {
        rendered.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find('}') else {
            // Unclosed placeholder stays literal.
            rendered.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let path = &after_open[..close];
        if let Some(resolved) = resolve_path(ctx, path, active) {
            rendered.push_str(&stringify_leaf(&resolved));
        }
        rest = &after_open[close + 1..];
    }
    rendered.push_str(rest);
    Some(Value::String(rendered))
}

fn whole_placeholder(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains("${") || inner.contains('}') {
        return None;
    }
    Some(inner)
}

/// Look a `.`-separated path up in the context, then interpolate whatever it
/// names. `active` holds the paths currently being resolved: re-entering one
/// is a reference cycle, which no assignment of values can satisfy, so it
/// resolves like a missing path.
fn resolve_path(ctx: &Value, path: &str, active: &mut Vec<String>) -> Option<Value> {
    if active.iter().any(|entry| entry == path) {
        return None;
    }

    let mut current = ctx;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    active.push(path.to_string());
    let resolved = interpolate_value(&current.clone(), ctx, active);
    active.pop();
    resolved
}

fn stringify_leaf(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

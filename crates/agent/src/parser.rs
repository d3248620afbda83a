//! Extraction of tool calls from generated text.
//!
//! Models emit tool calls as fenced JSON blocks. Each block may hold one
//! object or an array of objects; every object needs a `tool` key. Raw line
//! breaks inside string values are escaped before decoding, and a block that
//! still fails to decode is skipped without affecting its siblings.

use std::sync::LazyLock;

use kestrel_core::tool::{Params, ToolCall};
use regex_lite::Regex;
use serde_json::Value;
use tracing::debug;

/// Keys never salvaged into an implicit parameter mapping.
const RESERVED_KEYS: &[&str] = &["tool", "params", "thought", "explanation"];

static RE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z]*)[^\n]*\n(.*?)```").expect("fence pattern is valid")
});

/// Every tool call found in `text`, in order of appearance.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for block in fenced_blocks(text) {
        let repaired = escape_control_in_strings(block);
        match serde_json::from_str::<Value>(&repaired) {
            Ok(Value::Array(items)) => calls.extend(items.into_iter().filter_map(to_call)),
            Ok(value) => calls.extend(to_call(value)),
            Err(e) => debug!(error = %e, "Skipping undecodable tool block"),
        }
    }
    calls
}

/// Bodies of ```json fences, plus bare fences whose body looks like JSON.
fn fenced_blocks(text: &str) -> Vec<&str> {
    RE_FENCE
        .captures_iter(text)
        .filter_map(|caps| {
            let lang = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2)?.as_str().trim();
            let json_like = body.starts_with('{') || body.starts_with('[');
            match lang.to_ascii_lowercase().as_str() {
                "json" => Some(body),
                "" if json_like => Some(body),
                _ => None,
            }
        })
        .collect()
}

/// Escape literal newlines, carriage returns and tabs inside string values.
fn escape_control_in_strings(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in raw.chars() {
        if in_string {
            match c {
                _ if escaped => {
                    escaped = false;
                    out.push(c);
                }
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

fn to_call(value: Value) -> Option<ToolCall> {
    let Value::Object(mut obj) = value else {
        return None;
    };
    let name = match obj.get("tool") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            debug!("Skipping tool block without a `tool` key");
            return None;
        }
    };

    let params = match obj.remove("params") {
        Some(Value::Object(params)) => params,
        _ => obj
            .into_iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .collect::<Params>(),
    };
    Some(ToolCall::new(name, params))
}

use crate::util::parse_bool_flag;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{IsTerminal, Write};

const DEFAULT_LOG_PATH: &str = "/tmp/relay-debug.log";
const DEBUG_PAYLOAD_ENV: &str = "RELAY_DEBUG_PAYLOAD";
const DEBUG_TURNS_ENV: &str = "RELAY_DEBUG_TURNS";
const LOG_PATH_ENV: &str = "RELAY_LOG_PATH";

pub fn debug_payload_enabled() -> bool {
    env_flag(DEBUG_PAYLOAD_ENV)
}

pub fn debug_turns_enabled() -> bool {
    env_flag(DEBUG_TURNS_ENV)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .and_then(parse_bool_flag)
        .unwrap_or(false)
}

pub fn emit_debug_payload(request_url: &str, payload: &Value) {
    let formatted_payload = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "<payload serialization error>".to_string());
    let message =
        format!("RELAY DEBUG payload_request url={request_url}\npayload:\n{formatted_payload}\n");
    emit_log_message(&message);
}

pub fn emit_sse_parse_error(record: &str, parse_error: &serde_json::Error) {
    let message = format!("RELAY ERROR sse_parse_failed error={parse_error}\ndata:\n{record}\n");
    emit_log_message(&message);
}

/// Phase transitions and finish reasons, only when `RELAY_DEBUG_TURNS` is set.
pub fn emit_turn_event(conversation_id: &str, event: &str) {
    if debug_turns_enabled() {
        emit_log_message(&format!(
            "RELAY DEBUG turn conversation={conversation_id} {event}\n"
        ));
    }
}

pub fn emit_turn_failure(conversation_id: &str, error: &anyhow::Error) {
    emit_log_message(&format!(
        "RELAY ERROR turn_aborted conversation={conversation_id} error={error:#}\n"
    ));
}

fn emit_log_message(message: &str) {
    if let Some(path) = resolve_log_path() {
        if append_log_file(&path, message).is_ok() {
            return;
        }
    }

    eprintln!("{message}");
}

fn resolve_log_path() -> Option<String> {
    std::env::var(LOG_PATH_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            if std::io::stderr().is_terminal() {
                Some(DEFAULT_LOG_PATH.to_string())
            } else {
                None
            }
        })
}

fn append_log_file(path: &str, message: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(message.as_bytes())
}

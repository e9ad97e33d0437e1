use crate::error::TurnError;
use crate::types::Message;
use anyhow::Result;
use serde_json::{Map, Value};

/// Extracts the tool name and argument object from a completed assistant
/// message. Nothing is executed unless both are well formed.
pub(super) fn validate_tool_call(message: Option<&Message>) -> Result<(String, Map<String, Value>)> {
    let Some(call) = message.and_then(|m| m.function_call.as_ref()) else {
        return Err(TurnError::MissingToolCall {
            missing: "a function_call",
        }
        .into());
    };

    let Some(name) = call.resolved_name() else {
        return Err(TurnError::MissingToolCall { missing: "a name" }.into());
    };

    let arguments = parse_tool_arguments(name, &call.arguments)?;
    Ok((name.to_string(), arguments))
}

pub(super) fn parse_tool_arguments(tool: &str, raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(other) => Err(TurnError::MalformedToolArguments {
            tool: tool.to_string(),
            reason: format!("expected an object, got {}", json_kind(&other)),
        }
        .into()),
        Err(error) => Err(TurnError::MalformedToolArguments {
            tool: tool.to_string(),
            reason: error.to_string(),
        }
        .into()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

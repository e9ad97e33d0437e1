use super::Role;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One `data:` record of the completion stream.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl CompletionChunk {
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub delta: MessageDelta,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Partial message carried by a single stream fragment.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MessageDelta {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub function_call: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct FunctionCallDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    FunctionCall,
    Length,
    ContentFilter,
    #[serde(other)]
    Other,
}

/// One `data:` record of the execution stream.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ExecutionFragment {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub end: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub function_name: String,
    pub session_id: String,
    pub arguments: Map<String, Value>,
}

use thiserror::Error;

/// Reasons a turn stops before reaching a final answer.
///
/// Functions across the crate return `anyhow::Result`; when a failure belongs to
/// one of these kinds the root cause is a `TurnError`, so callers can
/// `downcast_ref::<TurnError>()` to branch on it.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("request to '{url}' failed: {message}")]
    Transport { url: String, message: String },

    #[error("endpoint '{url}' returned HTTP {status}: {detail}")]
    HttpStatus {
        url: String,
        status: u16,
        detail: String,
    },

    #[error("endpoint '{url}' returned no response body")]
    MissingBody { url: String },

    #[error("malformed stream record")]
    MalformedRecord {
        record: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("model requested a tool call without {missing}")]
    MissingToolCall { missing: &'static str },

    #[error("tool arguments for '{tool}' are not a JSON object: {reason}")]
    MalformedToolArguments { tool: String, reason: String },

    #[error("tool-call loop exceeded {max_rounds} rounds")]
    LoopLimitExceeded { max_rounds: usize },

    #[error("turn cancelled")]
    Cancelled,
}

impl TurnError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Returns the `TurnError` at the root of an `anyhow` chain, if any.
pub fn turn_error(error: &anyhow::Error) -> Option<&TurnError> {
    error.chain().find_map(|cause| cause.downcast_ref::<TurnError>())
}

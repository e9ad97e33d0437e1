use super::ConversationManager;
use crate::config::Config;
use crate::history::build_request_messages;
use crate::types::Message;

const DEFAULT_MAX_TOOL_ROUNDS: usize = 16;
const DEFAULT_MAX_RESULT_HISTORY_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnLimits {
    pub max_tool_rounds: usize,
    pub max_result_history_chars: usize,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            max_result_history_chars: DEFAULT_MAX_RESULT_HISTORY_CHARS,
        }
    }
}

impl TurnLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tool_rounds: config.max_tool_rounds.max(1),
            max_result_history_chars: config.max_result_history_chars,
        }
    }
}

impl ConversationManager {
    /// Compacted history for the next completion request.
    pub fn request_messages(&self) -> Vec<Message> {
        build_request_messages(
            &self.conversation.messages,
            self.limits.max_result_history_chars,
        )
    }

    pub(super) fn commit_messages(&mut self) {
        self.committed_len = self.conversation.messages.len();
    }

    /// Drops the message that was still streaming when the turn stopped.
    pub(super) fn rollback_in_flight(&mut self) -> bool {
        if self.conversation.messages.len() <= self.committed_len {
            return false;
        }
        self.conversation.messages.truncate(self.committed_len);
        true
    }
}

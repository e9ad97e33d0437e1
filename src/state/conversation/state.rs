use super::history::TurnLimits;
use crate::api::{CompletionClient, ExecutionClient};
use crate::config::Config;
use crate::store::ConversationStore;
use crate::types::Conversation;
use anyhow::Result;
use std::sync::Arc;

/// Orchestration states of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingCompletion,
    StreamingAssistant,
    DetectedToolCall,
    ExecutingTool,
    StreamingToolResult,
    Done,
}

impl TurnPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingCompletion => "awaiting_completion",
            Self::StreamingAssistant => "streaming_assistant",
            Self::DetectedToolCall => "detected_tool_call",
            Self::ExecutingTool => "executing_tool",
            Self::StreamingToolResult => "streaming_tool_result",
            Self::Done => "done",
        }
    }
}

/// Published to observers while a turn runs, in order.
#[derive(Debug, Clone)]
pub enum ConversationUpdate {
    /// Full conversation after a mutation.
    Snapshot(Arc<Conversation>),
    Phase(TurnPhase),
    TurnComplete,
    TurnFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Index of the user message that opened the turn.
    pub start_index: usize,
    pub tool_rounds: usize,
}

pub struct ConversationManager {
    pub(super) completion: CompletionClient,
    pub(super) execution: ExecutionClient,
    pub(super) store: Arc<dyn ConversationStore>,
    pub(super) conversation: Conversation,
    pub(super) limits: TurnLimits,
    /// Messages below this index belong to completed phases.
    pub(super) committed_len: usize,
}

impl ConversationManager {
    pub fn new(
        config: &Config,
        conversation: Conversation,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self> {
        Ok(Self::from_parts(
            CompletionClient::new(config)?,
            ExecutionClient::new(config)?,
            store,
            conversation,
            TurnLimits::from_config(config),
        ))
    }

    pub fn from_parts(
        completion: CompletionClient,
        execution: ExecutionClient,
        store: Arc<dyn ConversationStore>,
        conversation: Conversation,
        limits: TurnLimits,
    ) -> Self {
        let committed_len = conversation.messages.len();
        Self {
            completion,
            execution,
            store,
            conversation,
            limits,
            committed_len,
        }
    }

    #[cfg(test)]
    pub fn new_mock(
        completion: CompletionClient,
        execution: ExecutionClient,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let conversation =
            Conversation::new("conv-test", "gpt-4-0613", "be brief", 1.0).with_code_interpreter();
        Self::from_parts(
            completion,
            execution,
            store,
            conversation,
            TurnLimits::default(),
        )
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }
}

use super::streaming::emit_stream_update;
use super::tools::validate_tool_call;
use super::{ConversationManager, ConversationUpdate, TurnOutcome, TurnPhase};
use crate::api::logging::emit_turn_failure;
use crate::error::TurnError;
use crate::types::Message;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

impl ConversationManager {
    /// Runs one user turn to completion: streams the answer, executes every
    /// requested tool and feeds its output back until the model stops asking.
    ///
    /// On failure the message that was still streaming is removed, earlier
    /// messages of the turn are kept in memory, and nothing is persisted.
    pub async fn send_message(
        &mut self,
        input: String,
        update_tx: Option<&mpsc::UnboundedSender<ConversationUpdate>>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let start_index = self.conversation.messages.len();
        self.conversation.messages.push(Message::user(input));
        self.commit_messages();
        self.publish_snapshot(update_tx);

        match self.run_turn(start_index, update_tx, cancel).await {
            Ok(outcome) => {
                emit_stream_update(update_tx, ConversationUpdate::TurnComplete);
                Ok(outcome)
            }
            Err(error) => {
                if self.rollback_in_flight() {
                    self.publish_snapshot(update_tx);
                }
                emit_turn_failure(&self.conversation.id, &error);
                emit_stream_update(update_tx, ConversationUpdate::TurnFailed(format!("{error:#}")));
                Err(error)
            }
        }
    }

    async fn run_turn(
        &mut self,
        start_index: usize,
        update_tx: Option<&mpsc::UnboundedSender<ConversationUpdate>>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let mut tool_rounds = 0usize;

        loop {
            self.enter_phase(TurnPhase::AwaitingCompletion, update_tx);
            let request_messages = self.request_messages();

            self.enter_phase(TurnPhase::StreamingAssistant, update_tx);
            let stream = self
                .completion
                .create_stream(&self.conversation, &request_messages, cancel)
                .await?;
            let tool_call_detected = self.stream_assistant(stream, update_tx, cancel).await?;
            self.commit_messages();

            if !tool_call_detected {
                self.enter_phase(TurnPhase::Done, update_tx);
                self.store.save(&self.conversation)?;
                return Ok(TurnOutcome {
                    start_index,
                    tool_rounds,
                });
            }

            self.enter_phase(TurnPhase::DetectedToolCall, update_tx);
            if tool_rounds >= self.limits.max_tool_rounds {
                return Err(TurnError::LoopLimitExceeded {
                    max_rounds: self.limits.max_tool_rounds,
                }
                .into());
            }
            let (tool_name, arguments) = validate_tool_call(self.conversation.last_message())?;
            tool_rounds += 1;

            self.enter_phase(TurnPhase::ExecutingTool, update_tx);
            let request = self.execution.request_for(&tool_name, arguments);
            let stream = self.execution.create_stream(&request, cancel).await?;

            self.enter_phase(TurnPhase::StreamingToolResult, update_tx);
            self.stream_tool_result(&tool_name, stream, update_tx, cancel)
                .await?;
            self.commit_messages();
        }
    }
}

use super::{ConversationManager, ConversationUpdate, TurnPhase};
use crate::api::logging::emit_turn_event;
use crate::api::stream::SseReader;
use crate::api::ByteStream;
use crate::history::{RESULT_BEGIN, RESULT_END};
use crate::state::merge::merge_delta;
use crate::types::{CompletionChunk, ExecutionFragment, Message};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

impl ConversationManager {
    /// Merges the completion stream into a new assistant message and reports
    /// whether any fragment carried a function call.
    pub(super) async fn stream_assistant(
        &mut self,
        stream: ByteStream,
        update_tx: Option<&mpsc::UnboundedSender<ConversationUpdate>>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let mut reader = SseReader::<CompletionChunk>::new(stream).with_cancellation(cancel.clone());
        let mut started = false;
        let mut tool_call_detected = false;

        while let Some(chunk) = reader.next_payload().await? {
            let Some(choice) = chunk.first_choice() else {
                continue;
            };
            if let Some(reason) = choice.finish_reason {
                emit_turn_event(
                    &self.conversation.id,
                    &format!("finish_reason={reason:?}"),
                );
            }

            tool_call_detected |= choice.delta.function_call.is_some();

            if !started {
                self.conversation.messages.push(Message::empty_assistant());
                started = true;
            }
            if let Some(in_flight) = self.conversation.messages.last_mut() {
                merge_delta(in_flight, &choice.delta);
            }
            self.publish_snapshot(update_tx);
        }

        Ok(tool_call_detected)
    }

    /// Accumulates execution output into a `function` message wrapped in
    /// result markers. Stops at an `end` fragment or when the stream runs dry.
    pub(super) async fn stream_tool_result(
        &mut self,
        tool_name: &str,
        stream: ByteStream,
        update_tx: Option<&mpsc::UnboundedSender<ConversationUpdate>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut reader =
            SseReader::<ExecutionFragment>::new(stream).with_cancellation(cancel.clone());
        let mut started = false;

        while let Some(fragment) = reader.next_payload().await? {
            if !started {
                self.conversation
                    .messages
                    .push(Message::function_result(tool_name, RESULT_BEGIN));
                started = true;
            }
            self.append_to_in_flight(&fragment.content);
            self.publish_snapshot(update_tx);

            if fragment.end {
                break;
            }
        }

        if !started {
            self.conversation
                .messages
                .push(Message::function_result(tool_name, RESULT_BEGIN));
        }
        self.append_to_in_flight(RESULT_END);
        self.publish_snapshot(update_tx);
        Ok(())
    }

    fn append_to_in_flight(&mut self, text: &str) {
        if let Some(in_flight) = self.conversation.messages.last_mut() {
            in_flight
                .content
                .get_or_insert_with(String::new)
                .push_str(text);
        }
    }

    pub(super) fn publish_snapshot(
        &self,
        update_tx: Option<&mpsc::UnboundedSender<ConversationUpdate>>,
    ) {
        if update_tx.is_some() {
            emit_stream_update(
                update_tx,
                ConversationUpdate::Snapshot(Arc::new(self.conversation.clone())),
            );
        }
    }

    pub(super) fn enter_phase(
        &self,
        phase: TurnPhase,
        update_tx: Option<&mpsc::UnboundedSender<ConversationUpdate>>,
    ) {
        emit_turn_event(&self.conversation.id, &format!("phase={}", phase.as_str()));
        emit_stream_update(update_tx, ConversationUpdate::Phase(phase));
    }
}

pub(super) fn emit_stream_update(
    update_tx: Option<&mpsc::UnboundedSender<ConversationUpdate>>,
    update: ConversationUpdate,
) {
    if let Some(tx) = update_tx {
        let _ = tx.send(update);
    }
}

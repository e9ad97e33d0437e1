use super::*;
use crate::api::client::MockStreamProducer;
use crate::api::mock_client::{completion_record, execution_record, MockApiClient};
use crate::api::{ByteStream, CompletionClient, ExecutionClient};
use crate::error::{turn_error, TurnError};
use crate::store::MemoryStore;
use crate::types::{Message, Role};
use anyhow::Result;
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DONE: &str = "data: [DONE]";

struct Harness {
    manager: ConversationManager,
    completions: MockApiClient,
    executions: MockApiClient,
    store: Arc<MemoryStore>,
}

fn harness(completion_rounds: Vec<Vec<String>>, execution_rounds: Vec<Vec<String>>) -> Harness {
    harness_with_limits(completion_rounds, execution_rounds, TurnLimits::default())
}

fn harness_with_limits(
    completion_rounds: Vec<Vec<String>>,
    execution_rounds: Vec<Vec<String>>,
    limits: TurnLimits,
) -> Harness {
    let completions = MockApiClient::new(completion_rounds);
    let executions = MockApiClient::new(execution_rounds);
    let store = Arc::new(MemoryStore::new());
    let mut manager = ConversationManager::new_mock(
        CompletionClient::new_mock(Arc::new(completions.clone())),
        ExecutionClient::new_mock(Arc::new(executions.clone()), "aaa"),
        store.clone(),
    );
    manager.limits = limits;
    Harness {
        manager,
        completions,
        executions,
        store,
    }
}

fn text_round(chunks: &[&str]) -> Vec<String> {
    let mut records: Vec<String> = chunks
        .iter()
        .map(|chunk| completion_record(json!({ "content": chunk }), None))
        .collect();
    records.push(completion_record(json!({}), Some("stop")));
    records.push(DONE.to_string());
    records
}

fn tool_call_round(name: &str, argument_chunks: &[&str]) -> Vec<String> {
    let mut records = vec![completion_record(
        json!({ "role": "assistant", "content": null, "function_call": { "name": name, "arguments": "" } }),
        None,
    )];
    records.extend(argument_chunks.iter().map(|chunk| {
        completion_record(json!({ "function_call": { "arguments": chunk } }), None)
    }));
    records.push(completion_record(json!({}), Some("function_call")));
    records.push(DONE.to_string());
    records
}

fn execution_round(chunks: &[&str]) -> Vec<String> {
    let mut records: Vec<String> = chunks
        .iter()
        .map(|chunk| execution_record(chunk, false, "aaa"))
        .collect();
    records.push(execution_record("", true, "aaa"));
    records
}

fn drain_updates(rx: &mut mpsc::UnboundedReceiver<ConversationUpdate>) -> Vec<ConversationUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

fn phases(updates: &[ConversationUpdate]) -> Vec<TurnPhase> {
    updates
        .iter()
        .filter_map(|update| match update {
            ConversationUpdate::Phase(phase) => Some(*phase),
            _ => None,
        })
        .collect()
}

fn request_roles(request: &Value) -> Vec<String> {
    request["messages"]
        .as_array()
        .map(|messages| {
            messages
                .iter()
                .map(|m| m["role"].as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn test_conversation_module_structure() {
    let _ = std::any::TypeId::of::<ConversationManager>();
    let _ = std::any::TypeId::of::<ConversationUpdate>();
    let _ = std::any::TypeId::of::<TurnPhase>();

    assert!(Path::new("src/state/conversation/state.rs").exists());
    assert!(Path::new("src/state/conversation/core.rs").exists());
    assert!(Path::new("src/state/conversation/tools.rs").exists());
    assert!(Path::new("src/state/conversation/streaming.rs").exists());
    assert!(Path::new("src/state/conversation/history.rs").exists());
}

#[test]
fn test_validate_tool_call_requires_name_and_object() {
    let mut message = Message::empty_assistant();
    let error = validate_tool_call(Some(&message)).expect_err("no call");
    assert!(matches!(
        turn_error(&error),
        Some(TurnError::MissingToolCall { .. })
    ));

    message.function_call = Some(crate::types::FunctionCall {
        name: Some("  ".to_string()),
        arguments: "{}".to_string(),
    });
    let error = validate_tool_call(Some(&message)).expect_err("blank name");
    assert!(matches!(
        turn_error(&error),
        Some(TurnError::MissingToolCall { missing: "a name" })
    ));

    let error = parse_tool_arguments("run_code", "[1,2]").expect_err("array");
    assert!(error.to_string().contains("got an array"));

    let arguments =
        parse_tool_arguments("run_code", r#"{"code":"print(1)"}"#).expect("object arguments");
    assert_eq!(arguments["code"], "print(1)");
}

#[tokio::test]
async fn test_plain_answer_is_persisted_once() -> Result<()> {
    let Harness {
        mut manager,
        completions,
        executions,
        store,
    } = harness(vec![text_round(&["Hel", "lo", "!"])], vec![]);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = manager
        .send_message("hi".to_string(), Some(&tx), &CancellationToken::new())
        .await?;

    assert_eq!(outcome, TurnOutcome { start_index: 0, tool_rounds: 0 });
    let messages = &manager.conversation().messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1], Message::assistant_text("Hello!"));
    assert!(executions.requests().is_empty());
    assert_eq!(completions.requests().len(), 1);
    assert_eq!(store.save_count(), 1);
    assert_eq!(store.get("conv-test").as_ref(), Some(manager.conversation()));

    let updates = drain_updates(&mut rx);
    assert_eq!(
        phases(&updates),
        vec![
            TurnPhase::AwaitingCompletion,
            TurnPhase::StreamingAssistant,
            TurnPhase::Done
        ]
    );
    assert!(matches!(updates.last(), Some(ConversationUpdate::TurnComplete)));
    Ok(())
}

#[tokio::test]
async fn test_shell_round_trip_feeds_result_into_next_request() -> Result<()> {
    let Harness {
        mut manager,
        completions,
        executions,
        store,
    } = harness(
        vec![
            tool_call_round("run_shell", &["{\"command\":", "\"ls -la\"}"]),
            text_round(&["Two files."]),
        ],
        vec![execution_round(&["a.txt\n", "b.txt\n"])],
    );
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = manager
        .send_message("list files".to_string(), Some(&tx), &CancellationToken::new())
        .await?;
    assert_eq!(outcome.tool_rounds, 1);

    let execute_requests = executions.requests();
    assert_eq!(execute_requests.len(), 1);
    assert_eq!(
        execute_requests[0],
        json!({
            "functionName": "run_shell",
            "sessionId": "aaa",
            "arguments": { "command": "ls -la" }
        })
    );

    let messages = &manager.conversation().messages;
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, None);
    let call = messages[1].function_call.as_ref().expect("function call");
    assert_eq!(call.name.as_deref(), Some("run_shell"));
    assert_eq!(call.arguments, r#"{"command":"ls -la"}"#);
    assert_eq!(
        messages[2],
        Message::function_result("run_shell", "<execute_result>a.txt\nb.txt\n</execute_result>")
    );
    assert_eq!(messages[3].text(), "Two files.");

    let completion_requests = completions.requests();
    assert_eq!(completion_requests.len(), 2);
    assert_eq!(
        request_roles(&completion_requests[1]),
        vec!["system", "user", "assistant", "user"]
    );
    let compacted = completion_requests[1]["messages"][2]["content"]
        .as_str()
        .unwrap_or_default();
    assert!(compacted.contains(r#"{"command": "ls -la"}"#));
    assert!(compacted.contains("<execute_result>a.txt\nb.txt\n</execute_result>"));
    assert_eq!(completion_requests[1]["messages"][3]["content"], "continue");
    assert_eq!(store.save_count(), 1);

    assert_eq!(
        phases(&drain_updates(&mut rx)),
        vec![
            TurnPhase::AwaitingCompletion,
            TurnPhase::StreamingAssistant,
            TurnPhase::DetectedToolCall,
            TurnPhase::ExecutingTool,
            TurnPhase::StreamingToolResult,
            TurnPhase::AwaitingCompletion,
            TurnPhase::StreamingAssistant,
            TurnPhase::Done,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_tool_call_after_prose_is_still_detected() -> Result<()> {
    let mut first_round: Vec<String> = ["I", " will", " check", "."]
        .iter()
        .map(|chunk| completion_record(json!({ "content": chunk }), None))
        .collect();
    first_round.push(completion_record(
        json!({ "function_call": { "name": "run_code", "arguments": "{\"code\": \"print(1)\"}" } }),
        None,
    ));
    first_round.push(completion_record(json!({}), Some("function_call")));
    first_round.push(DONE.to_string());

    let Harness {
        mut manager,
        executions,
        ..
    } = harness(
        vec![first_round, text_round(&["It printed 1."])],
        vec![execution_round(&["1\n"])],
    );

    manager
        .send_message("run it".to_string(), None, &CancellationToken::new())
        .await?;

    assert_eq!(executions.requests()[0]["functionName"], "run_code");
    assert_eq!(executions.requests()[0]["arguments"]["code"], "print(1)");
    let assistant = &manager.conversation().messages[1];
    assert_eq!(assistant.text(), "I will check.");
    assert!(assistant.function_call.is_some());
    Ok(())
}

#[tokio::test]
async fn test_malformed_arguments_abort_without_execution() {
    let Harness {
        mut manager,
        executions,
        store,
        ..
    } = harness(
        vec![tool_call_round("run_shell", &["{\"command\": "])],
        vec![execution_round(&["never"])],
    );
    let (tx, mut rx) = mpsc::unbounded_channel();

    let error = manager
        .send_message("list files".to_string(), Some(&tx), &CancellationToken::new())
        .await
        .expect_err("arguments are truncated");

    assert!(matches!(
        turn_error(&error),
        Some(TurnError::MalformedToolArguments { tool, .. }) if tool == "run_shell"
    ));
    assert!(executions.requests().is_empty());
    assert_eq!(store.save_count(), 0);
    // The completed assistant message stays in memory.
    assert_eq!(manager.conversation().messages.len(), 2);
    assert!(matches!(
        drain_updates(&mut rx).last(),
        Some(ConversationUpdate::TurnFailed(_))
    ));
}

#[tokio::test]
async fn test_tool_call_without_name_aborts() {
    let round = vec![
        completion_record(json!({ "function_call": { "arguments": "{\"code\":\"1\"}" } }), None),
        DONE.to_string(),
    ];
    let Harness {
        mut manager,
        executions,
        ..
    } = harness(vec![round], vec![]);

    let error = manager
        .send_message("go".to_string(), None, &CancellationToken::new())
        .await
        .expect_err("name is missing");

    assert!(matches!(
        turn_error(&error),
        Some(TurnError::MissingToolCall { missing: "a name" })
    ));
    assert!(executions.requests().is_empty());
}

#[tokio::test]
async fn test_loop_limit_stops_before_next_execution() {
    let Harness {
        mut manager,
        executions,
        store,
        ..
    } = harness_with_limits(
        vec![
            tool_call_round("run_shell", &[r#"{"command":"ls"}"#]),
            tool_call_round("run_shell", &[r#"{"command":"ls"}"#]),
        ],
        vec![execution_round(&["a.txt\n"]), execution_round(&["a.txt\n"])],
        TurnLimits {
            max_tool_rounds: 1,
            max_result_history_chars: 200,
        },
    );

    let error = manager
        .send_message("loop".to_string(), None, &CancellationToken::new())
        .await
        .expect_err("second tool call exceeds the cap");

    assert!(matches!(
        turn_error(&error),
        Some(TurnError::LoopLimitExceeded { max_rounds: 1 })
    ));
    assert_eq!(executions.requests().len(), 1);
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn test_empty_execution_stream_still_closes_result() -> Result<()> {
    let Harness { mut manager, .. } = harness(
        vec![
            tool_call_round("run_code", &[r#"{"code":"x = 1"}"#]),
            text_round(&["Done."]),
        ],
        vec![vec![]],
    );

    manager
        .send_message("assign".to_string(), None, &CancellationToken::new())
        .await?;

    assert_eq!(
        manager.conversation().messages[2].text(),
        "<execute_result></execute_result>"
    );
    Ok(())
}

#[tokio::test]
async fn test_output_after_end_fragment_is_ignored() -> Result<()> {
    let Harness { mut manager, .. } = harness(
        vec![
            tool_call_round("run_shell", &[r#"{"command":"echo hi"}"#]),
            text_round(&["ok"]),
        ],
        vec![vec![
            execution_record("hi\n", false, "aaa"),
            execution_record("", true, "aaa"),
            execution_record("late\n", false, "aaa"),
        ]],
    );

    manager
        .send_message("echo".to_string(), None, &CancellationToken::new())
        .await?;

    assert_eq!(
        manager.conversation().messages[2].text(),
        "<execute_result>hi\n</execute_result>"
    );
    Ok(())
}

#[tokio::test]
async fn test_malformed_record_rolls_back_in_flight_message() {
    let round = vec![
        completion_record(json!({ "content": "partial" }), None),
        "data: {not json".to_string(),
    ];
    let Harness {
        mut manager, store, ..
    } = harness(vec![round], vec![]);

    let error = manager
        .send_message("hi".to_string(), None, &CancellationToken::new())
        .await
        .expect_err("record is malformed");

    assert!(matches!(
        turn_error(&error),
        Some(TurnError::MalformedRecord { .. })
    ));
    assert_eq!(manager.conversation().messages, vec![Message::user("hi")]);
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn test_failed_turn_leaves_history_usable() -> Result<()> {
    let Harness {
        mut manager,
        completions,
        ..
    } = harness(
        vec![
            vec![completion_record(json!({ "content": "par" }), None), "data: oops".to_string()],
            text_round(&["Recovered."]),
        ],
        vec![],
    );

    let _ = manager
        .send_message("first".to_string(), None, &CancellationToken::new())
        .await;
    manager
        .send_message("second".to_string(), None, &CancellationToken::new())
        .await?;

    let requests = completions.requests();
    assert_eq!(request_roles(&requests[1]), vec!["system", "user", "user"]);
    assert_eq!(manager.conversation().messages[2].text(), "Recovered.");
    Ok(())
}

/// Serves one record and then never produces another chunk.
struct StallingProducer;

impl MockStreamProducer for StallingProducer {
    fn create_mock_stream(&self, _payload: &Value) -> Result<ByteStream> {
        let first = completion_record(json!({ "content": "Thinking" }), None);
        let head = stream::iter(vec![Ok(Bytes::from(format!("{first}\n\n")))]);
        Ok(Box::pin(head.chain(stream::pending())))
    }
}

#[tokio::test]
async fn test_cancellation_removes_partial_assistant_message() {
    let store = Arc::new(MemoryStore::new());
    let mut manager = ConversationManager::new_mock(
        CompletionClient::new_mock(Arc::new(StallingProducer)),
        ExecutionClient::new_mock(Arc::new(MockApiClient::new(vec![])), "aaa"),
        store.clone(),
    );
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let canceller = async {
        while let Some(update) = rx.recv().await {
            if let ConversationUpdate::Snapshot(snapshot) = update {
                if snapshot.last_message().map(|m| m.role) == Some(Role::Assistant) {
                    cancel.cancel();
                    break;
                }
            }
        }
    };
    let (result, ()) = tokio::join!(
        manager.send_message("think".to_string(), Some(&tx), &cancel),
        canceller
    );

    let error = result.expect_err("turn was cancelled");
    assert!(turn_error(&error).is_some_and(TurnError::is_cancelled));
    assert_eq!(manager.conversation().messages, vec![Message::user("think")]);
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn test_cancelled_token_aborts_before_request() {
    let Harness {
        mut manager,
        completions,
        ..
    } = harness(vec![text_round(&["unused"])], vec![]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = manager
        .send_message("hi".to_string(), None, &cancel)
        .await
        .expect_err("already cancelled");

    assert!(turn_error(&error).is_some_and(TurnError::is_cancelled));
    assert!(completions.requests().is_empty());
}

#[tokio::test]
async fn test_empty_choices_are_skipped() -> Result<()> {
    let round = vec![
        r#"data: {"id":"x","choices":[]}"#.to_string(),
        completion_record(json!({ "content": "ok" }), None),
        DONE.to_string(),
    ];
    let Harness { mut manager, .. } = harness(vec![round], vec![]);

    manager
        .send_message("hi".to_string(), None, &CancellationToken::new())
        .await?;

    assert_eq!(manager.conversation().messages[1].text(), "ok");
    Ok(())
}

#[tokio::test]
async fn test_one_snapshot_per_merged_fragment_in_order() -> Result<()> {
    let round = text_round(&["Hel", "lo", "!"]);
    let merged_fragments = round.len() - 1;
    let Harness { mut manager, .. } = harness(vec![round], vec![]);
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager
        .send_message("hi".to_string(), Some(&tx), &CancellationToken::new())
        .await?;

    let snapshots: Vec<Arc<crate::types::Conversation>> = drain_updates(&mut rx)
        .into_iter()
        .filter_map(|update| match update {
            ConversationUpdate::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        })
        .collect();

    // The first snapshot shows the user message before any fragment arrives.
    assert_eq!(snapshots.len(), 1 + merged_fragments);
    assert_eq!(snapshots[0].messages, vec![Message::user("hi")]);
    let assistant_texts: Vec<Option<String>> = snapshots[1..]
        .iter()
        .map(|snapshot| snapshot.messages[1].content.clone())
        .collect();
    assert_eq!(
        assistant_texts,
        vec![
            Some("Hel".to_string()),
            Some("Hello".to_string()),
            Some("Hello!".to_string()),
            Some("Hello!".to_string()),
        ]
    );
    Ok(())
}

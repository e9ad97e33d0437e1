use crate::api::client::MockStreamProducer;
use crate::api::ByteStream;
use anyhow::Result;
use bytes::Bytes;
use futures::stream;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Scripted SSE responses, one `Vec` of records per request, served in order.
/// Every request payload is recorded for later inspection.
#[derive(Clone)]
pub struct MockApiClient {
    responses: Arc<Mutex<Vec<Vec<String>>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockApiClient {
    pub fn new(responses: Vec<Vec<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

impl MockStreamProducer for MockApiClient {
    fn create_mock_stream(&self, payload: &Value) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(payload.clone());

        let mut responses_guard = self.responses.lock().unwrap();
        if responses_guard.is_empty() {
            return Err(anyhow::anyhow!(
                "MockApiClient: No more responses configured"
            ));
        }
        let current_sse_chunks = responses_guard.remove(0);

        let sse_byte_chunks: Vec<Result<Bytes>> = current_sse_chunks
            .into_iter()
            .map(|s| {
                let framed = if s.ends_with("\n\n") {
                    s
                } else {
                    format!("{s}\n\n")
                };
                Ok(Bytes::from(framed))
            })
            .collect();

        Ok(Box::pin(stream::iter(sse_byte_chunks)))
    }
}

/// A `data:` record of the completion stream carrying `delta`.
pub fn completion_record(delta: Value, finish_reason: Option<&str>) -> String {
    let chunk = serde_json::json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion.chunk",
        "model": "mock-model",
        "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }]
    });
    format!("data: {chunk}")
}

/// A `data:` record of the execution stream.
pub fn execution_record(content: &str, end: bool, session_id: &str) -> String {
    let fragment = serde_json::json!({
        "content": content,
        "end": end,
        "session_id": session_id,
    });
    format!("data: {fragment}")
}

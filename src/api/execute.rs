use super::client::{build_http_client, open_event_stream};
#[cfg(test)]
use super::client::MockStreamProducer;
use super::logging::{debug_payload_enabled, emit_debug_payload};
use super::ByteStream;
use crate::config::Config;
#[cfg(test)]
use crate::error::TurnError;
use crate::types::ExecuteRequest;
use anyhow::Result;
use serde_json::{Map, Value};
#[cfg(test)]
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Client for the code/command execution service (`POST /execute`).
#[derive(Clone)]
pub struct ExecutionClient {
    http: reqwest::Client,
    execute_url: String,
    session_id: String,
    #[cfg(test)]
    mock_stream_producer: Option<Arc<dyn MockStreamProducer>>,
}

impl ExecutionClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            execute_url: config.execute_url.clone(),
            session_id: config.session_id.clone(),
            #[cfg(test)]
            mock_stream_producer: None,
        })
    }

    #[cfg(test)]
    pub fn new_mock(mock_producer: Arc<dyn MockStreamProducer>, session_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            execute_url: "http://localhost:5000/execute".to_string(),
            session_id: session_id.to_string(),
            mock_stream_producer: Some(mock_producer),
        }
    }

    pub fn request_for(&self, tool_name: &str, arguments: Map<String, Value>) -> ExecuteRequest {
        ExecuteRequest {
            function_name: tool_name.to_string(),
            session_id: self.session_id.clone(),
            arguments,
        }
    }

    pub async fn create_stream(
        &self,
        request: &ExecuteRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        let payload = serde_json::to_value(request)?;

        #[cfg(test)]
        {
            if let Some(producer) = &self.mock_stream_producer {
                if cancel.is_cancelled() {
                    return Err(TurnError::Cancelled.into());
                }
                return producer.create_mock_stream(&payload);
            }
        }

        if debug_payload_enabled() {
            emit_debug_payload(&self.execute_url, &payload);
        }

        let request = self
            .http
            .post(&self.execute_url)
            .header("content-type", "application/json")
            .json(&payload);

        open_event_stream(request, &self.execute_url, cancel).await
    }
}

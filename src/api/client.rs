use super::logging::{debug_payload_enabled, emit_debug_payload};
use super::ByteStream;
use crate::config::{ApiType, Config};
use crate::error::TurnError;
use crate::types::{Conversation, Message};
use crate::util::is_local_endpoint_url;
use anyhow::{bail, Result};
use futures::StreamExt;
use serde_json::{json, Value};
#[cfg(test)]
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_ERROR_DETAIL_CHARS: usize = 400;

#[cfg(test)]
pub trait MockStreamProducer: Send + Sync {
    fn create_mock_stream(&self, payload: &Value) -> Result<ByteStream>;
}

/// Client for the streaming chat-completions endpoint.
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    api_key: Option<String>,
    api_url: String,
    api_type: ApiType,
    organization: Option<String>,
    max_tokens: u32,
    #[cfg(test)]
    mock_stream_producer: Option<Arc<dyn MockStreamProducer>>,
}

impl CompletionClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            api_key: config.api_key.clone(),
            api_url: endpoint_url(config)?,
            api_type: config.api_type,
            organization: config.organization.clone(),
            max_tokens: config.max_tokens,
            #[cfg(test)]
            mock_stream_producer: None,
        })
    }

    #[cfg(test)]
    pub fn new_mock(mock_producer: Arc<dyn MockStreamProducer>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: None,
            api_url: "http://localhost:8000/v1/chat/completions".to_string(),
            api_type: ApiType::OpenAi,
            organization: None,
            max_tokens: 1000,
            mock_stream_producer: Some(mock_producer),
        }
    }

    /// Request body: the conversation's system prompt first, then `messages`.
    /// Azure addresses the model through the deployment URL, so `model` is left out.
    pub fn build_payload(&self, conversation: &Conversation, messages: &[Message]) -> Value {
        let mut request_messages = Vec::with_capacity(messages.len() + 1);
        request_messages.push(Message::system(conversation.prompt.clone()));
        request_messages.extend(messages.iter().cloned());

        let mut payload = json!({
            "model": conversation.model,
            "messages": request_messages,
            "max_tokens": self.max_tokens,
            "temperature": conversation.temperature,
            "stream": true,
        });

        if let Some(payload_object) = payload.as_object_mut() {
            if self.api_type == ApiType::Azure {
                payload_object.remove("model");
            }
            if conversation.tools_enabled() {
                payload_object.insert("functions".to_string(), json!(conversation.functions));
                if let Some(mode) = conversation.function_call {
                    payload_object.insert("function_call".to_string(), json!(mode));
                }
            }
        }

        payload
    }

    /// Azure takes the key in `api-key`; OpenAI takes a bearer token plus an
    /// optional organization.
    fn request_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("content-type", "application/json".to_string())];
        match self.api_type {
            ApiType::Azure => {
                if let Some(api_key) = &self.api_key {
                    headers.push(("api-key", api_key.clone()));
                }
            }
            ApiType::OpenAi => {
                if let Some(api_key) = &self.api_key {
                    headers.push(("authorization", format!("Bearer {api_key}")));
                }
                if let Some(organization) = &self.organization {
                    headers.push(("openai-organization", organization.clone()));
                }
            }
        }
        headers
    }

    pub async fn create_stream(
        &self,
        conversation: &Conversation,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<ByteStream> {
        let payload = self.build_payload(conversation, messages);

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
            emit_debug_payload(&self.api_url, &payload);
        }

        let mut request = self.http.post(&self.api_url);
        for (name, value) in self.request_headers() {
            request = request.header(name, value);
        }
        let request = request.json(&payload);

        open_event_stream(request, &self.api_url, cancel).await
    }
}

pub(super) fn build_http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?)
}

/// Sends `request` and hands back its body as a byte stream once the status is
/// known to be a success.
pub(super) async fn open_event_stream(
    request: reqwest::RequestBuilder,
    request_url: &str,
    cancel: &CancellationToken,
) -> Result<ByteStream> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TurnError::Cancelled.into()),
        response = request.send() => {
            response.map_err(|error| map_api_request_error(error, request_url))?
        }
    };

    let status = response.status();
    if !status.is_success() {
        let detail = response
            .text()
            .await
            .map(|body| error_detail(&body, status.canonical_reason()))
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("").to_string());
        return Err(TurnError::HttpStatus {
            url: request_url.to_string(),
            status: status.as_u16(),
            detail,
        }
        .into());
    }

    if response.content_length() == Some(0) {
        return Err(TurnError::MissingBody {
            url: request_url.to_string(),
        }
        .into());
    }

    let request_url_for_stream = request_url.to_string();
    let stream = response.bytes_stream().map(move |item| {
        item.map_err(|error| map_api_request_error(error, &request_url_for_stream))
    });
    Ok(Box::pin(stream))
}

fn map_api_request_error(error: reqwest::Error, request_url: &str) -> anyhow::Error {
    let message = if error.is_connect() && is_local_endpoint_url(request_url) {
        format!("cannot reach local endpoint: {error}. Start the local server or update the configured URL.")
    } else if error.is_connect() {
        format!("cannot reach endpoint: {error}")
    } else if error.is_timeout() {
        format!("request timed out: {error}")
    } else {
        error.to_string()
    };

    TurnError::Transport {
        url: request_url.to_string(),
        message,
    }
    .into()
}

/// Prefers the `error.message` field of an OpenAI-style error body.
fn error_detail(body: &str, reason: Option<&str>) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    });

    let detail = from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            reason.unwrap_or("").to_string()
        } else {
            trimmed.to_string()
        }
    });
    detail.chars().take(MAX_ERROR_DETAIL_CHARS).collect()
}

fn endpoint_url(config: &Config) -> Result<String> {
    match config.api_type {
        ApiType::OpenAi => Ok(adapt_to_chat_completions_url(&config.api_url)),
        ApiType::Azure => {
            let Some(deployment) = config.azure_deployment_id.as_deref() else {
                bail!("Azure endpoints need RELAY_AZURE_DEPLOYMENT_ID");
            };
            let host = config.api_url.trim().trim_end_matches('/');
            Ok(format!(
                "{host}/openai/deployments/{deployment}/chat/completions?api-version={}",
                config.api_version.trim()
            ))
        }
    }
}

fn adapt_to_chat_completions_url(api_url: &str) -> String {
    let normalized = api_url.trim().trim_end_matches('/');
    if normalized.ends_with("/chat/completions") {
        return normalized.to_string();
    }
    if normalized.ends_with("/v1") {
        return format!("{normalized}/chat/completions");
    }
    normalized.to_string()
}

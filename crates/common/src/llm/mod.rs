//! Language model client
//!
//! Three call shapes are used across the workspace:
//! - `complete`: one system + user exchange, full text back
//! - `stream_complete`: same prompt, text deltas streamed as they arrive
//! - `extract`: function calling with a forced tool, arguments back as JSON
//!
//! `OpenAiChatClient` speaks the OpenAI chat completions protocol. The
//! streaming variant pulls from the response body lazily, so dropping the
//! returned stream closes the upstream connection.

pub mod sse;

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sse::{SseDecoder, SseFrame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Stream of answer text deltas
pub type TextStream = BoxStream<'static, Result<String>>;

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A function invocation emitted by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// An assistant turn that only calls tools
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(String::new()),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// The result of a tool call
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A function the model is forced to call
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Value,
}

/// Language model operations used by the pipelines
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Single completion, returns the message text
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Streamed completion. Errors before the first byte are returned
    /// directly; errors mid-stream are yielded as the last item.
    async fn stream_complete(&self, system: &str, user: &str) -> Result<TextStream>;

    /// Structured extraction. Returns the arguments of the forced tool call,
    /// or `None` if the model made no call.
    async fn extract(&self, messages: &[ChatMessage], tool: &ToolSpec) -> Result<Option<Value>>;
}

/// OpenAI chat completions client
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    chat_model: String,
    extraction_model: String,
    extraction_temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl OpenAiChatClient {
    /// Create a new client from configuration
    pub fn new(config: &LlmConfig) -> Result<Self> {
        // No overall timeout: streamed answers run as long as generation does
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create LLM HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            extraction_model: config.extraction_model.clone(),
            extraction_temperature: config.extraction_temperature,
        })
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::llm(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::llm(format!("API error {}: {}", status, body)));
        }

        Ok(response)
    }

    async fn first_message(&self, request: &ChatRequest<'_>) -> Result<ChatMessage> {
        let response: ChatResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| AppError::llm(format!("Failed to parse response: {}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| AppError::llm("Response contained no choices"))
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    #[instrument(skip_all, fields(model = %self.chat_model))]
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let message = self
            .first_message(&ChatRequest {
                model: &self.chat_model,
                messages: &messages,
                temperature: None,
                stream: false,
                tools: None,
                tool_choice: None,
            })
            .await?;

        Ok(message.content.unwrap_or_default())
    }

    #[instrument(skip_all, fields(model = %self.chat_model))]
    async fn stream_complete(&self, system: &str, user: &str) -> Result<TextStream> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let response = self
            .send(&ChatRequest {
                model: &self.chat_model,
                messages: &messages,
                temperature: None,
                stream: true,
                tools: None,
                tool_choice: None,
            })
            .await?;

        debug!("Completion stream opened");
        Ok(decode_stream(response.bytes_stream().boxed()))
    }

    #[instrument(skip_all, fields(model = %self.extraction_model, tool = %tool.name))]
    async fn extract(&self, messages: &[ChatMessage], tool: &ToolSpec) -> Result<Option<Value>> {
        let tools = json!([{
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }]);
        let tool_choice = json!({"type": "function", "function": {"name": tool.name}});

        let message = self
            .first_message(&ChatRequest {
                model: &self.extraction_model,
                messages,
                temperature: Some(self.extraction_temperature),
                stream: false,
                tools: Some(tools),
                tool_choice: Some(tool_choice),
            })
            .await?;

        let Some(call) = message
            .tool_calls
            .into_iter()
            .find(|c| c.function.name == tool.name)
        else {
            warn!("Model returned no tool call");
            return Ok(None);
        };

        let arguments = serde_json::from_str(&call.function.arguments)
            .map_err(|e| AppError::llm(format!("Tool arguments are not valid JSON: {}", e)))?;
        Ok(Some(arguments))
    }
}

struct StreamState {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Turn a raw SSE byte stream into text deltas
fn decode_stream(bytes: BoxStream<'static, reqwest::Result<Bytes>>) -> TextStream {
    let state = StreamState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(text) = state.pending.pop_front() {
                return Some((Ok(text), state));
            }
            if state.done {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.push(&chunk) {
                        match frame {
                            SseFrame::Delta(text) => state.pending.push_back(text),
                            SseFrame::Done => {
                                state.done = true;
                                break;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((
                        Err(AppError::llm(format!("Stream interrupted: {}", e))),
                        state,
                    ));
                }
                None => {
                    if let Some(SseFrame::Delta(text)) = state.decoder.finish() {
                        state.pending.push_back(text);
                    }
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}

/// Scripted model for local development and tests
#[derive(Debug, Default)]
pub struct MockLanguageModel {
    completion: String,
    chunks: Vec<String>,
    extraction: Option<Value>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockLanguageModel {
    /// Model whose completions return `completion`
    pub fn new(completion: impl Into<String>) -> Self {
        Self {
            completion: completion.into(),
            ..Self::default()
        }
    }

    /// Model whose every call fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Chunks yielded by `stream_complete`
    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments returned by `extract`
    pub fn with_extraction(mut self, arguments: Value) -> Self {
        self.extraction = Some(arguments);
        self
    }

    /// Number of calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::llm("mock failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        self.record()?;
        Ok(self.completion.clone())
    }

    async fn stream_complete(&self, _system: &str, _user: &str) -> Result<TextStream> {
        self.record()?;
        Ok(stream::iter(self.chunks.clone().into_iter().map(Ok)).boxed())
    }

    async fn extract(&self, _messages: &[ChatMessage], _tool: &ToolSpec) -> Result<Option<Value>> {
        self.record()?;
        Ok(self.extraction.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse_bytes(parts: &[&str]) -> BoxStream<'static, reqwest::Result<Bytes>> {
        let owned: Vec<reqwest::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(owned).boxed()
    }

    #[tokio::test]
    async fn test_decode_stream_yields_deltas_until_done() {
        let bytes = sse_bytes(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Drex\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"el\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]);

        let chunks: Vec<String> = decode_stream(bytes)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["Drex".to_string(), "el".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_stream_ends_without_done() {
        let bytes = sse_bytes(&["data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}"]);
        let chunks: Vec<String> = decode_stream(bytes)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["hi".to_string()]);
    }

    #[test]
    fn test_tool_call_message_serialization() {
        let message = ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            kind: function_type(),
            function: FunctionCall {
                name: "TMS".into(),
                arguments: "{}".into(),
            },
        }]);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert!(value.get("tool_call_id").is_none());

        let ack = serde_json::to_value(ChatMessage::tool("call_1", "ok")).unwrap();
        assert_eq!(ack["role"], "tool");
        assert_eq!(ack["tool_call_id"], "call_1");
    }

    #[tokio::test]
    async fn test_mock_model_counts_calls() {
        let model = MockLanguageModel::new("yes").with_chunks(["a", "b"]);
        assert_eq!(model.complete("s", "u").await.unwrap(), "yes");
        let chunks: Vec<_> = model.stream_complete("s", "u").await.unwrap().collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(model.calls(), 2);

        let failing = MockLanguageModel::failing();
        assert!(failing.complete("s", "u").await.is_err());
    }
}

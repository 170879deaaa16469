//! OpenAI-compatible provider implementation.
//!
//! Works with DeepSeek, Qwen (DashScope), Kimi/Moonshot, GLM, Doubao, and
//! any other endpoint speaking the OpenAI chat-completions protocol.
//!
//! Supports:
//! - Streaming SSE chat completions
//! - Tool use / function calling, including fragmented tool-call deltas
//! - Per-attempt timeout, single retry, cooperative cancellation

use async_trait::async_trait;
use crabwire_core::error::ProviderError;
use crabwire_core::message::{Message, ToolCall};
use crabwire_core::provider::{ChatEvent, ChatOptions, ChatStream, ToolDefinition, Usage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Per-HTTP-attempt limit: connect plus response headers.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Pause before the single retry of a transport-class failure.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// An OpenAI-compatible LLM provider.
///
/// This handles every backend crabwire routes to, since all of them expose
/// an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// No total-request timeout is set on the client: streams legitimately
    /// run for minutes. The attempt timeout is enforced around `send()`.
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_request_body(messages: &[Message], options: &ChatOptions) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": options.model,
            "messages": Self::to_api_messages(messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !options.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&options.tools));
        }

        body
    }

    /// One HTTP attempt: post the request and wait for response headers,
    /// racing the attempt timeout against the caller's cancellation.
    async fn send_attempt(
        &self,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let request = self
            .client
            .post(self.chat_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(body);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = tokio::time::timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), request.send()) => {
                match result {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => return Err(ProviderError::Network(e.to_string())),
                    Err(_) => {
                        return Err(ProviderError::Timeout {
                            seconds: REQUEST_TIMEOUT_SECS,
                        });
                    }
                }
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.id, status, body = %error_body, "Provider returned error");
            return Err(classify_status(&self.id, status, &error_body));
        }

        Ok(response)
    }
}

#[async_trait]
impl crabwire_core::Provider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> std::result::Result<ChatStream, ProviderError> {
        let body = Self::build_request_body(messages, options);

        debug!(provider = %self.id, model = %options.model, "Sending streaming request");

        let response = match self.send_attempt(&body, &options.cancel).await {
            Ok(response) => response,
            Err(e) if e.is_retryable() && !options.cancel.is_cancelled() => {
                warn!(provider = %self.id, error = %e, "Attempt failed, retrying once");
                tokio::select! {
                    _ = options.cancel.cancelled() => return Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                }
                self.send_attempt(&body, &options.cancel).await?
            }
            Err(e) => return Err(e),
        };

        Ok(spawn_stream_reader(
            self.id.clone(),
            response,
            options.model.clone(),
            options.cancel.clone(),
        ))
    }
}

/// Spawn the SSE reader task and hand back its event channel.
fn spawn_stream_reader(
    provider: String,
    response: reqwest::Response,
    model: String,
    cancel: CancellationToken,
) -> ChatStream {
    let (tx, rx) = tokio::sync::mpsc::channel(64);

    tokio::spawn(async move {
        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::new(model);

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(provider = %provider, "Generation cancelled mid-stream");
                    let _ = tx.send(Ok(decoder.cancel_event())).await;
                    return;
                }
                next = byte_stream.next() => next,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    let _ = tx.send(Err(ProviderError::Network(e.to_string()))).await;
                    return;
                }
                None => break,
            };

            for event in decoder.feed(&bytes) {
                let terminal = event.is_done();
                if tx.send(Ok(event)).await.is_err() {
                    return; // receiver dropped
                }
                if terminal {
                    return;
                }
            }
        }

        // Stream ended without a terminator frame; finalize anyway.
        let _ = tx.send(Ok(decoder.done_event(None))).await;
    });

    rx
}

/// Classify a non-200 status into the retry/failover taxonomy.
///
/// 4xx means the caller's configuration is at fault and must never be
/// retried or failed over. A body mentioning "insufficient" is treated as
/// exhausted balance regardless of the exact 4xx code, since several
/// backends report empty accounts that way.
fn classify_status(provider: &str, status: u16, body: &str) -> ProviderError {
    let message = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        body.trim().to_string()
    };

    match status {
        401 | 403 => ProviderError::AuthenticationFailed {
            provider: provider.to_string(),
            message,
        },
        402 => ProviderError::QuotaExhausted {
            provider: provider.to_string(),
            message,
        },
        429 => ProviderError::RateLimited {
            provider: provider.to_string(),
            message,
        },
        400..=499 if message.to_lowercase().contains("insufficient") => {
            ProviderError::QuotaExhausted {
                provider: provider.to_string(),
                message,
            }
        }
        400..=499 => ProviderError::BadRequest {
            status_code: status,
            message,
        },
        _ => ProviderError::ApiStatus {
            status_code: status,
            message,
        },
    }
}

// ── SSE decoding ──────────────────────────────────────────────────────────

/// Incremental decoder for an OpenAI-style SSE body.
///
/// Bytes arrive in arbitrary read-sized chunks; a partial trailing line is
/// held in the buffer until its newline shows up. Only `data: ` lines are
/// parsed; malformed frames are skipped since some backends interleave
/// non-conforming keep-alives. Tool-call fragments accumulate per slot
/// index and are emitted fully assembled on the terminal event only.
struct SseDecoder {
    buffer: String,
    slots: BTreeMap<u32, ToolCallSlot>,
    model: String,
}

impl SseDecoder {
    fn new(model: String) -> Self {
        Self {
            buffer: String::new(),
            slots: BTreeMap::new(),
            model,
        }
    }

    /// Append raw bytes and drain every event completed by them. A `Done`
    /// in the returned list is always last; the stream is over.
    fn feed(&mut self, bytes: &[u8]) -> Vec<ChatEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer = self.buffer[line_end + 1..].to_string();

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            let data = data.trim();

            // "[DONE]" signals end of stream
            if data == "[DONE]" {
                events.push(self.done_event(None));
                break;
            }

            match serde_json::from_str::<StreamFrame>(data) {
                Ok(frame) => {
                    if self.apply_frame(frame, &mut events) {
                        break;
                    }
                }
                Err(e) => {
                    trace!(data = %data, error = %e, "Ignoring unparseable SSE frame");
                }
            }
        }

        events
    }

    /// Fold one parsed frame into decoder state. Returns true when the
    /// frame terminated the stream (usage statistics arrived).
    fn apply_frame(&mut self, frame: StreamFrame, events: &mut Vec<ChatEvent>) -> bool {
        if let Some(model) = frame.model {
            if !model.is_empty() {
                self.model = model;
            }
        }

        if let Some(choice) = frame.choices.into_iter().next() {
            if let Some(tool_calls) = &choice.delta.tool_calls {
                for delta in tool_calls {
                    self.slots.entry(delta.index).or_default().apply(delta);
                }
            }

            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(ChatEvent::Delta { text: content });
                }
            }
        }

        // Some backends report usage before the [DONE] marker; that frame
        // is terminal either way.
        if let Some(usage) = frame.usage {
            events.push(self.done_event(Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            })));
            return true;
        }

        false
    }

    /// Terminal event carrying the fully assembled tool calls, slot order.
    fn done_event(&self, usage: Option<Usage>) -> ChatEvent {
        ChatEvent::Done {
            model: self.model.clone(),
            usage,
            tool_calls: self.assembled_tool_calls(),
        }
    }

    /// Terminal event for cooperative cancellation. Partially assembled
    /// tool calls are dropped: their argument text may be cut mid-JSON and
    /// must not reach the registry.
    fn cancel_event(&self) -> ChatEvent {
        ChatEvent::Done {
            model: self.model.clone(),
            usage: None,
            tool_calls: Vec::new(),
        }
    }

    fn assembled_tool_calls(&self) -> Vec<ToolCall> {
        self.slots
            .iter()
            .map(|(index, slot)| ToolCall {
                id: if slot.id.is_empty() {
                    format!("call_{index}")
                } else {
                    slot.id.clone()
                },
                name: slot.name.clone(),
                arguments: slot.arguments.clone(),
            })
            .collect()
    }
}

/// Accumulates incremental fragments for one tool-call slot.
#[derive(Default)]
struct ToolCallSlot {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallSlot {
    fn apply(&mut self, delta: &ToolCallDelta) {
        if let Some(id) = &delta.id {
            self.id = id.clone();
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                self.name = name.clone();
            }
            if let Some(arguments) = &function.arguments {
                self.arguments.push_str(arguments);
            }
        }
    }
}

// ── OpenAI API types (internal) ───────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// ── Streaming SSE frames ──────────────────────────────────────────────────

/// A single SSE `data: {...}` frame from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

/// A tool-call fragment — arrives incrementally across frames, keyed by a
/// zero-based slot index.
#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crabwire_core::Provider;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("deepseek", "https://api.deepseek.com/", "sk-test")
    }

    #[test]
    fn constructor_trims_trailing_slash() {
        let p = provider();
        assert_eq!(p.id(), "deepseek");
        assert_eq!(p.chat_url(), "https://api.deepseek.com/chat/completions");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
        assert!(api_messages[1].tool_calls.is_none());
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "current_time".into(),
                arguments: r#"{"utc_offset":8}"#.into(),
            }],
        );
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc.len(), 1);
        assert_eq!(tc[0].function.name, "current_time");
        assert_eq!(tc[0].r#type, "function");
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "result data");
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "read_file");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn request_body_shape() {
        let messages = vec![Message::user("hi")];
        let options = ChatOptions::new("deepseek-chat")
            .with_temperature(0.5)
            .with_max_tokens(512);
        let body = OpenAiCompatProvider::build_request_body(&messages, &options);

        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["max_tokens"], 512);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn request_body_includes_tools_when_present() {
        let messages = vec![Message::user("hi")];
        let options = ChatOptions::new("deepseek-chat").with_tools(vec![ToolDefinition {
            name: "current_time".into(),
            description: "Get the time".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]);
        let body = OpenAiCompatProvider::build_request_body(&messages, &options);
        assert_eq!(body["tools"][0]["function"]["name"], "current_time");
    }

    // ── Status classification ─────────────────────────────────────────────

    #[test]
    fn classify_auth_errors() {
        for status in [401, 403] {
            let err = classify_status("deepseek", status, "invalid key");
            assert!(matches!(err, ProviderError::AuthenticationFailed { .. }));
            assert!(err.is_client_error());
        }
    }

    #[test]
    fn classify_quota_by_status_and_body() {
        let err = classify_status("deepseek", 402, "payment required");
        assert!(matches!(err, ProviderError::QuotaExhausted { .. }));

        let err = classify_status("deepseek", 400, "Insufficient Balance");
        assert!(matches!(err, ProviderError::QuotaExhausted { .. }));
    }

    #[test]
    fn classify_rate_limit() {
        let err = classify_status("qwen", 429, "slow down");
        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert!(err.is_client_error());
    }

    #[test]
    fn classify_other_client_errors() {
        let err = classify_status("deepseek", 404, "no such model");
        assert!(matches!(err, ProviderError::BadRequest { .. }));
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn classify_server_errors_retryable() {
        let err = classify_status("deepseek", 502, "bad gateway");
        assert!(matches!(err, ProviderError::ApiStatus { .. }));
        assert!(err.is_retryable());
        assert!(!err.is_client_error());
    }

    #[test]
    fn classify_empty_body_mentions_status() {
        let err = classify_status("deepseek", 500, "");
        assert!(err.to_string().contains("500"));
    }

    // ── SSE decoding ──────────────────────────────────────────────────────

    #[test]
    fn decode_content_deltas() {
        let mut decoder = SseDecoder::new("deepseek-chat".into());
        let events = decoder.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\
              data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n",
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ChatEvent::Delta { text } if text == "Hello"));
        assert!(matches!(&events[1], ChatEvent::Delta { text } if text == " world"));
    }

    #[test]
    fn decode_done_terminator() {
        let mut decoder = SseDecoder::new("deepseek-chat".into());
        let events = decoder.feed(b"data: [DONE]\n");
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::Done {
                model,
                usage,
                tool_calls,
            } => {
                assert_eq!(model, "deepseek-chat");
                assert!(usage.is_none());
                assert!(tool_calls.is_empty());
            }
            other => panic!("Expected Done, got: {other:?}"),
        }
    }

    #[test]
    fn partial_lines_held_across_reads() {
        let mut decoder = SseDecoder::new("m".into());

        // First read ends mid-JSON; nothing must be emitted yet.
        let events = decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel");
        assert!(events.is_empty());

        // Second read completes the line and appends the terminator.
        let events = decoder.feed(b"lo\"}}]}\ndata: [DONE]\n");
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ChatEvent::Delta { text } if text == "Hello"));
        assert!(events[1].is_done());
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let mut decoder = SseDecoder::new("m".into());
        let events = decoder.feed(
            b"data: {not json at all\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChatEvent::Delta { text } if text == "ok"));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let mut decoder = SseDecoder::new("m".into());
        let events = decoder.feed(
            b": keep-alive\n\
              \r\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\r\n",
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChatEvent::Delta { text } if text == "hi"));
    }

    #[test]
    fn tool_call_fragments_reassemble() {
        let mut decoder = SseDecoder::new("deepseek-chat".into());

        // Arguments for slot 0 arrive split across three frames.
        let frames = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"current_time","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"utc_off"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"set\": 8}"}}]}}]}"#,
        ];
        for frame in frames {
            let events = decoder.feed(format!("{frame}\n").as_bytes());
            assert!(events.is_empty(), "fragments must not emit events");
        }

        let events = decoder.feed(b"data: [DONE]\n");
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::Done { tool_calls, .. } => {
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(tool_calls[0].id, "call_9");
                assert_eq!(tool_calls[0].name, "current_time");
                assert_eq!(tool_calls[0].arguments, "{\"utc_offset\": 8}");
            }
            other => panic!("Expected Done, got: {other:?}"),
        }
    }

    #[test]
    fn tool_calls_sorted_by_slot_index() {
        let mut decoder = SseDecoder::new("m".into());
        decoder.feed(
            br#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"read_file","arguments":"{}"}}]}}]}
"#,
        );
        decoder.feed(
            br#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"current_time","arguments":"{}"}}]}}]}
"#,
        );

        let events = decoder.feed(b"data: [DONE]\n");
        match &events[0] {
            ChatEvent::Done { tool_calls, .. } => {
                assert_eq!(tool_calls.len(), 2);
                assert_eq!(tool_calls[0].name, "current_time");
                assert_eq!(tool_calls[1].name, "read_file");
            }
            other => panic!("Expected Done, got: {other:?}"),
        }
    }

    #[test]
    fn usage_frame_terminates_stream() {
        let mut decoder = SseDecoder::new("deepseek-chat".into());
        let events = decoder.feed(
            b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        );
        // The usage frame is terminal; the trailing frame is never decoded.
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::Done { usage, .. } => {
                let usage = usage.as_ref().unwrap();
                assert_eq!(usage.prompt_tokens, 10);
                assert_eq!(usage.total_tokens, 15);
            }
            other => panic!("Expected Done, got: {other:?}"),
        }
    }

    #[test]
    fn missing_tool_call_id_gets_fallback() {
        let mut decoder = SseDecoder::new("m".into());
        decoder.feed(
            br#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"current_time","arguments":"{}"}}]}}]}
"#,
        );
        let events = decoder.feed(b"data: [DONE]\n");
        match &events[0] {
            ChatEvent::Done { tool_calls, .. } => {
                assert_eq!(tool_calls[0].id, "call_0");
            }
            other => panic!("Expected Done, got: {other:?}"),
        }
    }

    #[test]
    fn model_reported_by_stream_wins() {
        let mut decoder = SseDecoder::new("requested".into());
        decoder.feed(
            b"data: {\"model\":\"deepseek-chat-v3\",\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n",
        );
        let events = decoder.feed(b"data: [DONE]\n");
        match &events[0] {
            ChatEvent::Done { model, .. } => assert_eq!(model, "deepseek-chat-v3"),
            other => panic!("Expected Done, got: {other:?}"),
        }
    }

    #[test]
    fn eof_without_terminator_still_finalizes() {
        let mut decoder = SseDecoder::new("m".into());
        decoder.feed(
            br#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"read_file","arguments":"{\"path\":\"a.txt\"}"}}]}}]}
"#,
        );
        // Connection dropped; the reader falls back to done_event(None).
        match decoder.done_event(None) {
            ChatEvent::Done { tool_calls, .. } => {
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(tool_calls[0].name, "read_file");
            }
            other => panic!("Expected Done, got: {other:?}"),
        }
    }

    #[test]
    fn cancel_event_drops_partial_tool_calls() {
        let mut decoder = SseDecoder::new("m".into());
        decoder.feed(
            br#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"write_file","arguments":"{\"pa"}}]}}]}
"#,
        );
        match decoder.cancel_event() {
            ChatEvent::Done { tool_calls, usage, .. } => {
                assert!(tool_calls.is_empty());
                assert!(usage.is_none());
            }
            other => panic!("Expected Done, got: {other:?}"),
        }
    }
}

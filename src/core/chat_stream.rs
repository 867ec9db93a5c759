//! OpenAI-compatible streaming adapter.
//!
//! One adapter covers every vendor speaking the OpenAI chat-completion
//! protocol: OpenAI itself, Gemini through its compatibility endpoint,
//! Mistral, and local servers. Server-sent events are read line by line and
//! normalized into [`CompletionEvent`]s; tool calls are reassembled from
//! incremental JSON deltas and emitted only once complete.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use futures_util::StreamExt;
use memchr::memchr;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ChatRequest, ChatResponse, ChatToolCallDelta};
use crate::core::call::Call;
use crate::core::completer::{
    CompleterError, CompletionError, CompletionEvent, RateLimit, StreamCompleter, ToolBox,
};
use crate::core::message::Chat;
use crate::tools::ToolSpec;
use crate::utils::url::construct_api_url;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Incremental SSE line buffer; handles chunk boundaries and CRLF endings.
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let mut line_end = newline_pos;
            if line_end > 0 && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }
            if let Ok(text) = std::str::from_utf8(&self.buffer[..line_end]) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
            self.buffer.drain(..=newline_pos);
        }
        lines
    }
}

/// Reassembles tool calls from per-index argument fragments.
#[derive(Default)]
pub struct ToolCallAccumulator {
    partial: BTreeMap<u32, Call>,
}

impl ToolCallAccumulator {
    pub fn absorb(&mut self, deltas: Vec<ChatToolCallDelta>) {
        for delta in deltas {
            let index = delta.index.unwrap_or(0);
            let entry = self
                .partial
                .entry(index)
                .or_insert_with(|| Call::new("", "", ""));
            if let Some(id) = delta.id {
                if !id.is_empty() {
                    entry.id = id;
                }
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    if !name.is_empty() {
                        entry.name = name;
                    }
                }
                if let Some(arguments) = function.arguments {
                    entry.arguments.push_str(&arguments);
                }
            }
            if let Some(extra) = delta.extra_content {
                entry.extra_content = Some(extra);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    /// Drain completed calls in index order.
    pub fn flush(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.partial).into_values().collect()
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Map a 429 response's headers into structured rate-limit details.
pub fn parse_rate_limit(headers: &reqwest::header::HeaderMap) -> RateLimit {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
    };
    let reset_at = header_u64("retry-after")
        .map(|seconds| Utc::now() + Duration::seconds(seconds as i64));
    RateLimit {
        reset_at,
        max_input_tokens: header_u64("x-ratelimit-limit-tokens"),
        tokens_remaining: header_u64("x-ratelimit-remaining-tokens"),
    }
}

fn extract_error_summary(value: &Value) -> Option<String> {
    value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
}

/// What handling one SSE payload produced.
enum PayloadOutcome {
    Events(Vec<CompletionEvent>),
    Done,
}

fn handle_data_payload(payload: &str, calls: &mut ToolCallAccumulator) -> PayloadOutcome {
    if payload == "[DONE]" {
        return PayloadOutcome::Done;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => {
            let mut events = Vec::new();
            for choice in response.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        events.push(CompletionEvent::TextDelta(content));
                    }
                }
                if let Some(deltas) = choice.delta.tool_calls {
                    calls.absorb(deltas);
                }
                if choice.finish_reason.as_deref() == Some("tool_calls") {
                    for call in calls.flush() {
                        events.push(CompletionEvent::ToolCall(call));
                    }
                }
            }
            if events.is_empty() {
                events.push(CompletionEvent::Noop);
            }
            PayloadOutcome::Events(events)
        }
        Err(parse_err) => {
            if let Ok(value) = serde_json::from_str::<Value>(payload) {
                if let Some(summary) = extract_error_summary(&value) {
                    return PayloadOutcome::Events(vec![CompletionEvent::Error(
                        CompletionError::Transport(summary),
                    )]);
                }
                // Recognized JSON that isn't a chat chunk: keep-alives etc.
                return PayloadOutcome::Events(vec![CompletionEvent::Noop]);
            }
            debug!(payload = %payload, error = %parse_err, "Skipping malformed stream event");
            PayloadOutcome::Events(vec![CompletionEvent::Noop])
        }
    }
}

/// Generic OpenAI-compatible [`StreamCompleter`].
#[derive(Clone)]
pub struct OpenAiCompleter {
    client: reqwest::Client,
    base_url: String,
    api_key_env: String,
    api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
    /// `auto`, `none`, or a forced tool name.
    pub tool_choice: Option<String>,
    pub response_format: Option<Value>,
    tools: Vec<ToolSpec>,
}

impl OpenAiCompleter {
    pub fn new(model: &str, base_url: &str, api_key_env: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key_env: api_key_env.to_string(),
            api_key: String::new(),
            model: model.to_string(),
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            max_tokens: None,
            tool_choice: None,
            response_format: None,
            tools: Vec::new(),
        }
    }

    pub fn openai(model: &str) -> Self {
        Self::new(model, OPENAI_BASE_URL, "OPENAI_API_KEY")
    }

    fn request_for(&self, chat: &Chat) -> ChatRequest {
        let mut request = ChatRequest::from_chat(&self.model, chat);
        request.temperature = self.temperature;
        request.top_p = self.top_p;
        request.frequency_penalty = self.frequency_penalty;
        request.presence_penalty = self.presence_penalty;
        request.max_tokens = self.max_tokens;
        request.response_format = self.response_format.clone();
        if !self.tools.is_empty() {
            request.tools = Some(self.tools.iter().map(ToolSpec::to_definition).collect());
            request.tool_choice = self
                .tool_choice
                .clone()
                .or_else(|| Some("auto".to_string()));
        }
        request
    }
}

impl ToolBox for OpenAiCompleter {
    fn register_tool(&mut self, spec: ToolSpec) {
        self.tools.retain(|existing| existing.name != spec.name);
        self.tools.push(spec);
    }
}

impl StreamCompleter for OpenAiCompleter {
    fn setup(&mut self) -> Result<(), CompleterError> {
        let api_key = std::env::var(&self.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            return Err(CompleterError::MissingApiKey {
                env_var: self.api_key_env.clone(),
            });
        }
        self.api_key = api_key;
        self.client = reqwest::Client::new();
        Ok(())
    }

    fn stream_completions(
        &self,
        chat: &Chat,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<CompletionEvent> {
        // Bounded at one entry: a slow consumer throttles the HTTP reader.
        let (tx, rx) = mpsc::channel(1);
        let client = self.client.clone();
        let url = construct_api_url(&self.base_url, "chat/completions");
        let api_key = self.api_key.clone();
        let request = self.request_for(chat);

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tx.try_send(CompletionEvent::Error(CompletionError::Cancelled));
                }
                _ = run_stream(client, url, api_key, request, tx.clone(), cancel.clone()) => {}
            }
        });

        rx
    }
}

async fn run_stream(
    client: reqwest::Client,
    url: String,
    api_key: String,
    request: ChatRequest,
    tx: mpsc::Sender<CompletionEvent>,
    cancel: CancellationToken,
) {
    debug!(url = %url, model = %request.model, "Starting completion stream");

    let response = match client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&request)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            let _ = tx
                .send(CompletionEvent::Error(CompletionError::Transport(
                    err.to_string(),
                )))
                .await;
            return;
        }
    };

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let limit = parse_rate_limit(response.headers());
        let _ = tx
            .send(CompletionEvent::Error(CompletionError::RateLimit(limit)))
            .await;
        return;
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        let _ = tx
            .send(CompletionEvent::Error(CompletionError::Transport(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            ))))
            .await;
        return;
    }

    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();
    let mut calls = ToolCallAccumulator::default();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let error = if cancel.is_cancelled() {
                    CompletionError::Cancelled
                } else {
                    CompletionError::Transport(err.to_string())
                };
                let _ = tx.send(CompletionEvent::Error(error)).await;
                return;
            }
        };

        for line in buffer.push(&chunk) {
            let Some(payload) = extract_data_payload(&line) else {
                continue;
            };
            match handle_data_payload(payload, &mut calls) {
                PayloadOutcome::Done => {
                    for call in calls.flush() {
                        if tx.send(CompletionEvent::ToolCall(call)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(CompletionEvent::End).await;
                    return;
                }
                PayloadOutcome::Events(events) => {
                    for event in events {
                        let fatal = matches!(event, CompletionEvent::Error(_));
                        if tx.send(event).await.is_err() {
                            return;
                        }
                        if fatal {
                            return;
                        }
                    }
                }
            }
        }
    }

    // Stream ended without a [DONE] sentinel; still deliver what we have.
    for call in calls.flush() {
        if tx.send(CompletionEvent::ToolCall(call)).await.is_err() {
            return;
        }
    }
    let _ = tx.send(CompletionEvent::End).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(payload: &str, calls: &mut ToolCallAccumulator) -> Vec<CompletionEvent> {
        match handle_data_payload(payload, calls) {
            PayloadOutcome::Events(events) => events,
            PayloadOutcome::Done => vec![CompletionEvent::End],
        }
    }

    #[test]
    fn sse_line_buffer_handles_chunk_boundaries() {
        let mut buffer = SseLineBuffer::default();
        assert_eq!(buffer.push(b"data: one\n\n"), vec!["data: one"]);
        assert_eq!(buffer.push(b"data: t"), Vec::<String>::new());
        assert_eq!(buffer.push(b"wo\r\n"), vec!["data: two"]);
    }

    #[test]
    fn payload_spacing_variants_produce_text_deltas() {
        let mut calls = ToolCallAccumulator::default();
        for (line, expected) in [
            (r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#, "Hello"),
            (r#"data:{"choices":[{"delta":{"content":"World"}}]}"#, "World"),
        ] {
            let payload = extract_data_payload(line).expect("payload");
            let events = handle(payload, &mut calls);
            assert!(matches!(
                &events[0],
                CompletionEvent::TextDelta(text) if text == expected
            ));
        }
    }

    #[test]
    fn done_sentinel_ends_the_stream() {
        let mut calls = ToolCallAccumulator::default();
        assert!(matches!(
            handle_data_payload("[DONE]", &mut calls),
            PayloadOutcome::Done
        ));
    }

    #[test]
    fn tool_calls_are_reassembled_from_deltas() {
        let mut calls = ToolCallAccumulator::default();

        let first = r#"{"choices":[{"delta":{"tool_calls":[
            {"index":0,"id":"c1","type":"function","function":{"name":"cat","arguments":"{\"pa"}}
        ]}}]}"#;
        let events = handle(first, &mut calls);
        assert!(matches!(events[0], CompletionEvent::Noop));

        let second = r#"{"choices":[{"delta":{"tool_calls":[
            {"index":0,"function":{"arguments":"th\":\"README\"}"}}
        ]},"finish_reason":"tool_calls"}]}"#;
        let events = handle(second, &mut calls);
        match &events[0] {
            CompletionEvent::ToolCall(call) => {
                assert_eq!(call.id, "c1");
                assert_eq!(call.name, "cat");
                assert_eq!(call.arguments, r#"{"path":"README"}"#);
            }
            other => panic!("expected tool call, got {:?}", other),
        }
        assert!(calls.is_empty());
    }

    #[test]
    fn parallel_tool_calls_flush_in_index_order() {
        let mut calls = ToolCallAccumulator::default();
        let payload = r#"{"choices":[{"delta":{"tool_calls":[
            {"index":1,"id":"c2","function":{"name":"ls","arguments":"{}"}},
            {"index":0,"id":"c1","function":{"name":"cat","arguments":"{}"}}
        ]},"finish_reason":"tool_calls"}]}"#;
        let events = handle(payload, &mut calls);
        let names: Vec<String> = events
            .iter()
            .filter_map(|event| match event {
                CompletionEvent::ToolCall(call) => Some(call.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["cat".to_string(), "ls".to_string()]);
    }

    #[test]
    fn error_payloads_surface_as_transport_errors() {
        let mut calls = ToolCallAccumulator::default();
        let events = handle(r#"{"error":{"message":"internal server error"}}"#, &mut calls);
        assert!(matches!(
            &events[0],
            CompletionEvent::Error(CompletionError::Transport(msg))
                if msg == "internal server error"
        ));
    }

    #[test]
    fn malformed_payloads_are_skipped() {
        let mut calls = ToolCallAccumulator::default();
        let events = handle("not json at all", &mut calls);
        assert!(matches!(events[0], CompletionEvent::Noop));
    }

    #[test]
    fn rate_limit_headers_are_parsed() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "30".parse().unwrap());
        headers.insert("x-ratelimit-limit-tokens", "1000".parse().unwrap());
        headers.insert("x-ratelimit-remaining-tokens", "0".parse().unwrap());

        let limit = parse_rate_limit(&headers);
        assert!(limit.reset_at.is_some());
        assert_eq!(limit.max_input_tokens, Some(1000));
        assert_eq!(limit.tokens_remaining, Some(0));
    }

    #[test]
    fn registered_tools_are_advertised_with_auto_choice() {
        let mut completer = OpenAiCompleter::openai("gpt-4o");
        completer.register_tool(ToolSpec::new("cat", "read", vec![], "text"));
        let chat = Chat::new("t");
        let request = completer.request_for(&chat);
        assert_eq!(request.tools.as_ref().map(Vec::len), Some(1));
        assert_eq!(request.tool_choice.as_deref(), Some("auto"));
    }

    #[test]
    fn extra_content_on_deltas_is_preserved() {
        let mut calls = ToolCallAccumulator::default();
        let payload = r#"{"choices":[{"delta":{"tool_calls":[
            {"index":0,"id":"g1","function":{"name":"noop","arguments":"{}"},
             "extra_content":{"google":{"thought_signature":"sig"}}}
        ]},"finish_reason":"tool_calls"}]}"#;
        let events = handle(payload, &mut calls);
        match &events[0] {
            CompletionEvent::ToolCall(call) => assert!(call.has_thought_signature()),
            other => panic!("expected tool call, got {:?}", other),
        }
    }
}

//! Anthropic messages API client.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chatsuite_core::models::{ChatMessage, MessageContent, MessageRole};
use chatsuite_core::parts::Part;
use chatsuite_core::{Error, Result};
use futures::StreamExt;
use serde_json::{Value, json};

use super::sse::{SseDecoder, SseFrame};
use super::{
    DeltaSink, FinishReason, LanguageModel, ToolCallRequest, TurnOutput, TurnRequest,
    provider_error,
};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// HTTP client for the Anthropic API.
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn model(self: &Arc<Self>, model_id: &str) -> AnthropicModel {
        AnthropicModel {
            client: Arc::clone(self),
            model_id: model_id.to_string(),
        }
    }
}

/// A model served by an [`AnthropicClient`].
pub struct AnthropicModel {
    client: Arc<AnthropicClient>,
    model_id: String,
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream_turn(
        &self,
        request: &TurnRequest,
        on_delta: DeltaSink<'_>,
    ) -> Result<TurnOutput> {
        let body = build_request_body(&self.model_id, request);
        let response = self
            .client
            .http
            .post(format!("{}/messages", self.client.base_url))
            .header("x-api-key", &self.client.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("anthropic request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(provider_error("anthropic", status, &text));
        }

        let mut stream = StreamAccumulator::default();
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        'read: while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| Error::Provider(format!("anthropic stream error: {e}")))?;
            for frame in decoder.push(&chunk) {
                if stream.apply(&frame, on_delta)? {
                    break 'read;
                }
            }
        }
        if let Some(frame) = decoder.finish() {
            stream.apply(&frame, on_delta)?;
        }

        Ok(stream.finish())
    }
}

fn build_request_body(model_id: &str, request: &TurnRequest) -> Value {
    let mut system = request.system.clone();
    let mut messages = Vec::with_capacity(request.messages.len());

    for message in &request.messages {
        match message.role {
            MessageRole::System => {
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&message.content.text());
            }
            _ => messages.push(to_anthropic_message(message)),
        }
    }

    let mut body = json!({
        "model": model_id,
        "max_tokens": MAX_TOKENS,
        "messages": messages,
        "stream": true,
    });
    if !system.trim().is_empty() {
        body["system"] = Value::String(system);
    }
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters,
                })
            })
            .collect();
    }
    body
}

fn to_anthropic_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        MessageRole::Assistant => "assistant",
        _ => "user",
    };

    let content = match &message.content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } if !text.is_empty() => {
                    Some(json!({"type": "text", "text": text}))
                }
                Part::Text { .. } => None,
                Part::ToolCall {
                    tool_call_id,
                    tool_name,
                    args,
                } => Some(json!({
                    "type": "tool_use",
                    "id": tool_call_id,
                    "name": tool_name,
                    "input": if args.is_object() { args.clone() } else { json!({}) },
                })),
                Part::ToolResult {
                    tool_call_id,
                    result,
                    ..
                } => Some(json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": result.to_string(),
                })),
            })
            .collect(),
    };

    json!({"role": role, "content": content})
}

#[derive(Debug, Default)]
struct ToolUseState {
    id: String,
    name: String,
    input: String,
}

#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    tools: BTreeMap<u64, ToolUseState>,
    finish: Option<FinishReason>,
}

impl StreamAccumulator {
    /// Apply one frame. Returns `true` on `message_stop`.
    fn apply(&mut self, frame: &SseFrame, on_delta: &mut (dyn FnMut(&str) + Send)) -> Result<bool> {
        let payload: Value = serde_json::from_str(&frame.data)
            .map_err(|e| Error::Provider(format!("anthropic stream decode error: {e}")))?;
        let kind = frame
            .event
            .as_deref()
            .or_else(|| payload.get("type").and_then(Value::as_str))
            .unwrap_or_default();
        let index = payload.get("index").and_then(Value::as_u64).unwrap_or(0);

        match kind {
            "content_block_start" => {
                let block = &payload["content_block"];
                if block["type"] == "tool_use" {
                    self.tools.insert(
                        index,
                        ToolUseState {
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            input: String::new(),
                        },
                    );
                }
            }
            "content_block_delta" => {
                let delta = &payload["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str().filter(|t| !t.is_empty()) {
                            on_delta(text);
                            self.text.push_str(text);
                        }
                    }
                    Some("input_json_delta") => {
                        if let (Some(state), Some(partial)) =
                            (self.tools.get_mut(&index), delta["partial_json"].as_str())
                        {
                            state.input.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(reason) = payload["delta"]["stop_reason"].as_str() {
                    self.finish = Some(match reason {
                        "end_turn" | "stop_sequence" => FinishReason::Stop,
                        "tool_use" => FinishReason::ToolCalls,
                        "max_tokens" => FinishReason::Length,
                        _ => FinishReason::Other,
                    });
                }
            }
            "message_stop" => return Ok(true),
            "error" => {
                let message = payload["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error");
                return Err(Error::Provider(format!("anthropic stream error: {message}")));
            }
            _ => {}
        }

        Ok(false)
    }

    fn finish(self) -> TurnOutput {
        let tool_calls: Vec<ToolCallRequest> = self
            .tools
            .into_values()
            .filter(|state| !state.name.is_empty())
            .map(|state| ToolCallRequest {
                id: state.id,
                name: state.name,
                args: if state.input.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&state.input).unwrap_or(Value::String(state.input))
                },
            })
            .collect();

        let finish = if tool_calls.is_empty() {
            self.finish.unwrap_or_default()
        } else {
            FinishReason::ToolCalls
        };

        TurnOutput {
            text: self.text,
            tool_calls,
            finish,
        }
    }
}

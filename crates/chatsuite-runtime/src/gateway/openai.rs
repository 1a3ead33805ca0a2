//! OpenAI-compatible chat completions client (OpenAI, xAI, Gemini's OpenAI endpoint).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chatsuite_core::models::{ChatMessage, MessageContent, MessageRole};
use chatsuite_core::parts::Part;
use chatsuite_core::{Error, Result};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};

use super::sse::{SseDecoder, SseFrame};
use super::{
    DeltaSink, FinishReason, LanguageModel, ToolCallRequest, TurnOutput, TurnRequest,
    provider_error,
};

/// HTTP client for one OpenAI-compatible endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Handle for a specific model on this endpoint.
    pub fn model(self: &Arc<Self>, model_id: &str) -> OpenAiModel {
        OpenAiModel {
            client: Arc::clone(self),
            model_id: model_id.to_string(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// A model served by an [`OpenAiClient`].
pub struct OpenAiModel {
    client: Arc<OpenAiClient>,
    model_id: String,
}

#[async_trait]
impl LanguageModel for OpenAiModel {
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
            .post(self.client.completions_url())
            .bearer_auth(&self.client.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("openai request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(provider_error("openai", status, &text));
        }

        let mut stream = StreamAccumulator::default();
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::Provider(format!("openai stream error: {e}")))?;
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
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.system.trim().is_empty() {
        messages.push(json!({"role": "system", "content": request.system}));
    }
    for message in &request.messages {
        messages.extend(to_openai_messages(message));
    }

    let mut body = json!({
        "model": model_id,
        "messages": messages,
        "stream": true,
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }
    body
}

fn to_openai_messages(message: &ChatMessage) -> Vec<Value> {
    match (message.role, &message.content) {
        (MessageRole::Tool, content) => content
            .parts()
            .into_iter()
            .filter_map(|part| match part {
                Part::ToolResult {
                    tool_call_id,
                    result,
                    ..
                } => Some(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": result.to_string(),
                })),
                _ => None,
            })
            .collect(),
        (MessageRole::Assistant, MessageContent::Parts(parts)) => {
            let text: String = parts.iter().filter_map(Part::text_content).collect();
            let tool_calls: Vec<Value> = parts
                .iter()
                .filter_map(|part| match part {
                    Part::ToolCall {
                        tool_call_id,
                        tool_name,
                        args,
                    } => Some(json!({
                        "id": tool_call_id,
                        "type": "function",
                        "function": {"name": tool_name, "arguments": args.to_string()},
                    })),
                    _ => None,
                })
                .collect();
            let mut value = json!({"role": "assistant", "content": text});
            if !tool_calls.is_empty() {
                value["tool_calls"] = Value::Array(tool_calls);
            }
            vec![value]
        }
        (role, content) => {
            let role = match role {
                MessageRole::System => "system",
                MessageRole::Assistant => "assistant",
                _ => "user",
            };
            vec![json!({"role": role, "content": content.text()})]
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<u32>,
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

#[derive(Debug, Default)]
struct ToolCallState {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Folds streamed chunks into a [`TurnOutput`].
#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    tools: BTreeMap<u32, ToolCallState>,
    finish: Option<FinishReason>,
}

impl StreamAccumulator {
    /// Apply one frame. Returns `true` on the `[DONE]` sentinel.
    fn apply(&mut self, frame: &SseFrame, on_delta: &mut (dyn FnMut(&str) + Send)) -> Result<bool> {
        let data = frame.data.trim();
        if data == "[DONE]" {
            return Ok(true);
        }

        let chunk: StreamChunk = serde_json::from_str(data)
            .map_err(|e| Error::Provider(format!("openai stream decode error: {e}")))?;

        for choice in chunk.choices.into_iter().filter(|c| c.index == 0) {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                on_delta(&content);
                self.text.push_str(&content);
            }
            for delta in choice.delta.tool_calls {
                let state = self.tools.entry(delta.index.unwrap_or(0)).or_default();
                if state.id.is_none() {
                    state.id = delta.id;
                }
                if let Some(function) = delta.function {
                    if state.name.is_none() {
                        state.name = function.name;
                    }
                    if let Some(arguments) = function.arguments {
                        state.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish = Some(match reason.as_str() {
                    "stop" => FinishReason::Stop,
                    "tool_calls" | "function_call" => FinishReason::ToolCalls,
                    "length" => FinishReason::Length,
                    _ => FinishReason::Other,
                });
            }
        }

        Ok(false)
    }

    fn finish(self) -> TurnOutput {
        let tool_calls: Vec<ToolCallRequest> = self
            .tools
            .into_values()
            .filter_map(|state| {
                let name = state.name?;
                let args = if state.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&state.arguments)
                        .unwrap_or(Value::String(state.arguments))
                };
                Some(ToolCallRequest {
                    id: state
                        .id
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name,
                    args,
                })
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

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &str) -> SseFrame {
        SseFrame {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn accumulates_text_and_fragmented_tool_calls() {
        let mut acc = StreamAccumulator::default();
        let mut deltas = Vec::new();
        let mut sink = |d: &str| deltas.push(d.to_string());

        let frames = [
            r#"{"choices":[{"index":0,"delta":{"content":"Let me "}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":"check."}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"browseInternet","arguments":"{\"que"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ry\":\"rust\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        ];
        for data in frames {
            assert!(!acc.apply(&frame(data), &mut sink).expect("apply"));
        }
        assert!(acc.apply(&frame("[DONE]"), &mut sink).expect("done"));

        let output = acc.finish();
        assert_eq!(deltas, vec!["Let me ", "check."]);
        assert_eq!(output.text, "Let me check.");
        assert_eq!(output.finish, FinishReason::ToolCalls);
        assert_eq!(
            output.tool_calls,
            vec![ToolCallRequest {
                id: "call_1".to_string(),
                name: "browseInternet".to_string(),
                args: json!({"query": "rust"}),
            }]
        );
    }

    #[test]
    fn malformed_chunk_is_a_provider_error() {
        let mut acc = StreamAccumulator::default();
        let err = acc.apply(&frame("{not json"), &mut |_: &str| {}).err();
        assert!(matches!(err, Some(Error::Provider(_))));
    }

    #[test]
    fn request_body_maps_tool_history() {
        let request = TurnRequest {
            system: "Be brief.".to_string(),
            messages: vec![
                ChatMessage::user("Find rust news"),
                ChatMessage::assistant(vec![Part::tool_call(
                    "call_1",
                    "browseInternet",
                    json!({"query": "rust news"}),
                )]),
                ChatMessage::tool(vec![Part::tool_result(
                    "call_1",
                    "browseInternet",
                    json!({"sources": []}),
                )]),
            ],
            tools: Vec::new(),
        };

        let body = build_request_body("gpt-4o-mini", &request);
        let messages = body["messages"].as_array().expect("messages");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["tool_calls"][0]["function"]["name"], "browseInternet");
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], true);
    }
}

//! Model gateway: maps model ids to provider clients behind one interface.

pub mod anthropic;
pub mod openai;
pub mod sse;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chatsuite_core::config::{ChatConfig, ProviderConfig};
use chatsuite_core::models::ChatMessage;
use chatsuite_core::{Config, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

/// Tool declaration sent to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// One model turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call this turn.
    pub tools: Vec<ToolSpec>,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
    Other,
}

/// Aggregated result of a streamed turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutput {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish: FinishReason,
}

/// Callback receiving text deltas as they arrive.
pub type DeltaSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Uniform streaming text + tool-calling interface over every provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier this handle calls.
    fn model_id(&self) -> &str;

    /// Run one turn, forwarding text deltas to `on_delta`.
    async fn stream_turn(&self, request: &TurnRequest, on_delta: DeltaSink<'_>)
    -> Result<TurnOutput>;
}

/// Handle returned by the gateway.
pub type ModelHandle = Arc<dyn LanguageModel>;

/// Run a single tool-less turn and return its text.
pub async fn complete(model: &dyn LanguageModel, system: &str, prompt: &str) -> Result<String> {
    let request = TurnRequest {
        system: system.to_string(),
        messages: vec![ChatMessage::user(prompt)],
        tools: Vec::new(),
    };
    let output = model.stream_turn(&request, &mut |_: &str| {}).await?;
    Ok(output.text)
}

/// Provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    OpenAi,
    Anthropic,
    Xai,
    Google,
}

/// Model id prefixes, checked in order.
const FAMILY_PREFIXES: &[(&str, ModelFamily)] = &[
    ("gpt-", ModelFamily::OpenAi),
    ("chatgpt-", ModelFamily::OpenAi),
    ("o1", ModelFamily::OpenAi),
    ("o3", ModelFamily::OpenAi),
    ("o4", ModelFamily::OpenAi),
    ("claude-", ModelFamily::Anthropic),
    ("grok-", ModelFamily::Xai),
    ("gemini-", ModelFamily::Google),
];

impl ModelFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamily::OpenAi => "openai",
            ModelFamily::Anthropic => "anthropic",
            ModelFamily::Xai => "xai",
            ModelFamily::Google => "google",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Some(ModelFamily::OpenAi),
            "anthropic" => Some(ModelFamily::Anthropic),
            "xai" | "grok" => Some(ModelFamily::Xai),
            "google" | "gemini" => Some(ModelFamily::Google),
            _ => None,
        }
    }

    /// Family for a model id by prefix, if any prefix matches.
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        let id = model_id.trim().to_lowercase();
        FAMILY_PREFIXES
            .iter()
            .find(|(prefix, _)| id.starts_with(prefix))
            .map(|(_, family)| *family)
    }

    /// Whether the family speaks the Anthropic messages protocol.
    fn is_anthropic(self) -> bool {
        matches!(self, ModelFamily::Anthropic)
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied API keys, keyed by provider family name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ApiKeys(HashMap<String, String>);

impl ApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, family: ModelFamily, key: impl Into<String>) -> Self {
        self.0.insert(family.as_str().to_string(), key.into());
        self
    }

    /// Non-blank key for a family.
    pub fn get(&self, family: ModelFamily) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| ModelFamily::parse(name) == Some(family))
            .map(|(_, key)| key.as_str())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|key| key.trim().is_empty())
    }
}

/// Resolves a model id to a callable handle.
pub trait ResolveModel: Send + Sync {
    fn resolve(&self, model_id: &str, api_keys: &ApiKeys) -> Result<ModelHandle>;
}

/// Provider client shared by every model of a family.
#[derive(Clone)]
enum ProviderClient {
    OpenAi(Arc<OpenAiClient>),
    Anthropic(Arc<AnthropicClient>),
}

impl ProviderClient {
    fn build(http: &reqwest::Client, family: ModelFamily, base_url: &str, key: String) -> Self {
        if family.is_anthropic() {
            ProviderClient::Anthropic(Arc::new(AnthropicClient::new(http.clone(), base_url, key)))
        } else {
            ProviderClient::OpenAi(Arc::new(OpenAiClient::new(http.clone(), base_url, key)))
        }
    }

    fn model(&self, model_id: &str) -> ModelHandle {
        match self {
            ProviderClient::OpenAi(client) => Arc::new(client.model(model_id)),
            ProviderClient::Anthropic(client) => Arc::new(client.model(model_id)),
        }
    }
}

/// Gateway over the configured providers.
///
/// Default clients are built once from configured keys and shared; a
/// request carrying its own key gets a fresh client.
pub struct ModelGateway {
    http: reqwest::Client,
    providers: HashMap<ModelFamily, ProviderConfig>,
    defaults: HashMap<ModelFamily, ProviderClient>,
    default_family: ModelFamily,
}

impl ModelGateway {
    pub fn new(http: reqwest::Client, providers: &[ProviderConfig], chat: &ChatConfig) -> Self {
        let mut configured = HashMap::new();
        let mut defaults = HashMap::new();

        for provider in providers {
            let Some(family) = ModelFamily::parse(&provider.family) else {
                tracing::warn!("Ignoring unknown provider family '{}'", provider.family);
                continue;
            };
            if let Some(key) = provider.resolve_api_key() {
                defaults.insert(
                    family,
                    ProviderClient::build(&http, family, &provider.base_url, key),
                );
            } else {
                tracing::debug!("No API key configured for {family}; requests need their own key");
            }
            configured.insert(family, provider.clone());
        }

        let default_family = ModelFamily::parse(&chat.default_provider).unwrap_or_else(|| {
            tracing::warn!(
                "Unknown default provider '{}', falling back to openai",
                chat.default_provider
            );
            ModelFamily::OpenAi
        });

        Self {
            http,
            providers: configured,
            defaults,
            default_family,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &Config) -> Self {
        Self::new(http, &config.providers, &config.chat)
    }

    /// Family a model id routes to.
    pub fn family_for(&self, model_id: &str) -> ModelFamily {
        ModelFamily::from_model_id(model_id).unwrap_or(self.default_family)
    }
}

impl ResolveModel for ModelGateway {
    fn resolve(&self, model_id: &str, api_keys: &ApiKeys) -> Result<ModelHandle> {
        let family = self.family_for(model_id);
        let provider = self.providers.get(&family).ok_or_else(|| {
            Error::Config(format!("Unsupported provider family '{family}' for model '{model_id}'"))
        })?;

        if let Some(key) = api_keys.get(family) {
            tracing::debug!(model = model_id, %family, "Using caller-supplied API key");
            let client =
                ProviderClient::build(&self.http, family, &provider.base_url, key.to_string());
            return Ok(client.model(model_id));
        }

        self.defaults
            .get(&family)
            .map(|client| client.model(model_id))
            .ok_or_else(|| Error::Config(format!("No API key configured for provider '{family}'")))
    }
}

pub(crate) fn provider_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let detail: String = body.chars().take(500).collect();
    Error::Provider(format!("{provider} returned {status}: {detail}"))
}

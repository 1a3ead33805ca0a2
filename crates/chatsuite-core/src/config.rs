//! Configuration types and loading for ChatSuite.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the ChatSuite database.
    pub database: PathBuf,

    /// Directory where uploaded files are stored.
    pub uploads_dir: PathBuf,

    /// Deployment environment. Error details are hidden in production.
    pub environment: Environment,

    /// Chat turn settings.
    pub chat: ChatConfig,

    /// Model provider endpoints, one per provider family.
    pub providers: Vec<ProviderConfig>,

    /// Web search and reader endpoints for the browsing tool.
    pub web: WebConfig,

    /// Embedding endpoint used when indexing uploads.
    pub embeddings: EmbeddingsConfig,

    /// Upload limits and chunking.
    pub uploads: UploadConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME);

        Self {
            database: data_dir.join("chatsuite.db"),
            uploads_dir: data_dir.join("uploads"),
            environment: Environment::default(),
            chat: ChatConfig::default(),
            providers: default_providers(),
            web: WebConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            uploads: UploadConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME)
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
            Ok(config)
        }
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.database = Self::expand_path(&self.database.to_string_lossy());
        self.uploads_dir = Self::expand_path(&self.uploads_dir.to_string_lossy());
    }

    /// Apply `CHATSUITE_DATABASE` / `CHATSUITE_ENVIRONMENT` overrides.
    pub fn apply_env_overrides(&mut self) {
        let prefix = crate::env_prefix();
        if let Some(value) = env_value(&format!("{prefix}_DATABASE")) {
            self.database = Self::expand_path(&value);
        }
        if let Some(value) = env_value(&format!("{prefix}_ENVIRONMENT")) {
            match value.to_lowercase().as_str() {
                "production" | "prod" => self.environment = Environment::Production,
                "development" | "dev" => self.environment = Environment::Development,
                other => tracing::warn!("Ignoring unknown {prefix}_ENVIRONMENT value '{other}'"),
            }
        }
    }

    /// Look up the provider entry for a family name.
    pub fn provider(&self, family: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|provider| provider.family.eq_ignore_ascii_case(family))
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// Chat turn configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Model used when a request does not select one.
    pub default_model: String,

    /// Small model used to title new chats.
    pub title_model: String,

    /// Provider family used for model ids with no known prefix.
    pub default_provider: String,

    /// Maximum model turns per request, counting tool round-trips.
    pub max_steps: usize,

    /// Credits charged per successful chat turn.
    pub cost_per_message: i64,

    /// Credits granted to newly provisioned users.
    pub signup_credits: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_string(),
            title_model: "gpt-4o-mini".to_string(),
            default_provider: "openai".to_string(),
            max_steps: 5,
            cost_per_message: 1,
            signup_credits: 10,
        }
    }
}

/// A model provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider family (e.g., "openai", "anthropic", "xai", "google").
    pub family: String,

    /// API base URL.
    pub base_url: String,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Inline API key. Prefer `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key, preferring the inline value over the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api_key_env.as_deref().and_then(env_value))
    }
}

/// Web search and reader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Search API endpoint (Serper-compatible).
    pub search_endpoint: String,

    /// Environment variable holding the search API key.
    pub search_api_key_env: String,

    /// Reader API base URL; the target URL is appended to it.
    pub reader_endpoint: String,

    /// Environment variable holding the reader API key (optional).
    pub reader_api_key_env: String,

    /// Maximum organic results fetched per query.
    pub max_results: usize,

    /// Maximum characters kept per scraped page.
    pub max_scraped_chars: usize,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            search_endpoint: "https://google.serper.dev/search".to_string(),
            search_api_key_env: "SERPER_API_KEY".to_string(),
            reader_endpoint: "https://r.jina.ai".to_string(),
            reader_api_key_env: "JINA_API_KEY".to_string(),
            max_results: 5,
            max_scraped_chars: 20_000,
            timeout_secs: 20,
        }
    }
}

impl WebConfig {
    pub fn search_api_key(&self) -> Option<String> {
        env_value(&self.search_api_key_env)
    }

    pub fn reader_api_key(&self) -> Option<String> {
        env_value(&self.reader_api_key_env)
    }
}

/// Embedding endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// OpenAI-compatible embeddings endpoint. Indexing is skipped when unset.
    pub endpoint: Option<String>,

    /// Embedding model name.
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            endpoint: Some("https://api.openai.com/v1/embeddings".to_string()),
            model: "text-embedding-3-small".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
        }
    }
}

impl EmbeddingsConfig {
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env.as_deref().and_then(env_value)
    }
}

/// Upload limits and chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted upload in bytes (inclusive).
    pub max_bytes: u64,

    /// Characters per extracted chunk.
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,

    /// Characters of the latest upload injected into the system prompt.
    pub context_chars: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 4 * 1024 * 1024,
            chunk_size: 1000,
            chunk_overlap: 200,
            context_chars: 4000,
        }
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    [
        ("openai", "https://api.openai.com/v1", "OPENAI_API_KEY"),
        ("anthropic", "https://api.anthropic.com/v1", "ANTHROPIC_API_KEY"),
        ("xai", "https://api.x.ai/v1", "XAI_API_KEY"),
        (
            "google",
            "https://generativelanguage.googleapis.com/v1beta/openai",
            "GOOGLE_API_KEY",
        ),
    ]
    .into_iter()
    .map(|(family, base_url, env)| ProviderConfig {
        family: family.to_string(),
        base_url: base_url.to_string(),
        api_key_env: Some(env.to_string()),
        api_key: None,
    })
    .collect()
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

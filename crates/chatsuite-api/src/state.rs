//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chatsuite_core::{Config, Database};
use chatsuite_runtime::embeddings::{Embedder, HttpEmbedder};
use chatsuite_runtime::web::HttpWebResearch;
use chatsuite_runtime::{ChatService, ModelGateway, ToolRegistry, UploadService};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub chats: Arc<ChatService>,
    pub uploads: Arc<UploadService>,
}

impl AppState {
    /// Wire the production services from configuration.
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Arc::new(
            Database::open(&config.database)
                .await
                .with_context(|| format!("Failed to open database {}", config.database.display()))?,
        );

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.web.timeout_secs))
            .user_agent(concat!("chatsuite/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let gateway = Arc::new(ModelGateway::from_config(http.clone(), &config));
        let web = Arc::new(HttpWebResearch::new(http.clone(), &config.web));
        let tools = Arc::new(ToolRegistry::new(Arc::clone(&db), web, &config.web));
        let embedder = HttpEmbedder::from_config(http, &config.embeddings)
            .map(|embedder| Arc::new(embedder) as Arc<dyn Embedder>);

        let chats = Arc::new(ChatService::new(Arc::clone(&db), gateway, tools, &config));
        let uploads = Arc::new(UploadService::new(
            Arc::clone(&db),
            embedder,
            config.uploads_dir.clone(),
            config.uploads.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            chats,
            uploads,
        })
    }
}

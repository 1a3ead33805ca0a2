//! Shared fakes for runtime integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatsuite_core::models::Profile;
use chatsuite_core::normalize::WireMessage;
use chatsuite_core::{Config, Database, Error, Result};
use chatsuite_runtime::embeddings::Embedder;
use chatsuite_runtime::gateway::{
    DeltaSink, FinishReason, ToolCallRequest, TurnOutput, TurnRequest,
};
use chatsuite_runtime::web::{SearchHit, WebResearch};
use chatsuite_runtime::{
    ApiKeys, ChatRequest, ChatService, LanguageModel, ModelHandle, ResolveModel, ToolRegistry,
};
use serde_json::{Value, json};
use tempfile::TempDir;

pub const CHAT_MODEL: &str = "gpt-test";
pub const TITLE_MODEL: &str = "gpt-title";

/// One scripted model turn.
pub enum Step {
    Reply(TurnOutput),
    Fail(String),
    Hang,
}

impl Step {
    pub fn text(text: &str) -> Self {
        Step::Reply(TurnOutput {
            text: text.to_string(),
            tool_calls: Vec::new(),
            finish: FinishReason::Stop,
        })
    }

    /// A reply the provider stopped at its output limit.
    pub fn truncated(text: &str) -> Self {
        Step::Reply(TurnOutput {
            text: text.to_string(),
            tool_calls: Vec::new(),
            finish: FinishReason::Length,
        })
    }

    pub fn tool(id: &str, name: &str, args: Value) -> Self {
        Step::Reply(TurnOutput {
            text: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: id.to_string(),
                name: name.to_string(),
                args,
            }],
            finish: FinishReason::ToolCalls,
        })
    }
}

/// Model that replays a fixed script and records what it was asked.
pub struct ScriptedModel {
    id: String,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedModel {
    pub fn new(id: &str, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn stream_turn(
        &self,
        request: &TurnRequest,
        on_delta: DeltaSink<'_>,
    ) -> Result<TurnOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let step = self.steps.lock().expect("steps lock").pop_front();

        match step {
            Some(Step::Reply(output)) => {
                for word in output.text.split_inclusive(' ') {
                    on_delta(word);
                }
                Ok(output)
            }
            Some(Step::Fail(message)) => Err(Error::Provider(message)),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(TurnOutput::default())
            }
            None => Ok(TurnOutput::default()),
        }
    }
}

/// Resolves the two scripted models by id.
pub struct FakeResolver {
    models: HashMap<String, ModelHandle>,
}

impl FakeResolver {
    pub fn new(chat: Arc<ScriptedModel>, title: Arc<ScriptedModel>) -> Self {
        let mut models: HashMap<String, ModelHandle> = HashMap::new();
        models.insert(CHAT_MODEL.to_string(), chat);
        models.insert(TITLE_MODEL.to_string(), title);
        Self { models }
    }
}

impl ResolveModel for FakeResolver {
    fn resolve(&self, model_id: &str, _api_keys: &ApiKeys) -> Result<ModelHandle> {
        self.models
            .get(model_id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("Unsupported provider family for '{model_id}'")))
    }
}

/// Search returns a fixed list; reads fail for the listed URLs.
pub struct FakeWeb {
    hits: Vec<SearchHit>,
    failing: HashSet<String>,
}

impl FakeWeb {
    pub fn with_sources(count: usize, failing: &[&str]) -> Self {
        Self {
            hits: (1..=count)
                .map(|n| SearchHit {
                    title: format!("Source {n}"),
                    url: format!("https://example.com/{n}"),
                })
                .collect(),
            failing: failing.iter().map(|url| (*url).to_string()).collect(),
        }
    }
}

#[async_trait]
impl WebResearch for FakeWeb {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        Ok(self.hits.iter().take(limit).cloned().collect())
    }

    async fn read(&self, url: &str) -> Result<String> {
        if self.failing.contains(url) {
            return Err(Error::Provider(format!("reader returned 502 for {url}")));
        }
        Ok(format!("Article body from   {url}\n\nwith   extra    spacing."))
    }
}

/// Embedder returning a fixed two-dimensional vector per input.
pub struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|_| vec![0.25, 0.75]).collect())
    }
}

/// A chat service wired to scripted models and a temp database.
pub struct Harness {
    pub db: Arc<Database>,
    pub service: Arc<ChatService>,
    pub chat_model: Arc<ScriptedModel>,
    pub title_model: Arc<ScriptedModel>,
    pub config: Config,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new(chat_steps: Vec<Step>, title_steps: Vec<Step>) -> Self {
        Self::with_web(chat_steps, title_steps, FakeWeb::with_sources(0, &[])).await
    }

    pub async fn with_web(chat_steps: Vec<Step>, title_steps: Vec<Step>, web: FakeWeb) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.database = dir.path().join("chatsuite.db");
        config.uploads_dir = dir.path().join("uploads");
        config.chat.default_model = CHAT_MODEL.to_string();
        config.chat.title_model = TITLE_MODEL.to_string();

        let db = Arc::new(Database::open(&config.database).await.expect("open db"));
        let chat_model = ScriptedModel::new(CHAT_MODEL, chat_steps);
        let title_model = ScriptedModel::new(TITLE_MODEL, title_steps);
        let resolver = Arc::new(FakeResolver::new(
            Arc::clone(&chat_model),
            Arc::clone(&title_model),
        ));
        let tools = Arc::new(ToolRegistry::new(
            Arc::clone(&db),
            Arc::new(web),
            &config.web,
        ));
        let service = Arc::new(ChatService::new(Arc::clone(&db), resolver, tools, &config));

        Self {
            db,
            service,
            chat_model,
            title_model,
            config,
            dir,
        }
    }

    pub async fn user(&self, credits: i64) -> Profile {
        let (profile, _token) = self
            .db
            .create_profile(Some("user@example.com"), credits)
            .await
            .expect("create profile");
        profile
    }

    pub async fn credits(&self, user: &Profile) -> i64 {
        self.db.credits_for(&user.id).await.expect("balance")
    }
}

/// A request carrying one user message.
pub fn user_turn(chat_id: &str, text: &str) -> ChatRequest {
    ChatRequest {
        id: chat_id.to_string(),
        messages: vec![WireMessage {
            id: Some(format!("{chat_id}-user")),
            role: "user".to_string(),
            content: json!(text),
        }],
        ..ChatRequest::default()
    }
}

/// Poll until the balance matches or a second passes.
pub async fn wait_for_credits(db: &Database, user: &Profile, expected: i64) -> i64 {
    let mut balance = db.credits_for(&user.id).await.expect("balance");
    for _ in 0..100 {
        if balance == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        balance = db.credits_for(&user.id).await.expect("balance");
    }
    balance
}

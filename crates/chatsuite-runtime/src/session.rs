//! Chat turn orchestration.
//!
//! A turn is validated, bound to its chat, persisted inbound, charged and
//! then generated on a spawned task that streams [`StreamEvent`]s back.
//! Everything that can reject the request happens before the stream starts,
//! so callers can still answer with a plain status code.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError};

use chatsuite_core::config::{ChatConfig, Environment};
use chatsuite_core::credits::{CreditPolicy, UsageConfig};
use chatsuite_core::models::{
    Chat, ChatMessage, CreditUsage, DEFAULT_CHAT_TITLE, Document, Message,
    MessageContent, MessageRole, Profile, generate_id,
};
use chatsuite_core::normalize::{
    WireMessage, describe_shape, to_chat_message, to_chat_messages, validate_and_clean_messages,
};
use chatsuite_core::parts::Part;
use chatsuite_core::{Config, Database, Error, Result};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use crate::events::{EventSink, StreamEvent};
use crate::gateway::{ApiKeys, FinishReason, ModelHandle, ResolveModel, TurnRequest};
use crate::prompt::{PromptOptions, system_prompt};
use crate::title::generate_title;
use crate::tools::{ToolContext, ToolName, ToolRegistry, active_tools};

/// Status shown when a step is cut off by the model's output limit.
pub const TRUNCATED_STATUS: &str = "Response was cut short by the model's length limit";

/// Body of a chat request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub selected_model_id: Option<String>,
    #[serde(default)]
    pub is_browse_enabled: bool,
    /// Per-provider keys supplied by the caller.
    #[serde(default)]
    pub api_keys: ApiKeys,
}

/// Per-chat async mutexes. Turns on one chat run one at a time.
#[derive(Debug, Default)]
pub struct ChatLocks {
    inner: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn acquire(&self, chat_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(chat_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Chats with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A running turn.
///
/// Dropping it (or its receiver half) cancels generation and refunds the
/// reserved credits.
pub struct TurnStream {
    pub chat_id: String,
    pub usage: CreditUsage,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: DropGuard,
}

impl TurnStream {
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Drain events until the stream ends.
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    /// Stop the turn without waiting for it.
    pub fn cancel(self) {
        drop(self.cancel);
    }
}

/// Everything a spawned turn needs.
struct Turn {
    chat: Chat,
    user_id: String,
    model: ModelHandle,
    title_model: Option<ModelHandle>,
    first_message: String,
    system: String,
    history: Vec<ChatMessage>,
    active: Vec<ToolName>,
    usage: CreditUsage,
    sink: EventSink,
}

/// Runs chat turns.
pub struct ChatService {
    db: Arc<Database>,
    models: Arc<dyn ResolveModel>,
    tools: Arc<ToolRegistry>,
    chat: ChatConfig,
    environment: Environment,
    file_context_chars: usize,
    policy: CreditPolicy,
    locks: ChatLocks,
}

impl ChatService {
    pub fn new(
        db: Arc<Database>,
        models: Arc<dyn ResolveModel>,
        tools: Arc<ToolRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            models,
            tools,
            policy: CreditPolicy::new(config.chat.cost_per_message),
            chat: config.chat.clone(),
            environment: config.environment,
            file_context_chars: config.uploads.context_chars,
            locks: ChatLocks::default(),
        }
    }

    /// Validate, persist and charge a turn, then start generating.
    pub async fn start_turn(
        self: &Arc<Self>,
        user: &Profile,
        request: ChatRequest,
    ) -> Result<TurnStream> {
        let chat_id = request.id.trim().to_string();
        if chat_id.is_empty() {
            return Err(Error::Validation("chat id is required".to_string()));
        }

        let cleaned = validate_and_clean_messages(request.messages);
        if cleaned.is_empty() {
            return Err(Error::NoValidMessages);
        }
        let history = to_chat_messages(&cleaned);
        let (inbound_id, inbound) = cleaned
            .iter()
            .rev()
            .find_map(|wire| {
                let message = to_chat_message(wire)?;
                (message.role == MessageRole::User).then(|| (wire.id.clone(), message))
            })
            .ok_or_else(|| Error::Validation("No user message found".to_string()))?;

        let lock = self.locks.acquire(&chat_id).await;

        let chat = self.resolve_chat(user, &chat_id).await?;

        self.persist_inbound(&chat.id, inbound_id, &inbound.content).await?;

        let latest_file = match self.db.latest_file_for_user(&user.id).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Could not load latest upload for prompt context: {e}");
                None
            }
        };

        let model_id = request
            .selected_model_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.chat.default_model.clone());
        let usage_config = UsageConfig {
            model_id: model_id.clone(),
            browse_enabled: request.is_browse_enabled,
            has_attachments: latest_file.is_some(),
        };
        let usage = self.reserve_credits(&user.id, &usage_config).await?;

        let model = match self.models.resolve(&model_id, &request.api_keys) {
            Ok(model) => model,
            Err(e) => {
                self.refund(&user.id, usage.cost).await;
                return Err(e);
            }
        };
        let title_model = if chat.has_default_title() {
            self.models
                .resolve(&self.chat.title_model, &request.api_keys)
                .map_err(|e| tracing::warn!("Title model unavailable: {e}"))
                .ok()
        } else {
            None
        };

        let system = system_prompt(&PromptOptions {
            browse_enabled: request.is_browse_enabled,
            latest_file: latest_file.as_ref(),
            file_context_chars: self.file_context_chars,
        });

        let (sink, events) = EventSink::channel();
        let token = CancellationToken::new();
        let turn = Turn {
            first_message: inbound.content.text(),
            user_id: user.id.clone(),
            chat: chat.clone(),
            model,
            title_model,
            system,
            history,
            active: active_tools(request.is_browse_enabled),
            usage,
            sink,
        };

        let span = tracing::info_span!("chat_turn", chat_id = %chat.id, user_id = %user.id, model = %model_id);
        let service = Arc::clone(self);
        let cancel = token.clone();
        tokio::spawn(
            async move {
                let _lock = lock;
                service.run_turn(turn, cancel).await;
            }
            .instrument(span),
        );

        Ok(TurnStream {
            chat_id: chat.id,
            usage,
            events,
            cancel: token.drop_guard(),
        })
    }

    /// Store the user's message in `chat_id`.
    ///
    /// The client's message ID is kept when it is free or already names
    /// this message in this chat (a retried request). An ID held by another
    /// chat is replaced with a fresh one.
    async fn persist_inbound(
        &self,
        chat_id: &str,
        client_id: Option<String>,
        content: &MessageContent,
    ) -> Result<Message> {
        let mut message = Message {
            id: client_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(generate_id),
            chat_id: chat_id.to_string(),
            role: MessageRole::User,
            content: content.clone(),
            created_at: Utc::now(),
        };
        self.db.insert_message(&message).await?;

        let owner = self.db.message_chat_id(&message.id).await?;
        if owner.as_deref() != Some(chat_id) {
            tracing::debug!(
                client_id = %message.id,
                "Message ID belongs to another chat; storing under a new ID"
            );
            message.id = generate_id();
            self.db.insert_message(&message).await?;
        }
        Ok(message)
    }

    /// Load or create the chat, enforcing ownership.
    async fn resolve_chat(&self, user: &Profile, chat_id: &str) -> Result<Chat> {
        if let Some(chat) = self.db.get_chat(chat_id).await? {
            if chat.user_id != user.id {
                return Err(Error::Unauthorized("chat belongs to another user".to_string()));
            }
            return Ok(chat);
        }

        let chat = Chat {
            id: chat_id.to_string(),
            user_id: user.id.clone(),
            title: DEFAULT_CHAT_TITLE.to_string(),
            created_at: Utc::now(),
        };
        if !self.db.create_chat(&chat).await? {
            // Lost a creation race to another request; re-read the winner.
            return match self.db.get_chat(chat_id).await? {
                Some(existing) if existing.user_id == user.id => Ok(existing),
                Some(_) => Err(Error::Unauthorized("chat belongs to another user".to_string())),
                None => Err(Error::NotFound(format!("chat '{chat_id}'"))),
            };
        }
        tracing::info!(chat_id, "Created chat");
        Ok(chat)
    }

    /// Check the balance and atomically charge the turn.
    async fn reserve_credits(&self, user_id: &str, config: &UsageConfig) -> Result<CreditUsage> {
        let balance = self.db.credits_for(user_id).await?;
        let check = self.policy.check(balance, config);
        let reason = check.reason.clone().unwrap_or_default();
        if !check.can_use {
            return Err(Error::InsufficientCredits {
                required: check.required_credits,
                reason,
            });
        }

        match self
            .db
            .try_consume_credits(user_id, check.required_credits)
            .await?
        {
            Some(remaining) => Ok(CreditUsage {
                cost: check.required_credits,
                remaining,
            }),
            None => {
                let recheck = self.policy.check(0, config);
                Err(Error::InsufficientCredits {
                    required: recheck.required_credits,
                    reason: recheck.reason.unwrap_or_default(),
                })
            }
        }
    }

    async fn refund(&self, user_id: &str, cost: i64) {
        match self.db.add_credits(user_id, cost).await {
            Ok(balance) => tracing::info!(cost, balance, "Refunded turn credits"),
            Err(e) => tracing::error!(cost, "Failed to refund credits: {e}"),
        }
    }

    async fn run_turn(&self, turn: Turn, cancel: CancellationToken) {
        let generation = async {
            let (_, messages) = tokio::join!(self.retitle(&turn), self.generate(&turn));
            messages
        };
        let outcome = cancellable(&cancel, generation).await;

        let messages = match outcome {
            Ok(messages) => messages,
            Err(Error::Cancelled) => {
                tracing::info!("Turn cancelled by client");
                self.refund(&turn.user_id, turn.usage.cost).await;
                return;
            }
            Err(e) => {
                tracing::error!(
                    messages = turn.history.len(),
                    shape = %describe_shape(&turn.history),
                    "Chat turn failed: {e}"
                );
                self.refund(&turn.user_id, turn.usage.cost).await;
                turn.sink.emit(StreamEvent::Error {
                    message: self.public_message(&e),
                });
                return;
            }
        };

        if let Err(e) = self.db.insert_messages(&messages).await {
            tracing::error!(count = messages.len(), "Failed to persist turn: {e}");
            self.refund(&turn.user_id, turn.usage.cost).await;
            turn.sink.emit(StreamEvent::Error {
                message: self.public_message(&e),
            });
            return;
        }

        tracing::info!(
            count = messages.len(),
            remaining = turn.usage.remaining,
            "Chat turn complete"
        );
        turn.sink.emit(StreamEvent::Done {
            message_ids: messages.into_iter().map(|m| m.id).collect(),
            credits: turn.usage,
        });
    }

    /// Replace the default title once. Never fails the turn.
    async fn retitle(&self, turn: &Turn) {
        let Some(model) = &turn.title_model else {
            return;
        };
        let title = generate_title(model.as_ref(), &turn.first_message).await;
        if title == DEFAULT_CHAT_TITLE {
            return;
        }
        match self.db.rename_default_title(&turn.chat.id, &title).await {
            Ok(true) => tracing::debug!(%title, "Chat titled"),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to save chat title: {e}"),
        }
    }

    /// The generation loop, bounded by `max_steps` model turns.
    async fn generate(&self, turn: &Turn) -> Result<Vec<Message>> {
        let mut transcript = turn.history.clone();
        let mut produced = Vec::new();
        let tools = ToolRegistry::specs(&turn.active);
        let max_steps = self.chat.max_steps.max(1);

        for step in 1..=max_steps {
            let request = TurnRequest {
                system: turn.system.clone(),
                messages: transcript.clone(),
                tools: tools.clone(),
            };
            let sink = turn.sink.clone();
            let output = turn
                .model
                .stream_turn(&request, &mut |delta: &str| sink.text_delta(delta))
                .await?;
            if output.finish == FinishReason::Length {
                tracing::warn!(step, "Model output hit the length limit");
                turn.sink.status(TRUNCATED_STATUS);
            }

            let mut parts = Vec::new();
            if !output.text.is_empty() {
                parts.push(Part::text(output.text.as_str()));
            }
            for call in &output.tool_calls {
                parts.push(Part::tool_call(&call.id, &call.name, call.args.clone()));
            }
            if parts.is_empty() {
                tracing::debug!(step, "Model ended the turn without output");
                break;
            }

            let assistant = new_message(&turn.chat.id, MessageRole::Assistant, parts.clone());
            turn.sink.emit(StreamEvent::MessageId {
                message_id: assistant.id.clone(),
            });
            produced.push(assistant);
            transcript.push(ChatMessage::assistant(parts));

            if output.tool_calls.is_empty() {
                break;
            }

            let ctx = ToolContext {
                user_id: &turn.user_id,
                sink: &turn.sink,
                model: turn.model.as_ref(),
                active: &turn.active,
            };
            let mut results = Vec::with_capacity(output.tool_calls.len());
            for call in &output.tool_calls {
                turn.sink.emit(StreamEvent::ToolCall {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    args: call.args.clone(),
                });
                let tool_output = self.tools.execute(&ctx, call).await;
                if tool_output.is_error() {
                    tracing::debug!(tool = %call.name, "Tool returned an error result");
                }
                let result = tool_output.to_value();
                turn.sink.emit(StreamEvent::ToolResult {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    result: result.clone(),
                });
                results.push(Part::tool_result(&call.id, &call.name, result));
            }

            produced.push(new_message(&turn.chat.id, MessageRole::Tool, results.clone()));
            transcript.push(ChatMessage::tool(results));

            if step == max_steps {
                tracing::warn!(max_steps, "Step limit reached after a tool call");
            }
        }

        Ok(produced)
    }

    /// Client-facing text for an internal failure.
    fn public_message(&self, error: &Error) -> String {
        if self.environment.is_production() {
            "Something went wrong. Please try again.".to_string()
        } else {
            format!("Something went wrong: {error}")
        }
    }

    // =========================================================================
    // Chat management
    // =========================================================================

    /// Delete a chat the caller owns.
    pub async fn delete_chat(&self, user: &Profile, chat_id: &str) -> Result<()> {
        self.owned_chat(user, chat_id).await?;
        let _lock = self.locks.acquire(chat_id).await;
        self.db.delete_chat(chat_id).await?;
        tracing::info!(chat_id, "Deleted chat");
        Ok(())
    }

    pub async fn list_chats(&self, user: &Profile, limit: Option<i64>) -> Result<Vec<Chat>> {
        self.db.list_chats(&user.id, limit).await
    }

    /// Stored transcript of a chat the caller owns.
    pub async fn transcript(&self, user: &Profile, chat_id: &str) -> Result<Vec<Message>> {
        self.owned_chat(user, chat_id).await?;
        self.db.get_messages(chat_id).await
    }

    /// A canvas document the caller owns.
    pub async fn document(&self, user: &Profile, id: &str) -> Result<Document> {
        match self.db.get_document(id).await? {
            Some(doc) if doc.user_id == user.id => Ok(doc),
            Some(_) => Err(Error::Unauthorized("document belongs to another user".to_string())),
            None => Err(Error::NotFound(format!("document '{id}'"))),
        }
    }

    async fn owned_chat(&self, user: &Profile, chat_id: &str) -> Result<Chat> {
        match self.db.get_chat(chat_id).await? {
            Some(chat) if chat.user_id == user.id => Ok(chat),
            Some(_) => Err(Error::Unauthorized("chat belongs to another user".to_string())),
            None => Err(Error::NotFound(format!("chat '{chat_id}'"))),
        }
    }
}

fn new_message(chat_id: &str, role: MessageRole, parts: Vec<Part>) -> Message {
    Message {
        id: generate_id(),
        chat_id: chat_id.to_string(),
        role,
        content: MessageContent::Parts(parts),
        created_at: Utc::now(),
    }
}

/// Run `future` unless `token` is cancelled first.
pub async fn cancellable<T>(
    token: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

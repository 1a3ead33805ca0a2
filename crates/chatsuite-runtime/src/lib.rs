//! chatsuite-runtime: the chat turn pipeline
//!
//! This crate provides the model gateway and provider clients, the tool
//! registry, web research and embedding clients, system prompt and title
//! generation, and the session orchestrator that streams a credit-gated
//! chat turn to the client. Upload ingestion lives here as well.

pub mod embeddings;
pub mod events;
pub mod gateway;
pub mod prompt;
pub mod session;
pub mod title;
pub mod tools;
pub mod uploads;
pub mod web;

pub use events::{EventSink, StreamEvent};
pub use gateway::{ApiKeys, LanguageModel, ModelGateway, ModelHandle, ResolveModel};
pub use session::{ChatRequest, ChatService, TurnStream};
pub use tools::ToolRegistry;
pub use uploads::{IncomingFile, UploadReceipt, UploadService};

//! chatsuite-core: storage and bookkeeping for ChatSuite
//!
//! This crate provides configuration, the SQLite store for chats, messages,
//! documents and uploads, the credit gate, and the conversions between wire,
//! provider-neutral and storage message shapes.

pub mod config;
pub mod credits;
pub mod db;
pub mod error;
pub mod extract;
pub mod models;
pub mod normalize;
pub mod parts;
pub mod schema;

pub use config::Config;
pub use db::Database;
pub use error::Error;
pub use error::Result;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "chatsuite";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "CHATSUITE".to_string()
}

//! Streaming chat client core for Ollama- and OpenAI-compatible LLM
//! inference servers, with SQLite-backed chat history.
//!
//! The crate is UI-agnostic: a front end owns a [`Session`], drives
//! [`Session::send`], and observes each chat's live response through the
//! watch channel handed out by [`Chat::subscribe`].

pub mod chat;
pub mod message;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod session;
pub mod storage;

pub use chat::{Chat, ChatConfig, ChatRecord, Model};
pub use message::{Message, Role};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use provider::{ProviderConfig, ProviderError, ProviderKind, StreamProgress};
pub use session::Session;
pub use storage::{Storage, StorageError, StoredChat};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("chat {0} already has a response streaming")]
    ChatBusy(String),
    #[error("unknown chat id: {0}")]
    UnknownChat(String),
}

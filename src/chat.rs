//! The chat aggregate: a named conversation bound to a backend model, plus
//! its flat persisted record shape.

use crate::message::Message;
use crate::provider::{ProviderConfig, StreamProgress};
use crate::storage::Storage;
use crate::AppError;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Which backend/model pair serves a chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub provider: ProviderConfig,
}

impl Model {
    pub fn new(name: impl Into<String>, provider: ProviderConfig) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }
}

/// Per-chat configuration. Only an optional system message today.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatConfig {
    pub system: Option<Message>,
}

impl ChatConfig {
    pub fn with_system(content: impl Into<String>) -> Self {
        Self {
            system: Some(Message::system(content)),
        }
    }
}

/// Storage shape of [`ChatConfig`]: the system message flattened to its
/// content, absent when unset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfigRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl From<&ChatConfig> for ChatConfigRecord {
    fn from(config: &ChatConfig) -> Self {
        Self {
            system: config.system.as_ref().map(|m| m.content.clone()),
        }
    }
}

impl From<ChatConfigRecord> for ChatConfig {
    fn from(record: ChatConfigRecord) -> Self {
        Self {
            system: record.system.map(Message::system),
        }
    }
}

/// The flat, serializable representation of a chat as stored in the
/// database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRecord {
    pub name: String,
    pub model: Model,
    pub messages: Vec<Message>,
    pub config: ChatConfigRecord,
}

/// A conversation: ordered messages, the model that serves them, and a
/// transient progress signal for the in-flight response. The id is assigned
/// by storage on creation and never changes.
#[derive(Debug)]
pub struct Chat {
    id: String,
    name: String,
    model: Model,
    messages: Vec<Message>,
    config: ChatConfig,
    progress: watch::Sender<StreamProgress>,
}

impl Chat {
    pub(crate) fn new(id: String, name: String, model: Model, config: ChatConfig) -> Self {
        Self::assemble(id, name, model, Vec::new(), config)
    }

    pub(crate) fn from_record(id: String, record: ChatRecord) -> Self {
        Self::assemble(
            id,
            record.name,
            record.model,
            record.messages,
            record.config.into(),
        )
    }

    fn assemble(
        id: String,
        name: String,
        model: Model,
        messages: Vec<Message>,
        config: ChatConfig,
    ) -> Self {
        let (progress, _) = watch::channel(StreamProgress::default());
        Self {
            id,
            name,
            model,
            messages,
            config,
            progress,
        }
    }

    /// Storage shape of the current state.
    pub fn record(&self) -> ChatRecord {
        ChatRecord {
            name: self.name.clone(),
            model: self.model.clone(),
            messages: self.messages.clone(),
            config: (&self.config).into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Live view of the in-flight response. Receivers see the latest
    /// progress value; intermediate values may coalesce.
    pub fn subscribe(&self) -> watch::Receiver<StreamProgress> {
        self.progress.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.progress.borrow().streaming
    }

    /// Sends a user prompt. The user message is appended and persisted
    /// before the reply resolves; the assistant reply is appended once it
    /// does. A chat with a response still streaming rejects further sends.
    pub(crate) async fn send(&mut self, prompt: &str, storage: &mut Storage) -> Result<(), AppError> {
        if self.is_streaming() {
            return Err(AppError::ChatBusy(self.id.clone()));
        }
        let history = self.messages.clone();
        let prompt = Message::user(prompt);
        self.messages.push(prompt.clone());
        self.save(storage)?;
        let reply = self
            .model
            .provider
            .chat(
                &self.model.name,
                self.config.system.as_ref(),
                &history,
                &prompt,
                &self.progress,
            )
            .await?;
        self.messages.push(reply);
        self.save(storage)
    }

    pub(crate) fn rename(
        &mut self,
        name: impl Into<String>,
        storage: &mut Storage,
    ) -> Result<(), AppError> {
        self.name = name.into();
        self.save(storage)
    }

    pub(crate) fn set_model(&mut self, model: Model, storage: &mut Storage) -> Result<(), AppError> {
        self.model = model;
        self.save(storage)
    }

    pub(crate) fn set_config(
        &mut self,
        config: ChatConfig,
        storage: &mut Storage,
    ) -> Result<(), AppError> {
        self.config = config;
        self.save(storage)
    }

    /// Full-state write of this chat.
    fn save(&self, storage: &mut Storage) -> Result<(), AppError> {
        storage.update(&self.record(), &self.id)?;
        Ok(())
    }
}

// The progress channel is transient state and excluded from equality.
impl PartialEq for Chat {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.model == other.model
            && self.messages == other.messages
            && self.config == other.config
    }
}

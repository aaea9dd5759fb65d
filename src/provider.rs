//! Provider selection and the streaming accumulation driver.
//!
//! A [`ProviderConfig`] names a backend host and which wire format it
//! speaks; dispatch is a closed match, so adding a provider means adding a
//! [`ProviderKind`] variant and its client. The driver owns the progress
//! signal lifecycle for every variant.

use crate::message::Message;
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("malformed stream chunk: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("provider has no chat implementation")]
    Unimplemented,
}

/// Which wire format a host speaks. Unknown tags deserialize to `Generic`,
/// which lists no models and cannot chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    #[serde(other)]
    Generic,
}

/// Backend address plus wire-format tag; the `provider` field of the
/// persisted record shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: ProviderKind,
    pub host: String,
}

impl ProviderConfig {
    pub fn ollama(host: impl Into<String>) -> Self {
        Self {
            name: ProviderKind::Ollama,
            host: host.into(),
        }
    }

    pub fn openai(host: impl Into<String>) -> Self {
        Self {
            name: ProviderKind::OpenAi,
            host: host.into(),
        }
    }

    /// Streamed chat completion against this backend. Progress updates are
    /// published on `progress` for the lifetime of the stream; the
    /// accumulated assistant message is returned once it terminates.
    pub async fn chat(
        &self,
        model: &str,
        system: Option<&Message>,
        history: &[Message],
        prompt: &Message,
        progress: &watch::Sender<StreamProgress>,
    ) -> Result<Message, ProviderError> {
        match self.name {
            ProviderKind::Ollama => {
                OllamaClient::new(self.host.as_str())
                    .chat(model, system, history, prompt, progress)
                    .await
            }
            ProviderKind::OpenAi => {
                OpenAiClient::new(self.host.as_str())
                    .chat(model, system, history, prompt, progress)
                    .await
            }
            ProviderKind::Generic => Err(ProviderError::Unimplemented),
        }
    }

    /// Model names served by this backend. `Generic` knows none.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        match self.name {
            ProviderKind::Ollama => OllamaClient::new(self.host.as_str()).list_models().await,
            ProviderKind::OpenAi => OpenAiClient::new(self.host.as_str()).list_models().await,
            ProviderKind::Generic => Ok(Vec::new()),
        }
    }
}

/// Live view of an in-flight response, published through a watch channel.
/// `content` is the text accumulated so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamProgress {
    pub streaming: bool,
    pub content: String,
}

/// Request body shared by both chat endpoints: the optional system message,
/// the history, and the new prompt, in conversation order.
#[derive(Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<&'a Message>,
    pub stream: bool,
}

impl<'a> ChatRequest<'a> {
    pub fn new(
        model: &'a str,
        system: Option<&'a Message>,
        history: &'a [Message],
        prompt: &'a Message,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = system {
            messages.push(system);
        }
        messages.extend(history.iter());
        messages.push(prompt);
        Self {
            model,
            messages,
            stream: true,
        }
    }
}

pub(crate) async fn http_error(res: reqwest::Response) -> ProviderError {
    let status = res.status().as_u16();
    let message = res.text().await.unwrap_or_default();
    ProviderError::Http { status, message }
}

/// Folds a delta stream into the completed assistant message while
/// publishing progress. The signal moves to `{streaming: true, content: ""}`
/// once the stream is open and always ends at `streaming: false`, on error
/// with whatever was accumulated so far.
pub(crate) async fn drive<S>(
    deltas: S,
    progress: &watch::Sender<StreamProgress>,
) -> Result<Message, ProviderError>
where
    S: Stream<Item = Result<String, ProviderError>>,
{
    futures_util::pin_mut!(deltas);
    progress.send_replace(StreamProgress {
        streaming: true,
        content: String::new(),
    });
    let started = std::time::Instant::now();
    let mut content = String::new();
    let mut chunks = 0u32;
    while let Some(delta) = deltas.next().await {
        match delta {
            Ok(delta) => {
                chunks += 1;
                content.push_str(&delta);
                progress.send_replace(StreamProgress {
                    streaming: true,
                    content: content.clone(),
                });
            }
            Err(e) => {
                progress.send_replace(StreamProgress {
                    streaming: false,
                    content: content.clone(),
                });
                tracing::warn!(chunks, error = %e, "chat stream failed");
                return Err(e);
            }
        }
    }
    progress.send_replace(StreamProgress {
        streaming: false,
        content: content.clone(),
    });
    tracing::debug!(
        chunks,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "chat stream done"
    );
    Ok(Message::assistant(content))
}

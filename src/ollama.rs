//! Ollama-compatible HTTP client: model listing and chat streaming over
//! newline-delimited JSON.

use crate::message::Message;
use crate::provider::{drive, http_error, ChatRequest, ProviderError, StreamProgress};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::watch;

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    content: Option<String>,
}

pub struct OllamaClient {
    base: String,
    client: Client,
}

impl OllamaClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            client: Client::new(),
        }
    }

    /// Model names known to the server, via `GET /api/tags`.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(http_error(res).await);
        }
        let body: TagsResponse = res.json().await?;
        Ok(body.models.into_iter().map(|m| m.name).collect())
    }

    /// Streamed chat completion via `POST /api/chat`.
    pub async fn chat(
        &self,
        model: &str,
        system: Option<&Message>,
        history: &[Message],
        prompt: &Message,
        progress: &watch::Sender<StreamProgress>,
    ) -> Result<Message, ProviderError> {
        let url = format!("{}/api/chat", self.base);
        let body = ChatRequest::new(model, system, history, prompt);
        tracing::debug!(%model, %url, "ollama chat request");
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            return Err(http_error(res).await);
        }
        let body = Box::pin(res.bytes_stream().map_err(ProviderError::from));
        drive(delta_stream(body), progress).await
    }
}

enum LineEvent {
    Delta(String),
    Done,
    Empty,
}

/// Buffers the response body and splits it on newlines; each non-empty line
/// must decode as one JSON chunk. A `done` chunk ends the stream; a line
/// that fails to decode is a protocol violation and fails the stream.
fn delta_stream<S>(body: S) -> impl Stream<Item = Result<String, ProviderError>>
where
    S: Stream<Item = Result<Bytes, ProviderError>> + Unpin,
{
    futures_util::stream::try_unfold((body, Vec::new()), |(mut body, mut buf)| async move {
        loop {
            while let Some(end) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=end).collect();
                match decode_line(&String::from_utf8_lossy(&line))? {
                    LineEvent::Delta(delta) => return Ok(Some((delta, (body, buf)))),
                    LineEvent::Done => return Ok(None),
                    LineEvent::Empty => continue,
                }
            }
            match body.next().await {
                Some(chunk) => buf.extend_from_slice(&chunk?),
                None if buf.is_empty() => return Ok(None),
                None => {
                    // stream ended without a trailing newline
                    let line: Vec<u8> = std::mem::take(&mut buf);
                    match decode_line(&String::from_utf8_lossy(&line))? {
                        LineEvent::Delta(delta) => return Ok(Some((delta, (body, buf)))),
                        _ => return Ok(None),
                    }
                }
            }
        }
    })
}

fn decode_line(line: &str) -> Result<LineEvent, ProviderError> {
    let line = line.trim_end();
    if line.is_empty() {
        return Ok(LineEvent::Empty);
    }
    let chunk: ChatChunk = serde_json::from_str(line)?;
    if chunk.done {
        return Ok(LineEvent::Done);
    }
    let delta = chunk.message.and_then(|m| m.content).unwrap_or_default();
    Ok(LineEvent::Delta(delta))
}

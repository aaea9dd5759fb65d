//! OpenAI-compatible HTTP client: model listing and chat streaming over
//! server-sent events.

use crate::message::Message;
use crate::provider::{drive, http_error, ChatRequest, ProviderError, StreamProgress};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::watch;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

pub struct OpenAiClient {
    base: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            client: Client::new(),
        }
    }

    /// Model ids known to the server, via `GET /v1/models`.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/v1/models", self.base);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(http_error(res).await);
        }
        let body: ModelsResponse = res.json().await?;
        Ok(body.data.into_iter().map(|m| m.id).collect())
    }

    /// Streamed chat completion via `POST /v1/chat/completions`.
    pub async fn chat(
        &self,
        model: &str,
        system: Option<&Message>,
        history: &[Message],
        prompt: &Message,
        progress: &watch::Sender<StreamProgress>,
    ) -> Result<Message, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base);
        let body = ChatRequest::new(model, system, history, prompt);
        tracing::debug!(%model, %url, "openai chat request");
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            return Err(http_error(res).await);
        }
        let body = Box::pin(res.bytes_stream().map_err(ProviderError::from));
        drive(delta_stream(body), progress).await
    }
}

enum EventOutcome {
    Delta(String),
    Finished,
}

/// Buffers the response body and splits it into SSE event blocks terminated
/// by a blank line, joining the `data:` payload lines of each block. The
/// `[DONE]` sentinel or a set finish_reason ends the stream; any other
/// payload must decode as a chat-completion chunk.
fn delta_stream<S>(body: S) -> impl Stream<Item = Result<String, ProviderError>>
where
    S: Stream<Item = Result<Bytes, ProviderError>> + Unpin,
{
    let state = (body, Vec::new(), Vec::new(), false);
    futures_util::stream::try_unfold(state, |(mut body, mut buf, mut data, mut eof)| async move {
        loop {
            while let Some(end) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=end).collect();
                if let Some(payload) = accept_line(&String::from_utf8_lossy(&line), &mut data) {
                    match decode_event(&payload)? {
                        EventOutcome::Delta(delta) => {
                            return Ok(Some((delta, (body, buf, data, eof))))
                        }
                        EventOutcome::Finished => return Ok(None),
                    }
                }
            }
            if eof {
                // flush a trailing line and any unterminated event
                let mut pending = None;
                if !buf.is_empty() {
                    let line: Vec<u8> = std::mem::take(&mut buf);
                    pending = accept_line(&String::from_utf8_lossy(&line), &mut data);
                }
                if pending.is_none() && !data.is_empty() {
                    pending = Some(data.join("\n"));
                    data.clear();
                }
                return match pending {
                    Some(payload) => match decode_event(&payload)? {
                        EventOutcome::Delta(delta) => Ok(Some((delta, (body, buf, data, eof)))),
                        EventOutcome::Finished => Ok(None),
                    },
                    None => Ok(None),
                };
            }
            match body.next().await {
                Some(chunk) => buf.extend_from_slice(&chunk?),
                None => eof = true,
            }
        }
    })
}

/// Feeds one line into the pending event. Returns the joined payload when a
/// blank line completes a non-empty event; `event:` fields and comment
/// lines carry nothing for this protocol and are dropped.
fn accept_line(line: &str, data: &mut Vec<String>) -> Option<String> {
    let line = line.trim_end();
    if line.is_empty() {
        if data.is_empty() {
            return None;
        }
        let payload = data.join("\n");
        data.clear();
        return Some(payload);
    }
    if let Some(payload) = line.strip_prefix("data:") {
        data.push(payload.trim_start().to_string());
    }
    None
}

fn decode_event(payload: &str) -> Result<EventOutcome, ProviderError> {
    if payload == DONE_SENTINEL {
        return Ok(EventOutcome::Finished);
    }
    let chunk: StreamChunk = serde_json::from_str(payload)?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(EventOutcome::Delta(String::new()));
    };
    if choice.finish_reason.is_some() {
        return Ok(EventOutcome::Finished);
    }
    Ok(EventOutcome::Delta(choice.delta.content.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use pretty_assertions::assert_eq;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, ProviderError>> + Unpin {
        let owned: Vec<Result<Bytes, ProviderError>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        stream::iter(owned)
    }

    async fn collect(
        deltas: impl Stream<Item = Result<String, ProviderError>>,
    ) -> Result<String, ProviderError> {
        futures_util::pin_mut!(deltas);
        let mut out = String::new();
        while let Some(delta) = deltas.next().await {
            out.push_str(&delta?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn accumulates_deltas_until_done_sentinel() {
        let body = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        assert_eq!(collect(delta_stream(body)).await.unwrap(), "Hi!");
    }

    #[tokio::test]
    async fn finish_reason_ends_the_stream() {
        let body = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ]);
        assert_eq!(collect(delta_stream(body)).await.unwrap(), "Hi");
    }

    #[tokio::test]
    async fn reassembles_events_split_across_reads() {
        let body = chunks(&[
            "data: {\"choices\":[{\"del",
            "ta\":{\"content\":\"Hi\"}}]}\n\nda",
            "ta: [DONE]\n\n",
        ]);
        assert_eq!(collect(delta_stream(body)).await.unwrap(), "Hi");
    }

    #[tokio::test]
    async fn joins_multiple_data_lines_per_event() {
        let body = chunks(&[
            "data: {\"choices\":\ndata: [{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
        ]);
        assert_eq!(collect(delta_stream(body)).await.unwrap(), "Hi");
    }

    #[tokio::test]
    async fn handles_crlf_framing() {
        let body = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\r\n\r\ndata: [DONE]\r\n\r\n",
        ]);
        assert_eq!(collect(delta_stream(body)).await.unwrap(), "Hi");
    }

    #[tokio::test]
    async fn ignores_comments_and_event_fields() {
        let body = chunks(&[
            ": keep-alive\n\n",
            "event: message\ndata: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        assert_eq!(collect(delta_stream(body)).await.unwrap(), "Hi");
    }

    #[tokio::test]
    async fn trailing_event_without_blank_line_is_decoded() {
        let body = chunks(&["data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}"]);
        assert_eq!(collect(delta_stream(body)).await.unwrap(), "Hi");
    }

    #[tokio::test]
    async fn empty_delta_keeps_the_stream_alive() {
        let body = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        assert_eq!(collect(delta_stream(body)).await.unwrap(), "Hi");
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_error() {
        let body = chunks(&["data: nope\n\n"]);
        let err = collect(delta_stream(body)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn truncated_final_event_is_a_decode_error() {
        let body = chunks(&["data: {\"choices\":[{\"delta\""]);
        let err = collect(delta_stream(body)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }
}

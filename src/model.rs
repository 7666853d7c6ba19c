//! Generative-model client (OpenAI-compatible HTTP API).
//!
//! Two calls are used: `/embeddings` for retrieval queries, and a streaming
//! `/chat/completions` in JSON mode for the evaluation itself. Calls are
//! instrumented with model names and sizes, never with contents or keys.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::error::EngineError;

/// Embedding width expected by the vector index.
pub const EMBEDDING_DIMENSIONS: u32 = 768;

/// Text fragments as they arrive; the stream ends after the provider's `[DONE]`.
pub type FragmentStream = BoxStream<'static, Result<String, EngineError>>;

#[async_trait]
pub trait GenerativeModel: Send + Sync {
  async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;

  /// Start one JSON-mode generation. Dropping the stream aborts the transport.
  async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, EngineError>;
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub embedding_model: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())?;
    let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let embedding_model =
      std::env::var("OPENAI_EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".into());

    // Streaming replies can take a while; the connect phase should not.
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .timeout(Duration::from_secs(120))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string(), model, embedding_model })
  }

  fn post(&self, path: &str) -> reqwest::RequestBuilder {
    self
      .client
      .post(format!("{}{}", self.base_url, path))
      .header(USER_AGENT, "critique-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
  }
}

async fn ensure_success(res: reqwest::Response) -> Result<reqwest::Response, EngineError> {
  if res.status().is_success() {
    return Ok(res);
  }
  let status = res.status();
  let body = res.text().await.unwrap_or_default();
  let msg = extract_openai_error(&body).unwrap_or(body);
  Err(EngineError::Transport(format!("OpenAI HTTP {}: {}", status, msg)))
}

#[async_trait]
impl GenerativeModel for OpenAI {
  #[instrument(level = "info", skip(self, text), fields(model = %self.embedding_model, text_len = text.len()))]
  async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
    let req = EmbeddingRequest { model: &self.embedding_model, input: text, dimensions: EMBEDDING_DIMENSIONS };
    let res = ensure_success(self.post("/embeddings").json(&req).send().await?).await?;
    let body: EmbeddingResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    body
      .data
      .into_iter()
      .next()
      .map(|d| d.embedding)
      .ok_or_else(|| EngineError::Transport("embedding response contained no vectors".into()))
  }

  #[instrument(level = "info", skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
  async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, EngineError> {
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![ChatMessageReq { role: "user".into(), content: prompt.into() }],
      temperature: 0.2,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: None,
      stream: true,
    };

    let start = std::time::Instant::now();
    let res = match self.post("/chat/completions").json(&req).send().await {
      Ok(res) => ensure_success(res).await?,
      Err(e) => {
        error!(elapsed = ?start.elapsed(), error = %e, "Model call failed before streaming started");
        return Err(e.into());
      }
    };
    info!(elapsed = ?start.elapsed(), "Model stream opened");

    let bytes = res.bytes_stream().boxed();
    let stream = futures::stream::unfold(
      (bytes, SseDecoder::default(), VecDeque::new()),
      |(mut bytes, mut decoder, mut pending)| async move {
        loop {
          if let Some(item) = pending.pop_front() {
            return Some((item, (bytes, decoder, pending)));
          }
          if decoder.is_done() {
            return None;
          }
          match bytes.next().await {
            Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
            Some(Err(e)) => {
              decoder.stop();
              return Some((Err(EngineError::from(e)), (bytes, decoder, pending)));
            }
            None => return None,
          }
        }
      },
    );
    Ok(stream.boxed())
  }
}

/// Incremental decoder for the provider's `data:` event lines.
///
/// Bytes may split anywhere (including inside UTF-8 sequences), so only complete
/// lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
  buf: Vec<u8>,
  done: bool,
}

impl SseDecoder {
  pub fn is_done(&self) -> bool {
    self.done
  }

  fn stop(&mut self) {
    self.done = true;
  }

  /// Feed raw bytes; returns the content deltas completed by them.
  pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, EngineError>> {
    let mut out = vec![];
    if self.done {
      return out;
    }
    self.buf.extend_from_slice(chunk);
    while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
      let line: Vec<u8> = self.buf.drain(..=pos).collect();
      let line = String::from_utf8_lossy(&line);
      let Some(payload) = line.trim().strip_prefix("data:") else { continue };
      let payload = payload.trim();
      if payload == "[DONE]" {
        self.done = true;
        break;
      }
      match serde_json::from_str::<ChatChunk>(payload) {
        Ok(chunk) => {
          let text: String = chunk.choices.into_iter().filter_map(|c| c.delta.content).collect();
          if !text.is_empty() {
            out.push(Ok(text));
          }
        }
        Err(e) => match extract_openai_error(payload) {
          Some(msg) => {
            self.done = true;
            out.push(Err(EngineError::Transport(format!("OpenAI stream error: {msg}"))));
            break;
          }
          None => debug!(error = %e, "Skipping undecodable stream event"),
        },
      }
    }
    out
  }
}

// --- DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
  stream: bool,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatChunk {
  #[serde(default)] choices: Vec<ChunkChoice>,
}
#[derive(Deserialize)]
struct ChunkChoice { #[serde(default)] delta: ChunkDelta }
#[derive(Deserialize, Default)]
struct ChunkDelta { #[serde(default)] content: Option<String> }

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
  model: &'a str,
  input: &'a str,
  dimensions: u32,
}
#[derive(Deserialize)]
struct EmbeddingResponse {
  data: Vec<EmbeddingData>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct EmbeddingData { embedding: Vec<f32> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn texts(items: Vec<Result<String, EngineError>>) -> Vec<String> {
    items.into_iter().map(|r| r.unwrap()).collect()
  }

  #[test]
  fn decodes_deltas_split_across_chunks() {
    let mut d = SseDecoder::default();
    let first = d.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"sum\"}}]}\n\ndata: {\"choi");
    assert_eq!(texts(first), vec!["{\"sum"]);
    let second = d.push(b"ces\":[{\"delta\":{\"content\":\"mary\\\"\"}}]}\n\n");
    assert_eq!(texts(second), vec!["mary\""]);
    assert!(!d.is_done());
  }

  #[test]
  fn stops_at_done_marker_and_skips_role_only_deltas() {
    let mut d = SseDecoder::default();
    let out = d.push(
      b": keep-alive\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\ndata: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
    );
    assert_eq!(texts(out), vec!["x"]);
    assert!(d.is_done());
    assert!(d.push(b"data: {}\n").is_empty());
  }

  #[test]
  fn in_band_error_event_ends_the_stream() {
    let mut d = SseDecoder::default();
    let out = d.push(b"data: {\"error\":{\"message\":\"overloaded\"}}\n");
    assert_eq!(out.len(), 1);
    assert!(matches!(&out[0], Err(EngineError::Transport(m)) if m.contains("overloaded")));
    assert!(d.is_done());
  }

  #[test]
  fn openai_error_bodies_are_unwrapped() {
    assert_eq!(extract_openai_error(r#"{"error":{"message":"bad key"}}"#).as_deref(), Some("bad key"));
    assert_eq!(extract_openai_error("<html>"), None);
  }
}

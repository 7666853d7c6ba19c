//! Vector retrieval over the question knowledge base (Supabase `match_documents` RPC).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::EngineError;
use crate::util::trunc_for_log;

#[async_trait]
pub trait VectorSearch: Send + Sync {
  /// Passages most similar to `embedding`, restricted to one question's documents.
  async fn search(
    &self,
    embedding: &[f32],
    scope_id: &str,
    threshold: f32,
    limit: u32,
  ) -> Result<Vec<String>, EngineError>;
}

pub struct SupabaseRetrieval {
  client: reqwest::Client,
  base_url: String,
  service_key: String,
}

#[derive(Serialize)]
struct MatchDocumentsRequest<'a> {
  query_embedding: &'a [f32],
  match_threshold: f32,
  match_count: u32,
  p_question_id: &'a str,
}

#[derive(Deserialize)]
struct MatchedDocument {
  content: String,
  #[serde(default)]
  similarity: Option<f32>,
}

impl SupabaseRetrieval {
  /// Requires SUPABASE_URL and SUPABASE_SERVICE_KEY; None when either is missing.
  pub fn from_env() -> Option<Self> {
    let base_url = std::env::var("SUPABASE_URL").ok().filter(|s| !s.is_empty())?;
    let service_key = std::env::var("SUPABASE_SERVICE_KEY").ok().filter(|s| !s.is_empty())?;
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().ok()?;
    Some(Self { client, base_url: base_url.trim_end_matches('/').to_string(), service_key })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }
}

#[async_trait]
impl VectorSearch for SupabaseRetrieval {
  #[instrument(level = "info", target = "retrieval", skip_all, fields(dims = embedding.len(), %scope_id, threshold = threshold, limit = limit))]
  async fn search(
    &self,
    embedding: &[f32],
    scope_id: &str,
    threshold: f32,
    limit: u32,
  ) -> Result<Vec<String>, EngineError> {
    let url = format!("{}/rest/v1/rpc/match_documents", self.base_url);
    let body = MatchDocumentsRequest {
      query_embedding: embedding,
      match_threshold: threshold,
      match_count: limit,
      p_question_id: scope_id,
    };
    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "critique-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("apikey", &self.service_key)
      .header(AUTHORIZATION, format!("Bearer {}", self.service_key))
      .json(&body)
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status();
      let text = res.text().await.unwrap_or_default();
      return Err(EngineError::Transport(format!("match_documents HTTP {}: {}", status, trunc_for_log(&text, 200))));
    }

    let docs: Vec<MatchedDocument> = res.json().await?;
    debug!(
      target: "retrieval",
      matches = docs.len(),
      best = ?docs.iter().filter_map(|d| d.similarity).fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s)))),
      "Retrieved passages"
    );
    Ok(docs.into_iter().map(|d| d.content).collect())
  }
}

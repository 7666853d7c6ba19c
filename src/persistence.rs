//! Practice-record persistence.
//!
//! The gate is the completion sink for initial evaluations: it maps the resolved
//! evaluation into one `PracticeRecord` and inserts it exactly once. Follow-ups
//! are never recorded, and insert failures are logged and swallowed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::domain::Evaluation;
use crate::error::EngineError;
use crate::stream::CompletionSink;
use crate::util::trunc_for_log;

/// One row of `practice_records`. Field names follow the table's columns;
/// `created_at` is left to the database default.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PracticeRecord {
  pub id: String,
  #[serde(rename = "user_id")]
  pub subject_id: Option<String>,
  pub question_id: String,
  #[serde(rename = "user_answer")]
  pub answer: String,
  pub evaluation: Evaluation,
  pub score: Option<f32>,
}

impl PracticeRecord {
  pub fn new(subject_id: Option<String>, question_id: &str, answer: &str, evaluation: &Evaluation) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      subject_id,
      question_id: question_id.to_string(),
      answer: answer.to_string(),
      evaluation: evaluation.clone(),
      score: evaluation.score,
    }
  }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
  /// Plain insert; records are never updated.
  async fn insert(&self, record: &PracticeRecord) -> Result<(), EngineError>;
}

/// Append-only in-process store, used when no database is configured.
#[derive(Default)]
pub struct MemoryRecordStore {
  records: Mutex<Vec<PracticeRecord>>,
}

impl MemoryRecordStore {
  #[cfg(test)]
  pub fn records(&self) -> Vec<PracticeRecord> {
    self.records.lock().map(|r| r.clone()).unwrap_or_default()
  }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
  async fn insert(&self, record: &PracticeRecord) -> Result<(), EngineError> {
    let mut records = self.records.lock().map_err(|_| EngineError::Persistence("record store poisoned".into()))?;
    records.push(record.clone());
    Ok(())
  }
}

/// PostgREST `practice_records` table on Supabase.
pub struct SupabaseRecordStore {
  client: reqwest::Client,
  base_url: String,
  service_key: String,
}

impl SupabaseRecordStore {
  /// Requires SUPABASE_URL and SUPABASE_SERVICE_KEY; None when either is missing.
  pub fn from_env() -> Option<Self> {
    let base_url = std::env::var("SUPABASE_URL").ok().filter(|s| !s.is_empty())?;
    let service_key = std::env::var("SUPABASE_SERVICE_KEY").ok().filter(|s| !s.is_empty())?;
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().ok()?;
    Some(Self { client, base_url: base_url.trim_end_matches('/').to_string(), service_key })
  }
}

#[async_trait]
impl RecordStore for SupabaseRecordStore {
  #[instrument(level = "debug", target = "persistence", skip_all, fields(record_id = %record.id))]
  async fn insert(&self, record: &PracticeRecord) -> Result<(), EngineError> {
    let url = format!("{}/rest/v1/practice_records", self.base_url);
    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "critique-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("apikey", &self.service_key)
      .header(AUTHORIZATION, format!("Bearer {}", self.service_key))
      .header("Prefer", "return=minimal")
      .json(record)
      .send()
      .await
      .map_err(|e| EngineError::Persistence(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      return Err(EngineError::Persistence(format!("insert HTTP {}: {}", status, trunc_for_log(&body, 200))));
    }
    Ok(())
  }
}

/// Completion sink that records one initial evaluation.
pub struct PersistenceGate {
  store: Arc<dyn RecordStore>,
  subject_id: Option<String>,
  question_id: String,
  answer: String,
  is_follow_up: bool,
}

impl PersistenceGate {
  pub fn new(
    store: Arc<dyn RecordStore>,
    subject_id: Option<String>,
    question_id: &str,
    answer: &str,
    is_follow_up: bool,
  ) -> Self {
    Self { store, subject_id, question_id: question_id.to_string(), answer: answer.to_string(), is_follow_up }
  }
}

#[async_trait]
impl CompletionSink for PersistenceGate {
  async fn complete(&self, evaluation: &Evaluation, _raw: &str) {
    if self.is_follow_up {
      debug!(target: "persistence", question_id = %self.question_id, "Follow-up turn; not recorded");
      return;
    }
    let record = PracticeRecord::new(self.subject_id.clone(), &self.question_id, &self.answer, evaluation);
    match self.store.insert(&record).await {
      Ok(()) => info!(target: "persistence", record_id = %record.id, question_id = %record.question_id, score = ?record.score, "Practice record saved"),
      Err(e) => error!(target: "persistence", record_id = %record.id, error = %e, "Failed to save practice record"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct FailingStore;

  #[async_trait]
  impl RecordStore for FailingStore {
    async fn insert(&self, _record: &PracticeRecord) -> Result<(), EngineError> {
      Err(EngineError::Persistence("db down".into()))
    }
  }

  fn evaluation() -> Evaluation {
    Evaluation { summary: "good".into(), score: Some(4.0), ..Evaluation::default() }
  }

  #[tokio::test]
  async fn initial_evaluation_is_inserted_once() {
    let store = Arc::new(MemoryRecordStore::default());
    let gate = PersistenceGate::new(store.clone(), Some("u1".into()), "q1", "my answer", false);
    gate.complete(&evaluation(), "{}").await;

    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].question_id, "q1");
    assert_eq!(records[0].subject_id.as_deref(), Some("u1"));
    assert_eq!(records[0].score, Some(4.0));
    assert!(Uuid::parse_str(&records[0].id).is_ok());
  }

  #[test]
  fn record_serializes_to_table_columns() {
    let record = PracticeRecord::new(Some("u1".into()), "q1", "my answer", &evaluation());
    let json = serde_json::to_value(&record).unwrap();
    let obj = json.as_object().unwrap();
    let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["evaluation", "id", "question_id", "score", "user_answer", "user_id"]);
    assert_eq!(obj["user_id"], "u1");
    assert_eq!(obj["user_answer"], "my answer");
    assert_eq!(obj["evaluation"]["summary"], "good");
  }

  #[tokio::test]
  async fn follow_ups_are_never_recorded() {
    let store = Arc::new(MemoryRecordStore::default());
    let gate = PersistenceGate::new(store.clone(), None, "q1", "why?", true);
    gate.complete(&evaluation(), "{}").await;
    assert!(store.records().is_empty());
  }

  #[tokio::test]
  async fn insert_failures_are_swallowed() {
    let gate = PersistenceGate::new(Arc::new(FailingStore), None, "q1", "a", false);
    gate.complete(&evaluation(), "{}").await;
  }
}

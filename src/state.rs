//! Application state: the question bank and the evaluation engine with its collaborators.
//!
//! Collaborators are built once at start-up from the environment. Anything that
//! is not configured is left out; requests that need it fail with a configuration
//! error instead of the whole process refusing to start.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::{load_engine_config_from_env, EngineConfig};
use crate::domain::{Modality, Question};
use crate::engine::EvaluationEngine;
use crate::evidence::EvidenceCoordinator;
use crate::harness::ComponentHarness;
use crate::judge::{CodeJudge, HttpJudgeTransport, JudgeClient};
use crate::model::{GenerativeModel, OpenAI};
use crate::persistence::{MemoryRecordStore, RecordStore, SupabaseRecordStore};
use crate::retrieval::{SupabaseRetrieval, VectorSearch};
use crate::seeds::seed_questions;

/// External collaborators, each optional except the record store.
pub struct Collaborators {
  pub model: Option<Arc<dyn GenerativeModel>>,
  pub search: Option<Arc<dyn VectorSearch>>,
  pub judge: Option<Arc<dyn CodeJudge>>,
  pub store: Arc<dyn RecordStore>,
}

pub struct AppState {
  pub engine: EvaluationEngine,
}

impl AppState {
  /// Build state from env: load TOML config, merge seed questions, construct collaborators.
  #[instrument(level = "info", skip_all)]
  pub fn from_env() -> Self {
    let config = load_engine_config_from_env().unwrap_or_default();

    let model: Option<Arc<dyn GenerativeModel>> = match OpenAI::from_env() {
      Some(oa) => {
        info!(target: "critique_backend", base_url = %oa.base_url, model = %oa.model, embedding_model = %oa.embedding_model, "OpenAI enabled.");
        Some(Arc::new(oa))
      }
      None => {
        warn!(target: "critique_backend", "OpenAI disabled (no OPENAI_API_KEY). Evaluations will fail with a configuration error.");
        None
      }
    };

    let search: Option<Arc<dyn VectorSearch>> = match SupabaseRetrieval::from_env() {
      Some(s) => {
        info!(target: "critique_backend", base_url = %s.base_url(), "Vector retrieval enabled.");
        Some(Arc::new(s))
      }
      None => {
        warn!(target: "critique_backend", "Vector retrieval disabled (SUPABASE_URL / SUPABASE_SERVICE_KEY not set).");
        None
      }
    };

    let judge: Option<Arc<dyn CodeJudge>> = match HttpJudgeTransport::from_env(&config.judge) {
      Ok(transport) => {
        info!(target: "critique_backend", base_url = %transport.base_url(), "Code judge enabled.");
        Some(Arc::new(JudgeClient::new(transport, &config.judge)))
      }
      Err(e) => {
        warn!(target: "critique_backend", error = %e, "Code judge disabled.");
        None
      }
    };

    let store: Arc<dyn RecordStore> = match SupabaseRecordStore::from_env() {
      Some(s) => Arc::new(s),
      None => {
        info!(target: "critique_backend", "No database configured; practice records are kept in memory.");
        Arc::new(MemoryRecordStore::default())
      }
    };

    Self::new(config, Collaborators { model, search, judge, store })
  }

  pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
    let questions = merge_questions(config.questions, seed_questions());
    for m in [Modality::Concept, Modality::Code, Modality::UiComponent] {
      let count = questions.iter().filter(|q| q.modality == m).count();
      info!(target: "critique_backend", modality = m.as_str(), count, "Startup question inventory");
    }

    let coordinator = EvidenceCoordinator {
      model: collaborators.model.clone(),
      search: collaborators.search,
      judge: collaborators.judge,
      harness: ComponentHarness::new(&config.harness),
      retrieval: config.retrieval,
      retry: config.judge.retry_policy(),
    };
    let engine = EvaluationEngine::new(
      questions,
      coordinator,
      collaborators.model,
      collaborators.store,
      config.prompts,
      config.evaluation.history_window,
    );
    Self { engine }
  }
}

/// Configured questions first; built-in seeds never overwrite an existing id.
fn merge_questions(configured: Vec<Question>, seeds: Vec<Question>) -> Vec<Question> {
  let mut seen = HashSet::new();
  let mut out = Vec::with_capacity(configured.len() + seeds.len());
  for q in configured.into_iter().chain(seeds) {
    if seen.insert(q.id.clone()) {
      out.push(q);
    } else {
      warn!(target: "critique_backend", id = %q.id, "Duplicate question id; keeping the first definition");
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn configured_questions_shadow_seeds() {
    let mut custom = seed_questions().remove(0);
    custom.prompt = "custom prompt".into();
    let merged = merge_questions(vec![custom.clone()], seed_questions());
    assert_eq!(merged.len(), seed_questions().len());
    let q = merged.iter().find(|q| q.id == custom.id).unwrap();
    assert_eq!(q.prompt, "custom prompt");
  }
}

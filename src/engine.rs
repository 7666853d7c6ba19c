//! The evaluation pipeline: question lookup → evidence → prompt → streamed
//! generation → resolution → persistence.
//!
//! `prepare` does everything that can fail as a request (unknown question,
//! missing collaborator, judge timeout). `PreparedEvaluation::run` owns the
//! streaming part, whose failures are reported as stream events instead.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::config::Prompts;
use crate::context::{build_prompt, PromptInputs};
use crate::domain::{ConversationTurn, Question};
use crate::error::EngineError;
use crate::evidence::{EvidenceCoordinator, EvidenceSlots};
use crate::model::GenerativeModel;
use crate::persistence::{PersistenceGate, RecordStore};
use crate::stream::{run_stream, CancelToken, CompletionSink, Resolution, StreamEvent, StreamOutcome};

/// One evaluation turn as submitted by a caller.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
  pub question_id: String,
  #[serde(default)]
  pub subject_id: Option<String>,
  pub answer: String,
  #[serde(default)]
  pub history: Vec<ConversationTurn>,
  #[serde(default)]
  pub is_follow_up: bool,
}

pub struct EvaluationEngine {
  questions: HashMap<String, Arc<Question>>,
  coordinator: EvidenceCoordinator,
  model: Option<Arc<dyn GenerativeModel>>,
  store: Arc<dyn RecordStore>,
  prompts: Prompts,
  history_window: usize,
}

/// Everything needed to start streaming; evidence has already been gathered.
pub struct PreparedEvaluation {
  model: Arc<dyn GenerativeModel>,
  prompt: String,
  resolution: Resolution,
  sink: Arc<dyn CompletionSink>,
}

impl EvaluationEngine {
  pub fn new(
    questions: Vec<Question>,
    coordinator: EvidenceCoordinator,
    model: Option<Arc<dyn GenerativeModel>>,
    store: Arc<dyn RecordStore>,
    prompts: Prompts,
    history_window: usize,
  ) -> Self {
    let questions = questions.into_iter().map(|q| (q.id.clone(), Arc::new(q))).collect();
    Self { questions, coordinator, model, store, prompts, history_window }
  }

  pub fn question(&self, id: &str) -> Option<Arc<Question>> {
    self.questions.get(id).cloned()
  }

  pub fn question_count(&self) -> usize {
    self.questions.len()
  }

  #[instrument(level = "info", target = "evaluation", skip_all, fields(question_id = %request.question_id, answer_len = request.answer.len(), history = request.history.len(), is_follow_up = request.is_follow_up))]
  pub async fn prepare(&self, request: &EvaluationRequest) -> Result<PreparedEvaluation, EngineError> {
    let question = self
      .question(&request.question_id)
      .ok_or_else(|| EngineError::QuestionNotFound(request.question_id.clone()))?;
    let model = self
      .model
      .clone()
      .ok_or_else(|| EngineError::Configuration("evaluation needs a configured generative model (OPENAI_API_KEY)".into()))?;

    let evidence = self.coordinator.gather(&question, &request.answer, request.is_follow_up).await?;
    let slots = EvidenceSlots::from_evidence(&evidence);
    let prompt = build_prompt(
      &self.prompts,
      self.history_window,
      &PromptInputs {
        history: &request.history,
        question: &question.prompt,
        answer: &request.answer,
        slots: &slots,
        is_follow_up: request.is_follow_up,
        modality: question.modality,
      },
    );
    info!(target: "evaluation", prompt_len = prompt.len(), modality = question.modality.as_str(), "Prompt assembled");

    let resolution = Resolution {
      is_follow_up: request.is_follow_up,
      modality: question.modality,
      objective: evidence.grounded(),
    };
    let sink = Arc::new(PersistenceGate::new(
      self.store.clone(),
      request.subject_id.clone(),
      &question.id,
      &request.answer,
      request.is_follow_up,
    ));
    Ok(PreparedEvaluation { model, prompt, resolution, sink })
  }

  /// `prepare` then `run`, for callers that handle request errors and stream
  /// events on the same channel.
  pub async fn evaluate(
    &self,
    request: &EvaluationRequest,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancelToken,
  ) -> Result<StreamOutcome, EngineError> {
    let prepared = self.prepare(request).await?;
    Ok(prepared.run(events, cancel).await)
  }
}

impl PreparedEvaluation {
  pub async fn run(self, events: mpsc::Sender<StreamEvent>, cancel: CancelToken) -> StreamOutcome {
    if cancel.is_cancelled() {
      let _ = events.send(StreamEvent::Cancelled { message: crate::stream::CANCELLED_MARKER.into() }).await;
      return StreamOutcome::Cancelled;
    }
    let fragments = match self.model.generate_stream(&self.prompt).await {
      Ok(fragments) => fragments,
      Err(e) => {
        warn!(target: "evaluation", error = %e, "Could not open generation stream");
        let _ = events.send(StreamEvent::Error { message: e.to_string(), partial: None }).await;
        return StreamOutcome::Failed(e);
      }
    };
    run_stream(fragments, self.resolution, events, cancel, self.sink).await
  }
}

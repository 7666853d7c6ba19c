//! Evidence assembly: pick the collaborator a question's modality needs, run it,
//! and normalize the outcome into one `Evidence` value plus its prompt text.
//!
//! Exactly one kind of evidence is gathered per initial evaluation. Follow-up
//! turns gather nothing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::RetrievalSettings;
use crate::domain::{GroundedEvidence, Modality, Question};
use crate::error::EngineError;
use crate::harness::{format_report, ComponentHarness, HarnessReport, TestCaseResult};
use crate::judge::{execute_with_evidence, CodeJudge};
use crate::model::GenerativeModel;
use crate::retrieval::VectorSearch;
use crate::util::{truncate_chars, RetryPolicy};

pub const NOT_APPLICABLE: &str = "not applicable for this question";
pub const NO_RELEVANT_CONTEXT: &str = "No relevant context was found in the knowledge base.";
pub const RETRIEVAL_FAILURE: &str = "Failed to retrieve relevant context from the knowledge base.";

const STDERR_EXCERPT_CHARS: usize = 500;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
  Retrieval,
  Execution,
  RenderTests,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
  Retrieval { passages: Vec<String> },
  Execution {
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
    status_description: String,
  },
  RenderTests {
    results: Vec<TestCaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  NotApplicable,
  /// A collaborator failed and was degraded to explanatory text.
  Unavailable { source: EvidenceSource, message: String },
}

impl Evidence {
  pub fn source(&self) -> Option<EvidenceSource> {
    match self {
      Evidence::Retrieval { .. } => Some(EvidenceSource::Retrieval),
      Evidence::Execution { .. } => Some(EvidenceSource::Execution),
      Evidence::RenderTests { .. } => Some(EvidenceSource::RenderTests),
      Evidence::NotApplicable => None,
      Evidence::Unavailable { source, .. } => Some(*source),
    }
  }

  /// Prompt text for the slot this evidence fills.
  pub fn render(&self) -> String {
    match self {
      Evidence::Retrieval { passages } if passages.is_empty() => NO_RELEVANT_CONTEXT.into(),
      Evidence::Retrieval { passages } => {
        passages.iter().map(|p| format!("- {}", p.trim())).collect::<Vec<_>>().join("\n")
      }
      Evidence::Execution { stdout, stderr, compile_output, status_description } => {
        let or_na = |v: &Option<String>| v.as_deref().map(str::trim).unwrap_or("N/A").to_string();
        let mut text =
          format!("Status: {}\nStdout: {}\nStderr: {}", status_description, or_na(stdout), or_na(stderr));
        if let Some(compile) = compile_output {
          text.push_str(&format!("\nCompile output: {}", compile.trim()));
        }
        text
      }
      Evidence::RenderTests { results, error } => format_report(&HarnessReport {
        success: error.is_none(),
        results: results.clone(),
        error: error.clone(),
      }),
      Evidence::NotApplicable => NOT_APPLICABLE.into(),
      Evidence::Unavailable { message, .. } => message.clone(),
    }
  }

  /// Objective numbers for `grounded_evidence`, when this evidence has any.
  pub fn grounded(&self) -> Option<GroundedEvidence> {
    match self {
      Evidence::Execution { stderr, compile_output, .. } => Some(GroundedEvidence {
        tests_passed: None,
        tests_failed: None,
        stderr_excerpt: stderr
          .as_deref()
          .or(compile_output.as_deref())
          .map(str::trim)
          .filter(|s| !s.is_empty())
          .map(|s| truncate_chars(s, STDERR_EXCERPT_CHARS)),
      }),
      Evidence::RenderTests { results, error } => {
        let passed = results.iter().filter(|r| r.passed).count() as u32;
        let first_error = error.as_deref().or_else(|| results.iter().find_map(|r| r.error.as_deref()));
        Some(GroundedEvidence {
          tests_passed: Some(passed),
          tests_failed: Some(results.len() as u32 - passed),
          stderr_excerpt: first_error.map(|e| truncate_chars(e, STDERR_EXCERPT_CHARS)),
        })
      }
      _ => None,
    }
  }
}

/// The three grounding slots of the prompt. Unused slots hold `NOT_APPLICABLE`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidenceSlots {
  pub rag_context: String,
  pub judge_result: String,
  pub render_tests: String,
}

impl EvidenceSlots {
  pub fn from_evidence(evidence: &Evidence) -> Self {
    let mut slots = Self {
      rag_context: NOT_APPLICABLE.into(),
      judge_result: NOT_APPLICABLE.into(),
      render_tests: NOT_APPLICABLE.into(),
    };
    let text = evidence.render();
    match evidence.source() {
      Some(EvidenceSource::Retrieval) => slots.rag_context = text,
      Some(EvidenceSource::Execution) => slots.judge_result = text,
      Some(EvidenceSource::RenderTests) => slots.render_tests = text,
      None => {}
    }
    slots
  }
}

/// Collaborators are optional so the service can start without every provider;
/// a question whose modality needs a missing one fails with a configuration error.
#[derive(Clone)]
pub struct EvidenceCoordinator {
  pub model: Option<Arc<dyn GenerativeModel>>,
  pub search: Option<Arc<dyn VectorSearch>>,
  pub judge: Option<Arc<dyn CodeJudge>>,
  pub harness: ComponentHarness,
  pub retrieval: RetrievalSettings,
  pub retry: RetryPolicy,
}

impl EvidenceCoordinator {
  pub fn ensure_configured(&self, modality: Modality) -> Result<(), EngineError> {
    let missing = match modality {
      Modality::Concept if self.model.is_none() => Some("generative model (OPENAI_API_KEY)"),
      Modality::Concept if self.search.is_none() => Some("vector retrieval (SUPABASE_URL, SUPABASE_SERVICE_KEY)"),
      Modality::Code if self.judge.is_none() => Some("code judge (JUDGE0_API_HOST, JUDGE0_API_KEY)"),
      _ => None,
    };
    match missing {
      Some(what) => Err(EngineError::Configuration(format!(
        "{} questions need a configured {}",
        modality.as_str(),
        what
      ))),
      None => Ok(()),
    }
  }

  #[instrument(level = "info", target = "evaluation", skip_all, fields(question_id = %question.id, modality = question.modality.as_str(), answer_len = answer.len(), is_follow_up = is_follow_up))]
  pub async fn gather(&self, question: &Question, answer: &str, is_follow_up: bool) -> Result<Evidence, EngineError> {
    if is_follow_up {
      return Ok(Evidence::NotApplicable);
    }
    self.ensure_configured(question.modality)?;

    let evidence = match question.modality {
      Modality::Concept => self.retrieve(question, answer).await,
      Modality::Code => self.execute(answer).await,
      Modality::UiComponent => self.render_tests(question, answer).await,
    };
    info!(target: "evaluation", source = ?evidence.source(), "Evidence gathered");
    Ok(evidence)
  }

  async fn retrieve(&self, question: &Question, answer: &str) -> Evidence {
    let (Some(model), Some(search)) = (&self.model, &self.search) else {
      return Evidence::NotApplicable;
    };
    let passages: Result<Vec<String>, EngineError> = async {
      let embedding = model.embed(answer).await?;
      search
        .search(&embedding, &question.id, self.retrieval.match_threshold, self.retrieval.match_count)
        .await
    }
    .await;
    match passages {
      Ok(passages) => Evidence::Retrieval { passages },
      Err(e) => {
        warn!(target: "evaluation", error = %e, "Retrieval failed; grounding on failure sentinel");
        Evidence::Unavailable { source: EvidenceSource::Retrieval, message: RETRIEVAL_FAILURE.into() }
      }
    }
  }

  async fn execute(&self, answer: &str) -> Evidence {
    let Some(judge) = &self.judge else { return Evidence::NotApplicable };
    execute_with_evidence(judge.as_ref(), answer, self.retry, |attempt, e| {
      warn!(target: "judge", attempt, error = %e, "Judge attempt failed");
    })
    .await
  }

  async fn render_tests(&self, question: &Question, answer: &str) -> Evidence {
    let harness = self.harness.clone();
    let source = answer.to_string();
    let cases = question.test_cases.clone();
    match tokio::task::spawn_blocking(move || harness.evaluate_in_worker(source, cases)).await {
      Ok(Ok(report)) => Evidence::RenderTests { results: report.results, error: report.error },
      Ok(Err(e)) => {
        warn!(target: "harness", error = %e, "Harness worker failed");
        Evidence::Unavailable {
          source: EvidenceSource::RenderTests,
          message: format!("Component tests could not be run: {e}"),
        }
      }
      Err(e) => {
        warn!(target: "harness", error = %e, "Harness task failed");
        Evidence::Unavailable {
          source: EvidenceSource::RenderTests,
          message: format!("Component tests could not be run: {e}"),
        }
      }
    }
  }
}

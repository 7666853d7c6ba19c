//! Loading engine configuration (prompts, tunables and an optional question bank) from TOML.
//!
//! See `EngineConfig` and `Prompts` for expected schema. Secrets and endpoints are
//! read from the environment by the collaborator constructors, never from this file.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::Question;
use crate::util::RetryPolicy;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub judge: JudgeSettings,
  #[serde(default)]
  pub retrieval: RetrievalSettings,
  #[serde(default)]
  pub harness: HarnessSettings,
  #[serde(default)]
  pub evaluation: EvaluationSettings,
  #[serde(default)]
  pub questions: Vec<Question>,
}

/// Instruction texts used by the context builder. Defaults target a frontend interview.
/// You can override them in TOML if you need to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub role: String,
  pub initial_instructions: String,
  pub follow_up_instructions: String,
  pub language_directive: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      role: "You are a world-class senior frontend technical interviewer providing a comprehensive evaluation.".into(),
      initial_instructions: "Carefully analyze the user's answer based on the provided context. Your evaluation must be grounded in the evidence given.\n\n- If the question is conceptual (<judge0_result> and <render_tests> contain '{placeholder}'):\n  - Base your evaluation on how well <user_answer> aligns with the key points in <rag_context>.\n  - The `grounded_evidence` field MUST be `null`.\n- If the question is a coding challenge (<rag_context> contains '{placeholder}'):\n  - Base your evaluation strictly on the objective <judge0_result> or <render_tests> and an analysis of <user_answer> (the user's code).\n  - The `grounded_evidence` field MUST be populated with data from those results.\n\nAlways refer to <conversation_history> for dialogue context.".into(),
      follow_up_instructions: "The user is continuing the conversation about their previous answer. Reply naturally to their latest message, using <conversation_history> for context.\n\n- Put your whole reply in `summary`.\n- `score`, `pros`, `cons` and `grounded_evidence` MUST be `null`.\n- `next_practice` may suggest what to study next.".into(),
      language_directive: "Your response MUST be a single, valid JSON object following the schema. Answer in the language the question is written in.".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct JudgeSettings {
  pub language_id: u32,
  pub poll_interval_ms: u64,
  pub max_polls: u32,
  pub retry_attempts: u32,
  pub retry_base_delay_ms: u64,
  pub request_timeout_secs: u64,
}

impl Default for JudgeSettings {
  fn default() -> Self {
    Self {
      // Node.js on Judge0 CE
      language_id: 93,
      poll_interval_ms: 500,
      max_polls: 10,
      retry_attempts: 3,
      retry_base_delay_ms: 1000,
      request_timeout_secs: 10,
    }
  }
}

impl JudgeSettings {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      attempts: self.retry_attempts,
      base_delay: Duration::from_millis(self.retry_base_delay_ms),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
  pub match_threshold: f32,
  pub match_count: u32,
}

impl Default for RetrievalSettings {
  fn default() -> Self {
    Self { match_threshold: 0.7, match_count: 5 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
  /// Component looked up when the source has no `export default`.
  pub component_name: String,
  pub step_budget: u64,
  pub render_timeout_ms: u64,
}

impl Default for HarnessSettings {
  fn default() -> Self {
    Self { component_name: "Counter".into(), step_budget: 100_000, render_timeout_ms: 1000 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
  /// Number of most recent conversation turns folded into the prompt.
  pub history_window: usize,
}

impl Default for EvaluationSettings {
  fn default() -> Self {
    Self { history_window: 4 }
  }
}

/// Attempt to load `EngineConfig` from ENGINE_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_engine_config_from_env() -> Option<EngineConfig> {
  let path = std::env::var("ENGINE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<EngineConfig>(&s) {
      Ok(cfg) => {
        info!(target: "critique_backend", %path, questions = cfg.questions.len(), "Loaded engine config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "critique_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "critique_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Modality;

  #[test]
  fn empty_toml_yields_defaults() {
    let cfg: EngineConfig = toml::from_str("").unwrap();
    assert_eq!(cfg.judge.max_polls, 10);
    assert_eq!(cfg.judge.poll_interval(), Duration::from_millis(500));
    assert_eq!(cfg.retrieval.match_count, 5);
    assert_eq!(cfg.evaluation.history_window, 4);
    assert_eq!(cfg.harness.component_name, "Counter");
  }

  #[test]
  fn partial_sections_keep_remaining_defaults() {
    let cfg: EngineConfig = toml::from_str(
      r#"
      [judge]
      max_polls = 20

      [[questions]]
      id = "react-counter"
      modality = "ui-component"
      prompt = "Build a counter"

      [[questions.test_cases]]
      name = "initial"
      expected_patterns = ["Count: 0"]
      props = { initial = 0 }
      "#,
    )
    .unwrap();
    assert_eq!(cfg.judge.max_polls, 20);
    assert_eq!(cfg.judge.retry_attempts, 3);
    assert_eq!(cfg.questions.len(), 1);
    assert_eq!(cfg.questions[0].modality, Modality::UiComponent);
    assert_eq!(cfg.questions[0].test_cases[0].props["initial"], serde_json::json!(0));
  }
}

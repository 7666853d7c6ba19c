//! Error taxonomy for the evaluation engine.
//!
//! Only `Configuration` and `QuestionNotFound` are meant to reach the caller as
//! request failures. Everything else, a judge timeout included, is absorbed into
//! degraded evidence text or a degraded evaluation before it gets that far.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  /// Missing credentials or endpoints for a collaborator the request needs.
  #[error("configuration error: {0}")]
  Configuration(String),

  /// Network / HTTP failure talking to the judge, the model or the store.
  #[error("transport error: {0}")]
  Transport(String),

  /// The remote judge never reached a terminal state within the poll budget.
  #[error("code execution timed out after {polls} polls")]
  JudgeTimeout { polls: u32 },

  /// The model produced something that is not the evaluation schema.
  #[error("model output parse error: {0}")]
  Parse(String),

  /// The record store rejected the insert.
  #[error("persistence error: {0}")]
  Persistence(String),

  #[error("unknown question id: {0}")]
  QuestionNotFound(String),
}

impl EngineError {
  /// True for errors that the caller is allowed to see as a request failure.
  pub fn is_user_visible(&self) -> bool {
    matches!(
      self,
      EngineError::Configuration(_) | EngineError::QuestionNotFound(_)
    )
  }
}

impl From<reqwest::Error> for EngineError {
  fn from(e: reqwest::Error) -> Self {
    EngineError::Transport(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_configuration_and_not_found_are_user_visible() {
    assert!(EngineError::Configuration("x".into()).is_user_visible());
    assert!(!EngineError::JudgeTimeout { polls: 10 }.is_user_visible());
    assert!(EngineError::QuestionNotFound("q".into()).is_user_visible());
    assert!(!EngineError::Transport("x".into()).is_user_visible());
    assert!(!EngineError::Parse("x".into()).is_user_visible());
    assert!(!EngineError::Persistence("x".into()).is_user_visible());
  }

  #[test]
  fn timeout_message_names_poll_count() {
    let e = EngineError::JudgeTimeout { polls: 10 };
    assert_eq!(e.to_string(), "code execution timed out after 10 polls");
  }
}

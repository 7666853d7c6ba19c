//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{Evaluation, Modality, Question};
use crate::engine::EvaluationRequest;
use crate::stream::StreamEvent;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
  Ping,
  Evaluate {
    #[serde(flatten)]
    request: EvaluationRequest,
  },
  Cancel,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
  Pong,
  EvaluationFragment {
    text: String,
  },
  EvaluationDone {
    evaluation: Evaluation,
  },
  EvaluationCancelled {
    message: String,
  },
  Error {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    partial: Option<Evaluation>,
  },
}

impl From<StreamEvent> for ServerWsMessage {
  fn from(ev: StreamEvent) -> Self {
    match ev {
      StreamEvent::Fragment(text) => ServerWsMessage::EvaluationFragment { text },
      StreamEvent::Done(evaluation) => ServerWsMessage::EvaluationDone { evaluation },
      StreamEvent::Cancelled { message } => ServerWsMessage::EvaluationCancelled { message },
      StreamEvent::Error { message, partial } => ServerWsMessage::Error { message, partial },
    }
  }
}

/// Question as shown to candidates: test patterns stay server-side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOut {
  pub id: String,
  pub topic: String,
  pub modality: Modality,
  pub difficulty: String,
  pub prompt: String,
  pub hints: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub starter_source: Option<String>,
  pub test_case_names: Vec<String>,
}

/// Convert full `Question` (internal) to the public DTO.
pub fn to_out(q: &Question) -> QuestionOut {
  QuestionOut {
    id: q.id.clone(),
    topic: q.topic.clone(),
    modality: q.modality,
    difficulty: q.difficulty.clone(),
    prompt: q.prompt.clone(),
    hints: q.hints.clone(),
    starter_source: q.starter_source.clone(),
    test_case_names: q.test_cases.iter().map(|t| t.name.clone()).collect(),
  }
}

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
}

#[derive(Serialize)]
pub struct ErrorOut {
  pub error: String,
}

/// Payload of the SSE `error` event.
#[derive(Serialize)]
pub struct StreamErrorOut {
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub partial: Option<Evaluation>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn evaluate_message_flattens_request() {
    let msg: ClientWsMessage = serde_json::from_str(
      r#"{"type":"evaluate","questionId":"q1","answer":"a","isFollowUp":true,"history":[{"role":"ai","content":"hi"}]}"#,
    )
    .unwrap();
    let ClientWsMessage::Evaluate { request } = msg else { panic!("expected evaluate") };
    assert_eq!(request.question_id, "q1");
    assert!(request.is_follow_up);
    assert_eq!(request.history.len(), 1);
    assert!(request.subject_id.is_none());
  }

  #[test]
  fn server_messages_are_snake_case_tagged() {
    let out = serde_json::to_value(ServerWsMessage::EvaluationCancelled { message: "m".into() }).unwrap();
    assert_eq!(out, serde_json::json!({ "type": "evaluation_cancelled", "message": "m" }));
    let out = serde_json::to_value(ServerWsMessage::Error { message: "x".into(), partial: None }).unwrap();
    assert_eq!(out, serde_json::json!({ "type": "error", "message": "x" }));
  }

  #[test]
  fn public_question_hides_expected_patterns() {
    let q = crate::seeds::seed_questions().into_iter().find(|q| q.id == "react-counter").unwrap();
    let json = serde_json::to_string(&to_out(&q)).unwrap();
    assert!(json.contains("renders default count"));
    assert!(!json.contains("expected_patterns") && !json.contains("Count: 0"));
  }
}

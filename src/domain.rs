//! Domain models: questions and their test cases, conversation turns, and the
//! structured evaluation produced by the model.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Which kind of objective evidence a question needs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
  /// Conceptual explanation, grounded by semantic retrieval over key points.
  Concept,
  /// General code, grounded by running it on the remote judge.
  Code,
  /// UI-component code, grounded by rendering it against test cases.
  #[serde(alias = "ui_component")]
  UiComponent,
}

impl Modality {
  /// Code-like modalities must carry `grounded_evidence` on initial evaluations.
  pub fn is_code_like(self) -> bool {
    matches!(self, Modality::Code | Modality::UiComponent)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Modality::Concept => "concept",
      Modality::Code => "code",
      Modality::UiComponent => "ui-component",
    }
  }
}

/// A render test for UI-component questions.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct TestCase {
  pub name: String,
  #[serde(default)] pub props: BTreeMap<String, serde_json::Value>,
  #[serde(default)] pub expected_patterns: Vec<String>,
}

/// Question as handed over by the question bank. Immutable once loaded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Question {
  pub id: String,
  #[serde(default)] pub topic: String,
  #[serde(alias = "type")]
  pub modality: Modality,
  #[serde(default)] pub difficulty: String,
  #[serde(alias = "question")]
  pub prompt: String,
  #[serde(default)] pub key_points: Vec<String>,
  #[serde(default)] pub hints: Vec<String>,
  #[serde(default)] pub starter_source: Option<String>,
  #[serde(default)] pub test_cases: Vec<TestCase>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  User,
  #[serde(alias = "ai")]
  Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationTurn {
  pub role: Role,
  pub content: String,
  #[serde(default)] pub evaluation: Option<Evaluation>,
}

/// Objective numbers the model is asked to echo back for code-like questions.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct GroundedEvidence {
  #[serde(default)] pub tests_passed: Option<u32>,
  #[serde(default)] pub tests_failed: Option<u32>,
  #[serde(default)] pub stderr_excerpt: Option<String>,
}

/// Terminal structured result of one evaluation turn.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Evaluation {
  #[serde(default)] pub summary: String,
  #[serde(default)] pub score: Option<f32>,
  #[serde(default)] pub grounded_evidence: Option<GroundedEvidence>,
  #[serde(default)] pub pros: Option<Vec<String>>,
  #[serde(default)] pub cons: Option<Vec<String>>,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub next_practice: Vec<String>,
}

impl Evaluation {
  /// Text-only evaluation used when the model output is not the schema.
  pub fn degraded(raw: &str, reason: &str) -> Self {
    Self {
      summary: format!("{}\n\n[format error: {}]", raw.trim(), reason),
      ..Self::default()
    }
  }

  /// Strip everything a follow-up turn is not allowed to carry.
  pub fn into_follow_up(self) -> Self {
    Self {
      summary: self.summary,
      score: None,
      grounded_evidence: None,
      pros: None,
      cons: None,
      next_practice: self.next_practice,
    }
  }
}

fn null_as_empty<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn modality_accepts_kebab_and_snake_case() {
    let m: Modality = serde_json::from_str("\"ui-component\"").unwrap();
    assert_eq!(m, Modality::UiComponent);
    let m: Modality = serde_json::from_str("\"ui_component\"").unwrap();
    assert_eq!(m, Modality::UiComponent);
    assert!(m.is_code_like());
    assert!(!Modality::Concept.is_code_like());
  }

  #[test]
  fn partial_evaluation_fills_defaults() {
    let e: Evaluation = serde_json::from_str(r#"{"summary":"a","score":4}"#).unwrap();
    assert_eq!(e.summary, "a");
    assert_eq!(e.score, Some(4.0));
    assert!(e.pros.is_none());
    assert!(e.next_practice.is_empty());
  }

  #[test]
  fn null_next_practice_is_empty() {
    let e: Evaluation = serde_json::from_str(r#"{"summary":"a","next_practice":null}"#).unwrap();
    assert!(e.next_practice.is_empty());
  }

  #[test]
  fn follow_up_nulls_scoring_fields() {
    let e = Evaluation {
      summary: "s".into(),
      score: Some(3.0),
      grounded_evidence: Some(GroundedEvidence::default()),
      pros: Some(vec!["p".into()]),
      cons: Some(vec![]),
      next_practice: vec!["n".into()],
    }
    .into_follow_up();
    assert!(e.score.is_none() && e.pros.is_none() && e.cons.is_none() && e.grounded_evidence.is_none());
    assert_eq!(e.next_practice, vec!["n".to_string()]);
  }

  #[test]
  fn question_accepts_legacy_field_names() {
    let q: Question = serde_json::from_str(
      r#"{"id":"q1","type":"concept","question":"What is a closure?","key_points":["scope"]}"#,
    )
    .unwrap();
    assert_eq!(q.modality, Modality::Concept);
    assert_eq!(q.prompt, "What is a closure?");
    assert!(q.test_cases.is_empty());
  }

  #[test]
  fn ai_role_alias() {
    let t: ConversationTurn = serde_json::from_str(r#"{"role":"ai","content":"hi"}"#).unwrap();
    assert_eq!(t.role, Role::Assistant);
  }
}

//! Prompt/context builder. Pure: the same inputs always produce the same bytes.

use crate::config::Prompts;
use crate::domain::{ConversationTurn, Modality, Role};
use crate::evidence::{EvidenceSlots, NOT_APPLICABLE};
use crate::util::fill_template;

pub const NO_HISTORY: &str = "No previous conversation.";

const JSON_SCHEMA: &str = r#"{
  "summary": "string",
  "score": "number (1-5) | null",
  "grounded_evidence": { "tests_passed": "number|null", "tests_failed": "number|null", "stderr_excerpt": "string|null" } | null,
  "pros": ["string"] | null,
  "cons": ["string"] | null,
  "next_practice": ["string"]
}"#;

/// Everything one prompt is built from.
pub struct PromptInputs<'a> {
  pub history: &'a [ConversationTurn],
  pub question: &'a str,
  pub answer: &'a str,
  pub slots: &'a EvidenceSlots,
  pub is_follow_up: bool,
  pub modality: Modality,
}

/// Last `window` turns as `User: …` / `AI: …` lines.
pub fn format_history(history: &[ConversationTurn], window: usize) -> String {
  if history.is_empty() || window == 0 {
    return NO_HISTORY.into();
  }
  let start = history.len().saturating_sub(window);
  history[start..]
    .iter()
    .map(|turn| {
      let prefix = match turn.role {
        Role::User => "User",
        Role::Assistant => "AI",
      };
      format!("{prefix}: {}", turn.content)
    })
    .collect::<Vec<_>>()
    .join("\n")
}

fn task_text(prompts: &Prompts, inputs: &PromptInputs<'_>) -> String {
  let instructions = if inputs.is_follow_up {
    prompts.follow_up_instructions.clone()
  } else {
    let mut text = fill_template(&prompts.initial_instructions, &[("placeholder", NOT_APPLICABLE)]);
    let rule = if inputs.modality.is_code_like() {
      format!("This is a {} question: `grounded_evidence` MUST be populated.", inputs.modality.as_str())
    } else {
      "This is a concept question: `grounded_evidence` MUST be `null`.".to_string()
    };
    text.push_str("\n\n");
    text.push_str(&rule);
    text
  };
  format!("{}\n{}", instructions.trim_end(), prompts.language_directive.trim())
}

pub fn build_prompt(prompts: &Prompts, history_window: usize, inputs: &PromptInputs<'_>) -> String {
  let sections: [(&str, String); 9] = [
    ("role", prompts.role.trim().to_string()),
    ("task", task_text(prompts, inputs)),
    ("json_schema", JSON_SCHEMA.to_string()),
    ("conversation_history", format_history(inputs.history, history_window)),
    ("question", inputs.question.to_string()),
    ("rag_context", inputs.slots.rag_context.clone()),
    ("judge0_result", inputs.slots.judge_result.clone()),
    ("render_tests", inputs.slots.render_tests.clone()),
    ("user_answer", inputs.answer.to_string()),
  ];
  sections
    .iter()
    .map(|(tag, body)| format!("<{tag}>\n{body}\n</{tag}>"))
    .collect::<Vec<_>>()
    .join("\n")
}

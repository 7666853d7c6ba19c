//! Built-in questions so the service is usable without a TOML question bank.

use std::collections::BTreeMap;

use serde_json::json;

use crate::domain::{Modality, Question, TestCase};

/// One question per modality.
pub fn seed_questions() -> Vec<Question> {
  vec![
    Question {
      id: "js-closures".into(),
      topic: "javascript".into(),
      modality: Modality::Concept,
      difficulty: "medium".into(),
      prompt: "What is a closure in JavaScript, and when would you use one?".into(),
      key_points: vec![
        "A closure is a function bundled with its lexical environment.".into(),
        "Inner functions keep access to outer variables after the outer function returns.".into(),
        "Common uses: data privacy, factories, memoization, event handlers.".into(),
      ],
      hints: vec!["Think about what a returned inner function can still see.".into()],
      starter_source: None,
      test_cases: vec![],
    },
    Question {
      id: "js-sum-array".into(),
      topic: "javascript".into(),
      modality: Modality::Code,
      difficulty: "easy".into(),
      prompt: "Write `sum(numbers)` returning the sum of an array of numbers, then print `sum([1, 2, 3, 4])`.".into(),
      key_points: vec!["Handles the empty array (returns 0).".into(), "Does not mutate its input.".into()],
      hints: vec!["`Array.prototype.reduce` takes an initial value.".into()],
      starter_source: Some("function sum(numbers) {\n  // your code\n}\n\nconsole.log(sum([1, 2, 3, 4]));\n".into()),
      test_cases: vec![],
    },
    Question {
      id: "react-counter".into(),
      topic: "react".into(),
      modality: Modality::UiComponent,
      difficulty: "easy".into(),
      prompt: "Build a `Counter` component that shows `Count: N` starting from the `initial` prop (default 0) and has an `Increment` button.".into(),
      key_points: vec![
        "State is held with `useState`.".into(),
        "The initial value comes from props with a default.".into(),
      ],
      hints: vec!["Default the prop in the parameter list: `{ initial = 0 }`.".into()],
      starter_source: Some(
        "import { useState } from 'react';\n\nexport default function Counter({ initial = 0 }) {\n  // your code\n}\n".into(),
      ),
      test_cases: vec![
        test_case("renders default count", json!({}), &["Count: 0", "Increment"]),
        test_case("respects initial prop", json!({ "initial": 5 }), &["Count: 5"]),
        test_case("renders a button", json!({ "initial": 1 }), &["<button"]),
      ],
    },
  ]
}

fn test_case(name: &str, props: serde_json::Value, patterns: &[&str]) -> TestCase {
  let props: BTreeMap<String, serde_json::Value> = match props {
    serde_json::Value::Object(map) => map.into_iter().collect(),
    _ => BTreeMap::new(),
  };
  TestCase { name: name.into(), props, expected_patterns: patterns.iter().map(|p| p.to_string()).collect() }
}

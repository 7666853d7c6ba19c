//! Component test harness: compile candidate UI-component source, render it per
//! test case in a fresh sandbox, and check the markup against expected patterns.
//!
//! Compile failures (and exports that are not components) fail the whole run with
//! no per-case results. Everything after that is isolated per case: a case that
//! throws is reported as failed and the remaining cases still run.

pub mod ast;
pub mod parser;
pub mod render;
pub mod sandbox;

use std::fmt::Write as _;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::config::HarnessSettings;
use crate::domain::TestCase;
use crate::util::trunc_for_log;

use self::ast::Program;
use self::parser::{parse_program, UNSUPPORTED_PREFIX};
use self::sandbox::{Interpreter, Limits, RenderError, RenderResult, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
  pub name: String,
  pub passed: bool,
  pub actual: String,
  pub expected: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub missing: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
  /// The candidate compiled and its module yielded a component. Per-case
  /// outcomes live in `results`.
  pub success: bool,
  pub results: Vec<TestCaseResult>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl HarnessReport {
  fn failed(error: String) -> Self {
    Self { success: false, results: vec![], error: Some(error) }
  }

  pub fn passed_count(&self) -> usize {
    self.results.iter().filter(|r| r.passed).count()
  }
}

/// Deeply nested candidate values recurse on drop and render.
const WORKER_STACK_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ComponentHarness {
  component_name: String,
  limits: Limits,
}

impl ComponentHarness {
  pub fn new(settings: &HarnessSettings) -> Self {
    Self {
      component_name: settings.component_name.clone(),
      limits: Limits {
        step_budget: settings.step_budget,
        timeout: Duration::from_millis(settings.render_timeout_ms),
      },
    }
  }

  /// Synchronous and CPU-bound; async callers should run it on a blocking thread.
  #[instrument(level = "info", target = "harness", skip_all, fields(src_len = source.len(), cases = test_cases.len()))]
  pub fn evaluate(&self, source: &str, test_cases: &[TestCase]) -> HarnessReport {
    let program = match parse_program(source) {
      Ok(p) => p,
      Err(e) => {
        info!(target: "harness", error = %e, "Candidate failed to compile");
        return HarnessReport::failed(e.to_string());
      }
    };

    // Instantiate once up front so a broken module or a non-component export fails like a compile error.
    if let Err(e) = self.instantiate(&program).map(|_| ()) {
      info!(target: "harness", error = %e, "Candidate module did not yield a component");
      return HarnessReport::failed(e.to_string());
    }

    let results: Vec<TestCaseResult> = test_cases.iter().map(|case| self.run_case(&program, case)).collect();
    info!(
      target: "harness",
      passed = results.iter().filter(|r| r.passed).count(),
      total = results.len(),
      "Component tests finished"
    );
    HarnessReport { success: true, results, error: None }
  }

  /// `evaluate` on a dedicated thread with a large stack. Blocks until it finishes;
  /// a panic in the sandbox comes back as `Err` instead of unwinding into the caller.
  pub fn evaluate_in_worker(&self, source: String, test_cases: Vec<TestCase>) -> Result<HarnessReport, String> {
    let harness = self.clone();
    let worker = thread::Builder::new()
      .name("component-harness".into())
      .stack_size(WORKER_STACK_BYTES)
      .spawn(move || harness.evaluate(&source, &test_cases))
      .map_err(|e| format!("could not start harness worker: {e}"))?;
    worker.join().map_err(|_| {
      error!(target: "harness", "Harness worker panicked");
      "harness worker panicked".to_string()
    })
  }

  /// Run the module in a fresh sandbox and resolve the exported component.
  fn instantiate(&self, program: &Program) -> RenderResult<(Interpreter, Value)> {
    let mut interp = Interpreter::new(self.limits);
    match interp.load_module(program, &self.component_name)? {
      Some(component) if component.is_callable() => Ok((interp, component)),
      Some(other) => Err(RenderError(format!(
        "exported component must be a function, got {}",
        other.type_of()
      ))),
      None => Err(RenderError(format!(
        "no default export and no component named '{}' found",
        self.component_name
      ))),
    }
  }

  fn run_case(&self, program: &Program, case: &TestCase) -> TestCaseResult {
    let rendered = self.instantiate(program).and_then(|(mut interp, component)| {
      let props = case.props.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect();
      render::render_root(&mut interp, &component, props)
    });

    match rendered {
      Ok(html) => {
        let missing: Vec<String> =
          case.expected_patterns.iter().filter(|p| !html.contains(p.as_str())).cloned().collect();
        debug!(target: "harness", case = %case.name, html = %trunc_for_log(&html, 200), missing = missing.len(), "Rendered case");
        TestCaseResult {
          name: case.name.clone(),
          passed: missing.is_empty(),
          actual: html,
          expected: case.expected_patterns.clone(),
          missing: if missing.is_empty() { None } else { Some(missing) },
          error: None,
        }
      }
      Err(e) => {
        debug!(target: "harness", case = %case.name, error = %e, "Render error");
        TestCaseResult {
          name: case.name.clone(),
          passed: false,
          actual: format!("render error: {e}"),
          expected: case.expected_patterns.clone(),
          missing: None,
          error: Some(e.to_string()),
        }
      }
    }
  }
}

/// Human-readable summary used as grounding text.
pub fn format_report(report: &HarnessReport) -> String {
  let mut out = String::new();
  if let Some(err) = &report.error {
    if err.starts_with(UNSUPPORTED_PREFIX) {
      let _ = writeln!(out, "Harness limitation (not a defect in the answer): {err}");
      let _ = writeln!(out, "The component could not be executed, so no test results are available.");
    } else {
      let _ = writeln!(out, "Compilation failed: {err}");
    }
    return out.trim_end().to_string();
  }
  let _ = writeln!(out, "Passed {} of {} test cases.", report.passed_count(), report.results.len());
  for r in &report.results {
    let mark = if r.passed { "✅" } else { "❌" };
    let _ = writeln!(out, "{mark} {}", r.name);
    if r.passed {
      continue;
    }
    if let Some(err) = &r.error {
      let _ = writeln!(out, "   error: {err}");
    }
    if let Some(missing) = &r.missing {
      let _ = writeln!(out, "   missing patterns: {}", missing.join(", "));
    }
    if r.error.is_none() {
      let _ = writeln!(out, "   rendered: {}", r.actual);
    }
  }
  out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;

  const COUNTER: &str = r#"
    import { useState } from 'react';

    export default function Counter({ initial = 0, step }) {
      const [count, setCount] = useState(initial);
      if (step === 'boom') {
        throw_it();
      }
      return (
        <div className="counter">
          <span>Count: {count}</span>
          <button onClick={() => setCount(count + 1)}>Increment</button>
        </div>
      );
    }
  "#;

  fn case(name: &str, props: serde_json::Value, patterns: &[&str]) -> TestCase {
    let props: BTreeMap<String, serde_json::Value> = match props {
      serde_json::Value::Object(map) => map.into_iter().collect(),
      _ => BTreeMap::new(),
    };
    TestCase { name: name.into(), props, expected_patterns: patterns.iter().map(|p| p.to_string()).collect() }
  }

  fn harness() -> ComponentHarness {
    ComponentHarness::new(&HarnessSettings::default())
  }

  #[test]
  fn passing_case_has_no_missing_patterns() {
    let report = harness().evaluate(COUNTER, &[case("initial", serde_json::json!({"initial": 3}), &["Count: 3", "Increment"])]);
    assert!(report.success);
    let r = &report.results[0];
    assert!(r.passed);
    assert_eq!(r.missing, None);
    assert_eq!(r.error, None);
    assert!(r.actual.starts_with(r#"<div class="counter">"#), "{}", r.actual);
  }

  #[test]
  fn missing_pattern_is_reported() {
    let report = harness().evaluate(COUNTER, &[case("label", serde_json::json!({}), &["Count: 0", "Reset"])]);
    assert!(report.success);
    let r = &report.results[0];
    assert!(!r.passed);
    assert_eq!(r.missing, Some(vec!["Reset".to_string()]));
  }

  #[test]
  fn throwing_case_does_not_stop_siblings() {
    let report = harness().evaluate(
      COUNTER,
      &[
        case("boom", serde_json::json!({"step": "boom"}), &["Count"]),
        case("ok", serde_json::json!({}), &["Count: 0"]),
      ],
    );
    assert!(report.success);
    let boom = &report.results[0];
    assert!(!boom.passed);
    assert_eq!(boom.error.as_deref(), Some("ReferenceError: throw_it is not defined"));
    assert_eq!(boom.actual, "render error: ReferenceError: throw_it is not defined");
    assert!(report.results[1].passed);
  }

  #[test]
  fn compile_error_yields_no_results() {
    let report = harness().evaluate("export default function Counter( {", &[case("x", serde_json::json!({}), &["a"])]);
    assert!(!report.success);
    assert!(report.results.is_empty());
    assert!(report.error.as_deref().unwrap_or_default().starts_with("SyntaxError"));
  }

  #[test]
  fn non_function_export_fails_like_compile_error() {
    let report = harness().evaluate("export default 42;", &[case("x", serde_json::json!({}), &["a"])]);
    assert!(!report.success);
    assert!(report.results.is_empty());
    assert!(report.error.unwrap().contains("must be a function"));
  }

  #[test]
  fn falls_back_to_configured_component_name() {
    let src = "function Counter() { return <p>fallback</p>; }";
    let report = harness().evaluate(src, &[case("x", serde_json::json!({}), &["<p>fallback</p>"])]);
    assert!(report.success);
  }

  #[test]
  fn step_budget_exhaustion_is_a_render_error() {
    let settings = HarnessSettings { step_budget: 200, ..HarnessSettings::default() };
    let src = r#"
      export default function Counter() {
        const rows = [1,2,3,4,5,6,7,8,9,10];
        return <ul>{rows.map(r => rows.map(c => <li>{r * c}</li>))}</ul>;
      }
    "#;
    let report = ComponentHarness::new(&settings).evaluate(src, &[case("grid", serde_json::json!({}), &["<li>"])]);
    let r = &report.results[0];
    assert!(!r.passed);
    assert!(r.error.as_deref().unwrap_or_default().contains("step budget"));
  }

  #[test]
  fn self_referencing_array_stringifies_in_markup() {
    let joined = "function Counter() { const a = []; a.push(a); return <p>{a.join()}</p>; }";
    let coerced = "function Counter() { const a = []; a.push(a); return <p>{String(a)}</p>; }";
    for src in [joined, coerced] {
      let report = harness().evaluate(src, &[case("x", serde_json::json!({}), &["<p></p>"])]);
      assert!(report.results[0].passed, "{:?}", report);
    }
  }

  #[test]
  fn self_referencing_array_child_is_a_case_error() {
    let src = "function Counter() { const a = []; a.push(a); return <p>{a}</p>; }";
    let report = harness().evaluate(src, &[case("x", serde_json::json!({}), &["<p>"])]);
    assert!(report.success);
    let r = &report.results[0];
    assert!(!r.passed);
    assert!(r.error.as_deref().unwrap_or_default().contains("Maximum call stack size exceeded"), "{:?}", r);
  }

  #[test]
  fn deeply_nested_arrays_are_contained_in_the_worker() {
    let src = r#"
      function Counter() {
        let a = [];
        for (let i = 0; i < 5000; i++) { a = [a]; }
        return <p>{a}{String(a).length}</p>;
      }
    "#;
    let report = harness().evaluate_in_worker(src.to_string(), vec![case("x", serde_json::json!({}), &["<p>"])]).unwrap();
    assert!(report.success);
    let r = &report.results[0];
    assert!(!r.passed);
    assert!(r.error.as_deref().unwrap_or_default().contains("nested too deeply"), "{:?}", r);
  }

  #[test]
  fn loops_render_like_any_other_code() {
    let src = "function Counter(){ let s=0; for(let i=0;i<3;i++){s+=i} return <p>{s}</p> }";
    let report = harness().evaluate(src, &[case("sum", serde_json::json!({}), &["<p>3</p>"])]);
    assert!(report.success, "{:?}", report);
    assert!(report.results[0].passed, "{:?}", report.results[0]);
  }

  #[test]
  fn unsupported_construct_is_reported_as_harness_limitation() {
    let src = "class Counter extends React.Component { render() { return <p/>; } }";
    let report = harness().evaluate(src, &[case("x", serde_json::json!({}), &["<p"])]);
    assert!(!report.success);
    assert!(report.results.is_empty());
    assert!(report.error.as_deref().unwrap_or_default().starts_with(UNSUPPORTED_PREFIX));
    let text = format_report(&report);
    assert!(text.starts_with("Harness limitation"), "{text}");
    assert!(!text.contains("Compilation failed"));
  }

  #[test]
  fn report_formatting_lists_failures_with_markup() {
    let report = harness().evaluate(
      COUNTER,
      &[case("ok", serde_json::json!({}), &["Count: 0"]), case("bad", serde_json::json!({}), &["Nope"])],
    );
    let text = format_report(&report);
    assert!(text.starts_with("Passed 1 of 2 test cases."));
    assert!(text.contains("✅ ok"));
    assert!(text.contains("❌ bad"));
    assert!(text.contains("missing patterns: Nope"));
    assert!(text.contains("rendered: <div class=\"counter\">"));
  }
}

//! Streaming evaluation orchestrator.
//!
//! `idle → streaming → {done | cancelled | error}`. Fragments are forwarded to the
//! caller as they arrive and folded into an accumulator; at end of stream the
//! accumulator is parsed into an `Evaluation`, the evaluation invariants are
//! enforced, and the completion sink fires exactly once. Cancellation and
//! transport errors never reach the sink.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::domain::{Evaluation, GroundedEvidence, Modality};
use crate::error::EngineError;
use crate::model::FragmentStream;

/// Replaces the in-flight message when the caller aborts.
pub const CANCELLED_MARKER: &str = "[Evaluation cancelled by user]";

/// Cooperative cancellation shared between the caller and the orchestrator.
#[derive(Clone, Debug)]
pub struct CancelToken {
  tx: Arc<watch::Sender<bool>>,
  rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
  fn default() -> Self {
    Self::new()
  }
}

impl CancelToken {
  pub fn new() -> Self {
    let (tx, rx) = watch::channel(false);
    Self { tx: Arc::new(tx), rx }
  }

  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once `cancel` has been called on any clone.
  pub async fn cancelled(&self) {
    let mut rx = self.rx.clone();
    while !*rx.borrow_and_update() {
      // The sender lives as long as any clone of the token, including this one.
      if rx.changed().await.is_err() {
        return std::future::pending().await;
      }
    }
  }
}

/// Accumulator for streamed text. Kept separate from the transport so the
/// parse/degrade rules can be exercised without a live stream.
#[derive(Debug, Default)]
pub struct StreamFold {
  accumulated: String,
  fragments: usize,
}

impl StreamFold {
  pub fn push(&mut self, fragment: &str) {
    self.accumulated.push_str(fragment);
    self.fragments += 1;
  }

  pub fn text(&self) -> &str {
    &self.accumulated
  }

  pub fn is_empty(&self) -> bool {
    self.accumulated.trim().is_empty()
  }

  pub fn fragments(&self) -> usize {
    self.fragments
  }

  /// Parse the accumulated text. The flag is false when the result is degraded.
  /// JSON without a non-empty `summary` does not match the schema and degrades too.
  pub fn finish(self) -> (Evaluation, bool) {
    let reason = match serde_json::from_str::<Evaluation>(strip_code_fence(&self.accumulated)) {
      Ok(evaluation) if !evaluation.summary.trim().is_empty() => return (evaluation, true),
      Ok(_) => "missing or empty `summary`".to_string(),
      Err(e) => e.to_string(),
    };
    let err = EngineError::Parse(reason.clone());
    warn!(target: "evaluation", error = %err, raw_len = self.accumulated.len(), "Degrading unparseable model output");
    (Evaluation::degraded(&self.accumulated, &reason), false)
  }
}

/// Models sometimes wrap JSON mode output in a markdown fence anyway.
fn strip_code_fence(text: &str) -> &str {
  let t = text.trim();
  let Some(inner) = t.strip_prefix("```") else { return t };
  let inner = inner.strip_prefix("json").unwrap_or(inner);
  inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Deterministic post-processing of whatever the model produced.
#[derive(Clone, Debug)]
pub struct Resolution {
  pub is_follow_up: bool,
  pub modality: Modality,
  /// Numbers taken from the gathered evidence; they win over the model's.
  pub objective: Option<GroundedEvidence>,
}

impl Resolution {
  pub fn apply(&self, evaluation: Evaluation) -> Evaluation {
    if self.is_follow_up {
      return evaluation.into_follow_up();
    }
    let mut evaluation = evaluation;
    evaluation.score = evaluation.score.filter(|s| s.is_finite()).map(|s| s.clamp(1.0, 5.0));
    evaluation.grounded_evidence = if self.modality.is_code_like() {
      let reported = evaluation.grounded_evidence.take().unwrap_or_default();
      Some(match &self.objective {
        Some(o) => GroundedEvidence {
          tests_passed: o.tests_passed.or(reported.tests_passed),
          tests_failed: o.tests_failed.or(reported.tests_failed),
          stderr_excerpt: o.stderr_excerpt.clone().or(reported.stderr_excerpt),
        },
        None => reported,
      })
    } else {
      None
    };
    evaluation
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
  Fragment(String),
  Done(Evaluation),
  Cancelled { message: String },
  Error { message: String, partial: Option<Evaluation> },
}

#[derive(Debug)]
pub enum StreamOutcome {
  Done(Evaluation),
  Cancelled,
  Failed(EngineError),
}

/// Receives the resolved evaluation once a stream finishes normally.
#[async_trait]
pub trait CompletionSink: Send + Sync {
  async fn complete(&self, evaluation: &Evaluation, raw: &str);
}

/// Drive one generation to a terminal state, forwarding events to `events`.
/// A closed `events` channel counts as the caller going away.
#[instrument(level = "info", target = "evaluation", skip_all, fields(follow_up = resolution.is_follow_up, modality = resolution.modality.as_str()))]
pub async fn run_stream(
  mut fragments: FragmentStream,
  resolution: Resolution,
  events: mpsc::Sender<StreamEvent>,
  cancel: CancelToken,
  sink: Arc<dyn CompletionSink>,
) -> StreamOutcome {
  let mut fold = StreamFold::default();

  loop {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        info!(target: "evaluation", fragments = fold.fragments(), "Stream cancelled by caller");
        let _ = events.send(StreamEvent::Cancelled { message: CANCELLED_MARKER.into() }).await;
        return StreamOutcome::Cancelled;
      }
      next = fragments.next() => match next {
        Some(Ok(fragment)) => {
          fold.push(&fragment);
          if events.send(StreamEvent::Fragment(fragment)).await.is_err() {
            debug!(target: "evaluation", "Caller went away mid-stream; aborting generation");
            cancel.cancel();
            return StreamOutcome::Cancelled;
          }
        }
        Some(Err(e)) => {
          warn!(target: "evaluation", error = %e, fragments = fold.fragments(), "Stream failed mid-generation");
          let partial = (!fold.is_empty())
            .then(|| resolution.apply(Evaluation::degraded(fold.text(), &e.to_string())));
          let _ = events.send(StreamEvent::Error { message: e.to_string(), partial }).await;
          return StreamOutcome::Failed(e);
        }
        None => break,
      }
    }
  }

  let raw = fold.text().to_string();
  let fragment_count = fold.fragments();
  let (evaluation, parsed) = fold.finish();
  let evaluation = resolution.apply(evaluation);
  info!(target: "evaluation", fragments = fragment_count, raw_len = raw.len(), parsed, score = ?evaluation.score, "Stream finished");

  let _ = events.send(StreamEvent::Done(evaluation.clone())).await;
  sink.complete(&evaluation, &raw).await;
  StreamOutcome::Done(evaluation)
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use futures::stream;

  use super::*;

  #[derive(Default)]
  struct RecordingSink(Mutex<Vec<(Evaluation, String)>>);

  #[async_trait]
  impl CompletionSink for RecordingSink {
    async fn complete(&self, evaluation: &Evaluation, raw: &str) {
      self.0.lock().unwrap().push((evaluation.clone(), raw.to_string()));
    }
  }

  fn concept() -> Resolution {
    Resolution { is_follow_up: false, modality: Modality::Concept, objective: None }
  }

  fn fragments(parts: &[&str]) -> FragmentStream {
    let items: Vec<Result<String, EngineError>> = parts.iter().map(|p| Ok(p.to_string())).collect();
    stream::iter(items).boxed()
  }

  #[test]
  fn fold_parses_fragments_into_evaluation() {
    let mut fold = StreamFold::default();
    fold.push(r#"{"summary":"a","#);
    fold.push(r#""score":4,"next_practice":null}"#);
    let (evaluation, parsed) = fold.finish();
    assert!(parsed);
    assert_eq!(evaluation.summary, "a");
    assert_eq!(evaluation.score, Some(4.0));
    assert!(evaluation.next_practice.is_empty());
  }

  #[test]
  fn fold_degrades_malformed_output() {
    let mut fold = StreamFold::default();
    fold.push("not json at all");
    let (evaluation, parsed) = fold.finish();
    assert!(!parsed);
    assert!(evaluation.summary.starts_with("not json at all\n\n[format error: "));
    assert_eq!(evaluation.score, None);
  }

  #[test]
  fn json_without_summary_is_degraded() {
    for raw in [r#"{"feedback":"Great job, but handle empty arrays."}"#, "{}", r#"{"summary":"  "}"#] {
      let mut fold = StreamFold::default();
      fold.push(raw);
      let (evaluation, parsed) = fold.finish();
      assert!(!parsed, "{raw}");
      assert!(evaluation.summary.starts_with(raw), "{}", evaluation.summary);
      assert!(evaluation.summary.contains("[format error: missing or empty `summary`]"));
    }
  }

  #[test]
  fn fenced_json_is_accepted() {
    let mut fold = StreamFold::default();
    fold.push("```json\n{\"summary\":\"ok\"}\n```");
    assert!(fold.finish().1);
  }

  #[test]
  fn resolution_enforces_invariants() {
    let raw = Evaluation {
      summary: "s".into(),
      score: Some(9.0),
      grounded_evidence: Some(GroundedEvidence { tests_passed: Some(1), ..Default::default() }),
      pros: Some(vec!["p".into()]),
      cons: Some(vec![]),
      next_practice: vec![],
    };

    let concept = concept().apply(raw.clone());
    assert_eq!(concept.grounded_evidence, None);
    assert_eq!(concept.score, Some(5.0));

    let code = Resolution {
      is_follow_up: false,
      modality: Modality::UiComponent,
      objective: Some(GroundedEvidence { tests_passed: Some(2), tests_failed: Some(1), stderr_excerpt: None }),
    }
    .apply(Evaluation { grounded_evidence: None, ..raw.clone() });
    assert_eq!(code.grounded_evidence.unwrap().tests_passed, Some(2));

    let follow_up = Resolution { is_follow_up: true, modality: Modality::Code, objective: None }.apply(raw);
    assert_eq!(follow_up.score, None);
    assert_eq!(follow_up.pros, None);
    assert_eq!(follow_up.cons, None);
    assert_eq!(follow_up.grounded_evidence, None);
  }

  #[tokio::test]
  async fn two_fragments_resolve_and_fire_sink() {
    let (tx, mut rx) = mpsc::channel(16);
    let sink = Arc::new(RecordingSink::default());
    let outcome = run_stream(
      fragments(&[r#"{"summary":"a","#, r#""score":4}"#]),
      concept(),
      tx,
      CancelToken::new(),
      sink.clone(),
    )
    .await;

    let StreamOutcome::Done(evaluation) = outcome else { panic!("expected done") };
    assert_eq!(evaluation.summary, "a");
    assert_eq!(evaluation.score, Some(4.0));

    let mut events = vec![];
    while let Ok(ev) = rx.try_recv() {
      events.push(ev);
    }
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], StreamEvent::Fragment(f) if f == r#"{"summary":"a","#));
    assert!(matches!(&events[2], StreamEvent::Done(e) if e.summary == "a"));
    assert_eq!(sink.0.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn malformed_stream_still_fires_sink_with_degraded_result() {
    let (tx, _rx) = mpsc::channel(16);
    let sink = Arc::new(RecordingSink::default());
    let outcome = run_stream(fragments(&["oops"]), concept(), tx, CancelToken::new(), sink.clone()).await;
    let StreamOutcome::Done(evaluation) = outcome else { panic!("expected done") };
    assert!(evaluation.summary.contains("[format error:"));
    let calls = sink.0.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, "oops");
  }

  #[tokio::test]
  async fn cancel_after_first_fragment_skips_sink() {
    let (tx, mut rx) = mpsc::channel(16);
    let sink = Arc::new(RecordingSink::default());
    let cancel = CancelToken::new();
    let endless = stream::iter(vec![Ok::<_, EngineError>("{\"summary\":".to_string())]).chain(stream::pending()).boxed();

    let task = tokio::spawn(run_stream(endless, concept(), tx, cancel.clone(), sink.clone()));
    assert!(matches!(rx.recv().await, Some(StreamEvent::Fragment(_))));
    cancel.cancel();

    assert!(matches!(task.await.unwrap(), StreamOutcome::Cancelled));
    assert_eq!(rx.recv().await, Some(StreamEvent::Cancelled { message: CANCELLED_MARKER.into() }));
    assert!(sink.0.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn transport_error_mid_stream_reports_partial_and_skips_sink() {
    let (tx, mut rx) = mpsc::channel(16);
    let sink = Arc::new(RecordingSink::default());
    let items = vec![Ok("partial text".to_string()), Err(EngineError::Transport("reset".into()))];
    let outcome = run_stream(stream::iter(items).boxed(), concept(), tx, CancelToken::new(), sink.clone()).await;
    assert!(matches!(outcome, StreamOutcome::Failed(EngineError::Transport(_))));
    rx.recv().await;
    match rx.recv().await {
      Some(StreamEvent::Error { partial: Some(p), .. }) => assert!(p.summary.starts_with("partial text")),
      other => panic!("unexpected {other:?}"),
    }
    assert!(sink.0.lock().unwrap().is_empty());
  }
}

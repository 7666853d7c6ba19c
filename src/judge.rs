//! Remote code-execution judge client (Judge0 wire protocol).
//!
//! The judge is asynchronous: a submission returns a token, and the result has to be
//! polled until the status ordinal leaves the queued/processing range. `JudgeClient`
//! runs that submit → poll state machine over a `JudgeTransport`; the HTTP transport
//! talks to Judge0, tests plug in a scripted one.
//!
//! Retrying lives one layer up in `execute_with_evidence`, so every retried attempt
//! gets a fresh token.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::JudgeSettings;
use crate::error::EngineError;
use crate::evidence::{Evidence, EvidenceSource};
use crate::util::{retry_with_backoff, trunc_for_log, RetryPolicy};

/// Status ordinals at or below this value mean "still queued or running".
const STATUS_PROCESSING: u32 = 2;

pub const EXECUTION_FALLBACK: &str =
  "Code execution service is temporarily unavailable; no objective execution result could be obtained.";
pub const EXECUTION_TIMEOUT_FALLBACK: &str =
  "Code execution did not finish in time; no objective execution result could be obtained.";

/// Decoded outcome of a finished submission.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionResult {
  pub status_id: u32,
  pub status_description: String,
  pub stdout: Option<String>,
  pub stderr: Option<String>,
  pub compile_output: Option<String>,
}

/// One poll read as it comes off the wire (outputs still base64).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubmissionSnapshot {
  #[serde(default)] pub status_id: Option<u32>,
  #[serde(default)] pub status: Option<StatusWire>,
  #[serde(default)] pub stdout: Option<String>,
  #[serde(default)] pub stderr: Option<String>,
  #[serde(default)] pub compile_output: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StatusWire {
  pub id: u32,
  #[serde(default)] pub description: String,
}

impl SubmissionSnapshot {
  /// Judge0 reports either a flat `status_id` or a nested `status` object depending on `fields`.
  pub fn status_ordinal(&self) -> u32 {
    self.status_id.or_else(|| self.status.as_ref().map(|s| s.id)).unwrap_or(0)
  }

  pub fn is_terminal(&self) -> bool {
    self.status_ordinal() > STATUS_PROCESSING
  }

  fn decode(self) -> Result<ExecutionResult, EngineError> {
    let status_id = self.status_ordinal();
    let status_description = self
      .status
      .as_ref()
      .map(|s| s.description.clone())
      .filter(|d| !d.is_empty())
      .unwrap_or_else(|| "N/A".into());
    Ok(ExecutionResult {
      status_id,
      status_description,
      stdout: decode_b64(self.stdout)?,
      stderr: decode_b64(self.stderr)?,
      compile_output: decode_b64(self.compile_output)?,
    })
  }
}

/// Absent stays `None`; Judge0 wraps its base64 at 60 columns, so whitespace is dropped first.
fn decode_b64(field: Option<String>) -> Result<Option<String>, EngineError> {
  let Some(raw) = field else { return Ok(None) };
  let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
  let bytes = STANDARD
    .decode(compact.as_bytes())
    .map_err(|e| EngineError::Transport(format!("judge returned invalid base64: {e}")))?;
  Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Wire-level operations against the judge.
#[async_trait]
pub trait JudgeTransport: Send + Sync {
  /// Submit base64-encoded source without waiting; returns the submission token.
  async fn submit(&self, source_b64: &str, language_id: u32) -> Result<String, EngineError>;
  /// Read the current state of a submission.
  async fn poll(&self, token: &str) -> Result<SubmissionSnapshot, EngineError>;
}

/// What the evidence coordinator needs from a judge.
#[async_trait]
pub trait CodeJudge: Send + Sync {
  async fn execute(&self, source: &str) -> Result<ExecutionResult, EngineError>;
}

/// Submit/poll state machine over a transport.
pub struct JudgeClient<T> {
  transport: T,
  language_id: u32,
  poll_interval: Duration,
  max_polls: u32,
}

impl<T: JudgeTransport> JudgeClient<T> {
  pub fn new(transport: T, settings: &JudgeSettings) -> Self {
    Self {
      transport,
      language_id: settings.language_id,
      poll_interval: settings.poll_interval(),
      max_polls: settings.max_polls,
    }
  }
}

#[async_trait]
impl<T: JudgeTransport> CodeJudge for JudgeClient<T> {
  #[instrument(level = "info", skip(self, source), fields(source_len = source.len(), language_id = self.language_id))]
  async fn execute(&self, source: &str) -> Result<ExecutionResult, EngineError> {
    let encoded = STANDARD.encode(source.as_bytes());
    let token = self.transport.submit(&encoded, self.language_id).await?;
    debug!(target: "judge", %token, "Submission accepted");

    for poll in 1..=self.max_polls {
      tokio::time::sleep(self.poll_interval).await;
      match self.transport.poll(&token).await {
        Ok(snapshot) if snapshot.is_terminal() => {
          info!(target: "judge", %token, poll, status = snapshot.status_ordinal(), "Submission finished");
          return snapshot.decode();
        }
        Ok(snapshot) => {
          debug!(target: "judge", %token, poll, status = snapshot.status_ordinal(), "Submission still pending");
        }
        Err(e) => {
          warn!(target: "judge", %token, poll, error = %e, "Poll failed; retrying on next tick");
        }
      }
    }

    Err(EngineError::JudgeTimeout { polls: self.max_polls })
  }
}

/// Execute with retry-with-backoff and fold the outcome into evidence.
///
/// Never fails: once retries are exhausted the evidence is `Unavailable` with
/// fallback text, worded differently for a timeout than for a transport failure.
pub async fn execute_with_evidence(
  judge: &dyn CodeJudge,
  source: &str,
  policy: RetryPolicy,
  on_retry: impl FnMut(u32, &EngineError),
) -> Evidence {
  match retry_with_backoff(policy, || judge.execute(source), on_retry).await {
    Ok(result) => Evidence::Execution {
      stdout: result.stdout,
      stderr: result.stderr,
      compile_output: result.compile_output,
      status_description: result.status_description,
    },
    Err(e) => {
      let message = match e {
        EngineError::JudgeTimeout { .. } => EXECUTION_TIMEOUT_FALLBACK,
        _ => EXECUTION_FALLBACK,
      };
      warn!(target: "judge", error = %e, "Judge execution failed after all retries; using fallback text");
      Evidence::Unavailable { source: EvidenceSource::Execution, message: message.into() }
    }
  }
}

/// Judge0 over HTTP (RapidAPI-hosted or self-hosted).
pub struct HttpJudgeTransport {
  client: reqwest::Client,
  base_url: String,
  api_host: Option<String>,
  api_key: Option<String>,
}

#[derive(Serialize)]
struct SubmissionRequest<'a> {
  source_code: &'a str,
  language_id: u32,
}

#[derive(Deserialize)]
struct SubmissionCreated {
  #[serde(default)] token: Option<String>,
}

impl HttpJudgeTransport {
  /// JUDGE0_BASE_URL wins (self-hosted); otherwise JUDGE0_API_HOST + JUDGE0_API_KEY (RapidAPI).
  pub fn from_env(settings: &JudgeSettings) -> Result<Self, EngineError> {
    let api_host = std::env::var("JUDGE0_API_HOST").ok().filter(|s| !s.is_empty());
    let api_key = std::env::var("JUDGE0_API_KEY").ok().filter(|s| !s.is_empty());
    let base_url = match std::env::var("JUDGE0_BASE_URL").ok().filter(|s| !s.is_empty()) {
      Some(url) => url.trim_end_matches('/').to_string(),
      None => match (&api_host, &api_key) {
        (Some(host), Some(_)) => format!("https://{host}"),
        _ => {
          return Err(EngineError::Configuration(
            "JUDGE0_API_HOST and JUDGE0_API_KEY (or JUDGE0_BASE_URL) must be set".into(),
          ))
        }
      },
    };

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(settings.request_timeout_secs))
      .build()
      .map_err(|e| EngineError::Configuration(format!("cannot build judge HTTP client: {e}")))?;

    Ok(Self { client, base_url, api_host, api_key })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    let req = req.header(USER_AGENT, "critique-backend/0.1");
    match (&self.api_key, &self.api_host) {
      (Some(key), Some(host)) => req.header("X-RapidAPI-Key", key).header("X-RapidAPI-Host", host),
      (Some(key), None) => req.header("X-Auth-Token", key),
      _ => req,
    }
  }
}

#[async_trait]
impl JudgeTransport for HttpJudgeTransport {
  async fn submit(&self, source_b64: &str, language_id: u32) -> Result<String, EngineError> {
    let url = format!("{}/submissions?base64_encoded=true&wait=false", self.base_url);
    let res = self
      .with_auth(self.client.post(&url))
      .header(CONTENT_TYPE, "application/json")
      .json(&SubmissionRequest { source_code: source_b64, language_id })
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      return Err(EngineError::Transport(format!("judge submission HTTP {}: {}", status, trunc_for_log(&body, 200))));
    }

    let created: SubmissionCreated = res.json().await?;
    created
      .token
      .filter(|t| !t.is_empty())
      .ok_or_else(|| EngineError::Transport("judge returned no submission token".into()))
  }

  async fn poll(&self, token: &str) -> Result<SubmissionSnapshot, EngineError> {
    let url = format!("{}/submissions/{}?base64_encoded=true&fields=*", self.base_url, token);
    let res = self.with_auth(self.client.get(&url)).send().await?;
    if !res.status().is_success() {
      return Err(EngineError::Transport(format!("judge poll HTTP {}", res.status())));
    }
    Ok(res.json().await?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;

  fn snapshot(status: u32) -> SubmissionSnapshot {
    SubmissionSnapshot { status_id: Some(status), ..Default::default() }
  }

  struct ScriptedTransport {
    polls: Mutex<VecDeque<Result<SubmissionSnapshot, EngineError>>>,
    poll_count: AtomicU32,
    submitted: Mutex<Vec<String>>,
  }

  impl ScriptedTransport {
    fn new(script: Vec<Result<SubmissionSnapshot, EngineError>>) -> Self {
      Self { polls: Mutex::new(script.into()), poll_count: AtomicU32::new(0), submitted: Mutex::new(vec![]) }
    }
  }

  #[async_trait]
  impl JudgeTransport for ScriptedTransport {
    async fn submit(&self, source_b64: &str, _language_id: u32) -> Result<String, EngineError> {
      self.submitted.lock().unwrap().push(source_b64.to_string());
      Ok("tok-1".into())
    }

    async fn poll(&self, _token: &str) -> Result<SubmissionSnapshot, EngineError> {
      self.poll_count.fetch_add(1, Ordering::SeqCst);
      self.polls.lock().unwrap().pop_front().unwrap_or_else(|| Ok(snapshot(2)))
    }
  }

  fn client(script: Vec<Result<SubmissionSnapshot, EngineError>>) -> JudgeClient<ScriptedTransport> {
    JudgeClient::new(ScriptedTransport::new(script), &JudgeSettings::default())
  }

  #[tokio::test(start_paused = true)]
  async fn terminal_on_third_poll_takes_exactly_three_polls() {
    let done = SubmissionSnapshot {
      status_id: Some(3),
      status: Some(StatusWire { id: 3, description: "Accepted".into() }),
      stdout: Some(STANDARD.encode("hello\n")),
      stderr: None,
      compile_output: None,
    };
    let judge = client(vec![Ok(snapshot(1)), Ok(snapshot(2)), Ok(done)]);
    let started = tokio::time::Instant::now();
    let result = judge.execute("console.log('hello')").await.unwrap();

    assert_eq!(judge.transport.poll_count.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(1500));
    assert_eq!(result.stdout.as_deref(), Some("hello\n"));
    assert_eq!(result.stderr, None);
    assert_eq!(result.status_description, "Accepted");
    assert_eq!(
      judge.transport.submitted.lock().unwrap()[0],
      STANDARD.encode("console.log('hello')")
    );
  }

  #[tokio::test(start_paused = true)]
  async fn stuck_submission_times_out_after_budget() {
    let judge = client(vec![]);
    let err = judge.execute("while(true){}").await.unwrap_err();
    assert!(matches!(err, EngineError::JudgeTimeout { polls: 10 }));
    assert_eq!(judge.transport.poll_count.load(Ordering::SeqCst), 10);
  }

  #[tokio::test(start_paused = true)]
  async fn failed_poll_is_skipped_not_terminal() {
    let judge = client(vec![Err(EngineError::Transport("502".into())), Ok(snapshot(6))]);
    let result = judge.execute("x").await.unwrap();
    assert_eq!(result.status_id, 6);
    assert_eq!(judge.transport.poll_count.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn nested_status_and_wrapped_base64_decode() {
    let snap: SubmissionSnapshot = serde_json::from_str(
      r#"{"status":{"id":11,"description":"Runtime Error (NZEC)"},"stderr":"UmVmZXJlbmNl\nRXJyb3I=\n","stdout":null}"#,
    )
    .unwrap();
    assert!(snap.is_terminal());
    let r = snap.decode().unwrap();
    assert_eq!(r.stderr.as_deref(), Some("ReferenceError"));
    assert_eq!(r.stdout, None);
    assert_eq!(r.status_description, "Runtime Error (NZEC)");
  }

  struct FlakyJudge {
    calls: AtomicU32,
    fail_first: u32,
    timeout: bool,
  }

  #[async_trait]
  impl CodeJudge for FlakyJudge {
    async fn execute(&self, _source: &str) -> Result<ExecutionResult, EngineError> {
      let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
      if n <= self.fail_first {
        if self.timeout {
          return Err(EngineError::JudgeTimeout { polls: 10 });
        }
        return Err(EngineError::Transport(format!("attempt {n}")));
      }
      Ok(ExecutionResult {
        status_id: 3,
        status_description: "Accepted".into(),
        stdout: Some("ok".into()),
        stderr: None,
        compile_output: None,
      })
    }
  }

  #[tokio::test(start_paused = true)]
  async fn retries_transport_failures_then_succeeds() {
    let judge = FlakyJudge { calls: AtomicU32::new(0), fail_first: 2, timeout: false };
    let mut retries = vec![];
    let evidence = execute_with_evidence(&judge, "x", RetryPolicy::default(), |attempt, _| retries.push(attempt)).await;
    assert_eq!(retries, vec![1, 2]);
    assert!(matches!(evidence, Evidence::Execution { ref stdout, .. } if stdout.as_deref() == Some("ok")));
  }

  #[tokio::test(start_paused = true)]
  async fn exhausted_transport_degrades_to_fallback() {
    let judge = FlakyJudge { calls: AtomicU32::new(0), fail_first: 5, timeout: false };
    let evidence = execute_with_evidence(&judge, "x", RetryPolicy::default(), |_, _| {}).await;
    match evidence {
      Evidence::Unavailable { source, message } => {
        assert_eq!(source, EvidenceSource::Execution);
        assert_eq!(message, EXECUTION_FALLBACK);
      }
      other => panic!("unexpected evidence {other:?}"),
    }
    assert_eq!(judge.calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn final_timeout_degrades_to_timeout_text() {
    let judge = FlakyJudge { calls: AtomicU32::new(0), fail_first: 5, timeout: true };
    let mut retries = 0;
    let evidence = execute_with_evidence(&judge, "x", RetryPolicy::default(), |_, _| retries += 1).await;
    match evidence {
      Evidence::Unavailable { source, message } => {
        assert_eq!(source, EvidenceSource::Execution);
        assert_eq!(message, EXECUTION_TIMEOUT_FALLBACK);
      }
      other => panic!("unexpected evidence {other:?}"),
    }
    assert_eq!(retries, 3);
    assert_eq!(judge.calls.load(Ordering::SeqCst), 3);
  }
}

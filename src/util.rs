//! Small utility helpers used across modules.

use std::future::Future;
use std::time::Duration;

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// Single pass: substituted values are never re-scanned, so an answer that
/// happens to contain `{question}` stays literal.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = String::with_capacity(tpl.len());
  let mut rest = tpl;
  while let Some(open) = rest.find('{') {
    out.push_str(&rest[..open]);
    let after = &rest[open + 1..];
    let replaced = after.find('}').and_then(|close| {
      let key = &after[..close];
      pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| (*v, close))
    });
    match replaced {
      Some((value, close)) => {
        out.push_str(value);
        rest = &after[close + 1..];
      }
      None => {
        out.push('{');
        rest = after;
      }
    }
  }
  out.push_str(rest);
  out
}

/// Truncate to at most `max` chars, appending an ellipsis when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
  match s.char_indices().nth(max) {
    Some((idx, _)) => format!("{}…", &s[..idx]),
    None => s.to_string(),
  }
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    format!("{} ({} bytes total)", truncate_chars(s, max), s.len())
  }
}

/// Exponential backoff settings: `attempts` tries, waiting `base_delay * 2^i`
/// after the i-th failure (no wait after the last one).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self { attempts: 3, base_delay: Duration::from_millis(1000) }
  }
}

/// Run `op` until it succeeds or the policy is exhausted.
/// `on_retry(attempt, &err)` is called for every failed attempt (1-based),
/// including the last one, before the error is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
  policy: RetryPolicy,
  mut op: F,
  mut on_retry: impl FnMut(u32, &E),
) -> Result<T, E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  let attempts = policy.attempts.max(1);
  let mut attempt = 0;
  loop {
    attempt += 1;
    match op().await {
      Ok(v) => return Ok(v),
      Err(e) => {
        on_retry(attempt, &e);
        if attempt >= attempts {
          return Err(e);
        }
        let factor = 1u32 << (attempt - 1).min(16);
        tokio::time::sleep(policy.base_delay * factor).await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[test]
  fn fill_template_is_single_pass() {
    let out = fill_template("Q: {question}\nA: {answer}", &[("question", "{answer}"), ("answer", "42")]);
    assert_eq!(out, "Q: {answer}\nA: 42");
  }

  #[test]
  fn fill_template_keeps_unknown_braces() {
    let out = fill_template("{ summary: string } {x}", &[("x", "y")]);
    assert_eq!(out, "{ summary: string } y");
  }

  #[test]
  fn truncate_respects_char_boundaries() {
    assert_eq!(truncate_chars("程式碼執行", 2), "程式…");
    assert_eq!(truncate_chars("abc", 5), "abc");
  }

  #[tokio::test(start_paused = true)]
  async fn retry_succeeds_on_third_attempt_with_doubling_delay() {
    let calls = AtomicU32::new(0);
    let mut seen = Vec::new();
    let start = tokio::time::Instant::now();
    let out: Result<u32, String> = retry_with_backoff(
      RetryPolicy::default(),
      || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move { if n < 3 { Err(format!("boom {n}")) } else { Ok(n) } }
      },
      |attempt, e: &String| seen.push((attempt, e.clone())),
    )
    .await;
    assert_eq!(out, Ok(3));
    assert_eq!(seen, vec![(1, "boom 1".to_string()), (2, "boom 2".to_string())]);
    // 1000ms + 2000ms
    assert_eq!(start.elapsed(), Duration::from_millis(3000));
  }

  #[tokio::test(start_paused = true)]
  async fn retry_reports_final_failure() {
    let mut count = 0;
    let out: Result<(), &str> = retry_with_backoff(
      RetryPolicy { attempts: 2, base_delay: Duration::from_millis(10) },
      || async { Err("down") },
      |_, _| count += 1,
    )
    .await;
    assert_eq!(out, Err("down"));
    assert_eq!(count, 2);
  }
}

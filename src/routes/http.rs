//! HTTP endpoint handlers. These are thin wrappers that forward to the engine.
//! Each handler is instrumented; logs carry ids and sizes, never answer contents.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{
    sse::{Event, KeepAlive, Sse},
    IntoResponse, Response,
  },
  Json,
};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, instrument, warn};

use crate::engine::EvaluationRequest;
use crate::error::EngineError;
use crate::protocol::*;
use crate::state::AppState;
use crate::stream::{CancelToken, StreamEvent};

/// Request-level failure mapped onto an HTTP status.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
  fn from(e: EngineError) -> Self {
    ApiError(e)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self.0 {
      EngineError::QuestionNotFound(_) => StatusCode::NOT_FOUND,
      EngineError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
      _ => StatusCode::BAD_GATEWAY,
    };
    if self.0.is_user_visible() {
      warn!(target: "critique_backend", status = %status, error = %self.0, "Request failed");
    } else {
      error!(target: "critique_backend", status = %status, error = %self.0, "Unexpected request failure");
    }
    (status, Json(ErrorOut { error: self.0.to_string() })).into_response()
  }
}

/// Cancels the evaluation when the SSE body is dropped (client went away).
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
  fn drop(&mut self) {
    self.0.cancel();
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
  Json(HealthOut { ok: true })
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_question(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<QuestionOut>, ApiError> {
  let question = state.engine.question(&id).ok_or_else(|| EngineError::QuestionNotFound(id.clone()))?;
  info!(target: "critique_backend", id = %question.id, modality = question.modality.as_str(), "HTTP question served");
  Ok(Json(to_out(&question)))
}

#[instrument(level = "info", skip(state, body), fields(question_id = %body.question_id, answer_len = body.answer.len(), is_follow_up = body.is_follow_up))]
pub async fn http_post_evaluate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<EvaluationRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
  let prepared = state.engine.prepare(&body).await?;

  let (tx, rx) = mpsc::channel(64);
  let cancel = CancelToken::new();
  tokio::spawn(prepared.run(tx, cancel.clone()));

  let guard = CancelOnDrop(cancel);
  let events = ReceiverStream::new(rx).map(move |ev| {
    let _ = &guard;
    Ok(to_sse_event(ev))
  });
  Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// `fragment` and `done` carry JSON so multi-line text survives SSE framing.
fn to_sse_event(ev: StreamEvent) -> Event {
  let built = match &ev {
    StreamEvent::Fragment(text) => Event::default().event("fragment").json_data(serde_json::json!({ "text": text })),
    StreamEvent::Done(evaluation) => Event::default().event("done").json_data(evaluation),
    StreamEvent::Cancelled { message } => {
      Event::default().event("cancelled").json_data(serde_json::json!({ "message": message }))
    }
    StreamEvent::Error { message, partial } => {
      Event::default().event("error").json_data(StreamErrorOut { message: message.clone(), partial: partial.clone() })
    }
  };
  built.unwrap_or_else(|e| Event::default().event("error").data(format!("Serialization error: {}", e)))
}

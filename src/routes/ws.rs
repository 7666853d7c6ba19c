//! WebSocket upgrade + message loop. Client messages start or cancel an evaluation;
//! engine events are forwarded as they arrive. At most one evaluation runs per socket.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::engine::EvaluationRequest;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;
use crate::stream::{CancelToken, StreamEvent};

#[instrument(level = "info", skip(state, ws))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "critique_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "critique_backend", "WebSocket connected");
  let (events_tx, mut events_rx) = mpsc::channel::<(u64, StreamEvent)>(64);
  let mut session = Session::default();

  loop {
    tokio::select! {
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Text(txt))) => {
          let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
            Ok(ClientWsMessage::Ping) => Some(ServerWsMessage::Pong),
            Ok(ClientWsMessage::Evaluate { request }) => {
              session.start(state.clone(), request, events_tx.clone());
              None
            }
            Ok(ClientWsMessage::Cancel) => {
              session.cancel();
              None
            }
            Err(e) => Some(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e), partial: None }),
          };
          if let Some(msg) = reply {
            if !send_json(&mut socket, &msg).await {
              break;
            }
          }
        }
        Some(Ok(Message::Ping(payload))) => { let _ = socket.send(Message::Pong(payload)).await; }
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
        Some(Ok(_)) => {}
      },
      Some((id, ev)) = events_rx.recv() => {
        session.settle(id, &ev);
        if !send_json(&mut socket, &ServerWsMessage::from(ev)).await {
          break;
        }
      }
    }
  }

  session.cancel();
  info!(target: "critique_backend", "WebSocket disconnected");
}

/// Per-socket bookkeeping: the evaluation in flight, if any.
#[derive(Default)]
struct Session {
  active: Option<(u64, CancelToken)>,
  next_id: u64,
}

impl Session {
  /// A new evaluation supersedes (and cancels) the one in flight.
  fn start(&mut self, state: Arc<AppState>, request: EvaluationRequest, out: mpsc::Sender<(u64, StreamEvent)>) -> u64 {
    if let Some((previous_id, previous)) = self.active.take() {
      debug!(target: "critique_backend", previous_id, "Superseding evaluation in flight");
      previous.cancel();
    }
    self.next_id += 1;
    let id = self.next_id;
    self.active = Some((id, spawn_evaluation(state, id, request, out)));
    id
  }

  fn cancel(&mut self) {
    match self.active.take() {
      Some((_, token)) => token.cancel(),
      None => debug!(target: "critique_backend", "Cancel with no evaluation in flight"),
    }
  }

  /// Terminal events only clear the slot when they belong to the current evaluation.
  fn settle(&mut self, id: u64, ev: &StreamEvent) {
    let terminal = matches!(ev, StreamEvent::Done(_) | StreamEvent::Cancelled { .. } | StreamEvent::Error { .. });
    if terminal && self.active_id() == Some(id) {
      self.active = None;
    }
  }

  fn active_id(&self) -> Option<u64> {
    self.active.as_ref().map(|(id, _)| *id)
  }
}

/// Runs one evaluation, tagging its events with `id`. Prepare errors are
/// reported on the same channel as stream events.
fn spawn_evaluation(
  state: Arc<AppState>,
  id: u64,
  request: EvaluationRequest,
  out: mpsc::Sender<(u64, StreamEvent)>,
) -> CancelToken {
  let cancel = CancelToken::new();
  let token = cancel.clone();
  tokio::spawn(async move {
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
    let forward = async {
      while let Some(ev) = rx.recv().await {
        if out.send((id, ev)).await.is_err() {
          break;
        }
      }
    };
    let run = async {
      let result = state.engine.evaluate(&request, tx.clone(), cancel).await;
      if let Err(e) = result {
        let _ = tx.send(StreamEvent::Error { message: e.to_string(), partial: None }).await;
      }
      drop(tx);
    };
    tokio::join!(run, forward);
  });
  token
}

async fn send_json(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  if let Err(e) = socket.send(Message::Text(out)).await {
    error!(target: "critique_backend", error = %e, "WS send error");
    return false;
  }
  true
}

#[cfg(test)]
mod tests {
  use async_trait::async_trait;
  use futures::{stream, StreamExt};

  use super::*;
  use crate::config::EngineConfig;
  use crate::error::EngineError;
  use crate::model::{FragmentStream, GenerativeModel};
  use crate::persistence::MemoryRecordStore;
  use crate::retrieval::VectorSearch;
  use crate::state::Collaborators;

  /// Streams one opening fragment, then either finishes or stalls forever.
  struct OneShotModel {
    stall: bool,
  }

  #[async_trait]
  impl GenerativeModel for OneShotModel {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EngineError> {
      Ok(vec![0.0; 4])
    }
    async fn generate_stream(&self, _prompt: &str) -> Result<FragmentStream, EngineError> {
      let head = stream::iter(vec![Ok(r#"{"summary":"ok","#.to_string())]);
      if self.stall {
        return Ok(head.chain(stream::pending()).boxed());
      }
      Ok(head.chain(stream::iter(vec![Ok(r#""score":4}"#.to_string())])).boxed())
    }
  }

  struct NoPassages;

  #[async_trait]
  impl VectorSearch for NoPassages {
    async fn search(&self, _e: &[f32], _s: &str, _t: f32, _l: u32) -> Result<Vec<String>, EngineError> {
      Ok(vec![])
    }
  }

  fn state(stall: bool) -> Arc<AppState> {
    Arc::new(AppState::new(
      EngineConfig::default(),
      Collaborators {
        model: Some(Arc::new(OneShotModel { stall })),
        search: Some(Arc::new(NoPassages)),
        judge: None,
        store: Arc::new(MemoryRecordStore::default()),
      },
    ))
  }

  fn request(question_id: &str) -> EvaluationRequest {
    serde_json::from_value(serde_json::json!({ "questionId": question_id, "answer": "a closure keeps scope" })).unwrap()
  }

  async fn drain_until_terminal(rx: &mut mpsc::Receiver<(u64, StreamEvent)>, id: u64) -> Vec<StreamEvent> {
    let mut events = vec![];
    while let Some((tag, ev)) = rx.recv().await {
      if tag != id {
        continue;
      }
      let terminal = matches!(ev, StreamEvent::Done(_) | StreamEvent::Cancelled { .. } | StreamEvent::Error { .. });
      events.push(ev);
      if terminal {
        break;
      }
    }
    events
  }

  #[tokio::test]
  async fn evaluation_events_are_tagged_and_end_with_done() {
    let (tx, mut rx) = mpsc::channel(64);
    spawn_evaluation(state(false), 7, request("js-closures"), tx);
    let mut tags = vec![];
    let mut last = None;
    while let Some((tag, ev)) = rx.recv().await {
      tags.push(tag);
      last = Some(ev);
    }
    assert!(tags.len() >= 3, "{tags:?}");
    assert!(tags.iter().all(|t| *t == 7));
    assert!(matches!(last, Some(StreamEvent::Done(ref e)) if e.summary == "ok"));
  }

  #[tokio::test]
  async fn prepare_errors_arrive_as_tagged_error_events() {
    let (tx, mut rx) = mpsc::channel(64);
    spawn_evaluation(state(false), 3, request("missing-question"), tx);
    let (tag, ev) = rx.recv().await.unwrap();
    assert_eq!(tag, 3);
    assert!(matches!(ev, StreamEvent::Error { ref message, partial: None } if message.contains("missing-question")));
  }

  #[tokio::test]
  async fn new_evaluation_supersedes_the_one_in_flight() {
    let (tx, mut rx) = mpsc::channel(64);
    let mut session = Session::default();

    let first = session.start(state(true), request("js-closures"), tx.clone());
    let (tag, ev) = rx.recv().await.unwrap();
    assert_eq!(tag, first);
    assert!(matches!(ev, StreamEvent::Fragment(_)));

    let second = session.start(state(false), request("js-closures"), tx);
    assert_ne!(first, second);

    let mut finished: Vec<(u64, StreamEvent)> = vec![];
    while finished.len() < 2 {
      let (tag, ev) = rx.recv().await.unwrap();
      session.settle(tag, &ev);
      if tag == first && finished.is_empty() {
        // the superseded run ending must not clear the current one
        assert_eq!(session.active_id(), Some(second));
      }
      if matches!(ev, StreamEvent::Done(_) | StreamEvent::Cancelled { .. } | StreamEvent::Error { .. }) {
        finished.push((tag, ev));
      }
    }
    let outcome = |id: u64| finished.iter().find(|(tag, _)| *tag == id).map(|(_, ev)| ev.clone());
    assert!(matches!(outcome(first), Some(StreamEvent::Cancelled { .. })), "{finished:?}");
    assert!(matches!(outcome(second), Some(StreamEvent::Done(_))), "{finished:?}");
    assert_eq!(session.active_id(), None);
  }

  #[tokio::test]
  async fn cancel_stops_a_stalled_evaluation() {
    let (tx, mut rx) = mpsc::channel(64);
    let mut session = Session::default();
    let id = session.start(state(true), request("js-closures"), tx);
    let (_, first) = rx.recv().await.unwrap();
    assert!(matches!(first, StreamEvent::Fragment(_)));

    session.cancel();
    assert_eq!(session.active_id(), None);
    let events = drain_until_terminal(&mut rx, id).await;
    assert!(matches!(events.last(), Some(StreamEvent::Cancelled { .. })), "{events:?}");
  }
}

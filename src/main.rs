//! Critique Backend · Grounded Evaluation Engine
//!
//! - Axum HTTP (SSE) + WebSocket API around the evaluation engine
//! - Evidence from vector retrieval, a remote code judge, or an in-process component harness
//! - Optional Supabase persistence of practice records
//!
//! Important env variables:
//!   PORT                   : u16 (default 3000)
//!   OPENAI_API_KEY         : enables the generative model (required to evaluate)
//!   OPENAI_BASE_URL        : default "https://api.openai.com/v1"
//!   OPENAI_MODEL           : default "gpt-4o-mini"
//!   OPENAI_EMBEDDING_MODEL : default "text-embedding-3-small"
//!   JUDGE0_API_HOST        : RapidAPI host for Judge0
//!   JUDGE0_API_KEY         : RapidAPI key (or self-hosted auth token)
//!   JUDGE0_BASE_URL        : self-hosted Judge0 base URL (wins over the host)
//!   SUPABASE_URL           : retrieval RPC + practice_records table
//!   SUPABASE_SERVICE_KEY   : service key for the above
//!   ENGINE_CONFIG_PATH     : path to TOML config (prompts, tunables, question bank)
//!   LOG_LEVEL              : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT             : "pretty" (default) or "json"

mod config;
mod context;
mod domain;
mod engine;
mod error;
mod evidence;
mod harness;
mod judge;
mod model;
mod persistence;
mod protocol;
mod retrieval;
mod routes;
mod seeds;
mod state;
mod stream;
mod telemetry;
mod util;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Collaborators, prompts and the question bank are built once and shared.
  let state = Arc::new(AppState::from_env());
  info!(target: "critique_backend", questions = state.engine.question_count(), "Engine ready");

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "critique_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}

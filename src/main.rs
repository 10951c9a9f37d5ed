//! QuizForge · quality-controlled quiz generation backend
//!
//! - Axum HTTP API (`POST /api/v1/quiz`)
//! - Generate → review → validate pipeline with bounded regeneration per topic
//! - OpenAI-compatible model transport (via environment variables)
//!
//! Important env variables:
//!   PORT                   : u16 (default 3000)
//!   OPENAI_API_KEY         : enables quiz generation if present
//!   OPENAI_BASE_URL        : default "https://api.openai.com/v1"
//!   OPENAI_MODEL           : default "gpt-4o"
//!   OPENAI_MAX_TOKENS      : optional completion cap per model call
//!   QUIZ_CONFIG_PATH       : path to TOML config ([prompts], [pipeline], [defaults])
//!   QUIZ_OUTPUT_DIR        : where `save_as` documents go (default "output")
//!   GENERATION_TEMPERATURE, REVIEW_TEMPERATURE, VALIDATION_TEMPERATURE,
//!   QUALITY_THRESHOLD, MAX_REGENERATIONS, MODEL_PARALLELISM, MODEL_TIMEOUT_SECS,
//!   QUESTIONS_PER_TOPIC, PLAN_QUIZ (default true)
//!   LOG_LEVEL              : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT             : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod model;
mod parse;
mod stages;
mod controller;
mod assembler;
mod render;
mod state;
mod protocol;
mod logic;
mod openai;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: prompts, pipeline settings, model gate.
  let state = Arc::new(AppState::new());

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "quizforge", %addr, model_enabled = state.model_enabled(), "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!(target: "quizforge", "Shutdown signal received");
    })
    .await?;
  Ok(())
}

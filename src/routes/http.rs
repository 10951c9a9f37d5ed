//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented; failures map to a status code plus an `ErrorOut` body.

use std::sync::Arc;
use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use tracing::{error, info, instrument, warn};

use crate::assembler::AssemblyError;
use crate::logic::{run_quiz, RunError};
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, model_enabled: state.model_enabled() })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(SettingsOut {
    model: state.model_name(),
    pipeline: state.pipeline.clone(),
    defaults: state.defaults.clone(),
  })
}

#[instrument(level = "info", skip(state, body), fields(topics = body.topics.len()))]
pub async fn http_post_quiz(
  State(state): State<Arc<AppState>>,
  Json(body): Json<QuizIn>,
) -> Response {
  match run_quiz(&state, body).await {
    Ok(out) => {
      info!(target: "quizforge", run_id = %out.run_id, questions = out.quiz.total_questions(), "HTTP quiz served");
      Json(out).into_response()
    }
    Err(e) => error_response(e),
  }
}

fn error_response(err: RunError) -> Response {
  let (status, reports) = match &err {
    RunError::Configuration(_) => (StatusCode::BAD_REQUEST, None),
    RunError::ModelUnavailable => (StatusCode::SERVICE_UNAVAILABLE, None),
    RunError::Exhausted(run) => (StatusCode::UNPROCESSABLE_ENTITY, Some(run.reports.clone())),
    RunError::Assembly(AssemblyError::DuplicateAcrossRounds { .. }) => (StatusCode::UNPROCESSABLE_ENTITY, None),
    RunError::Assembly(_) | RunError::Save(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
  };
  if status.is_server_error() {
    error!(target: "quizforge", %status, error = %err, "Quiz request failed");
  } else {
    warn!(target: "quizforge", %status, error = %err, "Quiz request rejected");
  }
  (status, Json(ErrorOut { error: err.to_string(), reports })).into_response()
}

//! Core behavior behind the HTTP handlers: one quiz run end to end.
//!
//! request -> validate -> controller (all topics) -> plan -> assemble -> render -> optional save.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::assembler::{assemble, AssemblyError, QuizOverrides};
use crate::config::RequestDefaults;
use crate::controller::ExhaustedRun;
use crate::domain::{ConfigurationError, GenerationRequest, OutputMode};
use crate::protocol::{QuizIn, QuizOut};
use crate::render::{render_markdown, RenderedDocument};
use crate::state::AppState;
use crate::util::sanitize_file_stem;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
  #[error(transparent)]
  Configuration(#[from] ConfigurationError),

  #[error("no language model configured (set OPENAI_API_KEY)")]
  ModelUnavailable,

  #[error(transparent)]
  Exhausted(#[from] ExhaustedRun),

  #[error("quiz assembly failed: {0}")]
  Assembly(#[from] AssemblyError),

  #[error("saving rendered quiz failed: {0}")]
  Save(#[from] std::io::Error),
}

/// Merge the request with configured defaults and validate it.
pub fn build_request(defaults: &RequestDefaults, body: &QuizIn) -> Result<GenerationRequest, ConfigurationError> {
  GenerationRequest::new(
    body.topics.clone(),
    body.questions_per_topic.unwrap_or(defaults.questions_per_topic),
    body.difficulty.unwrap_or(defaults.difficulty),
    body.quality_threshold.unwrap_or(defaults.quality_threshold),
    body.max_regenerations.unwrap_or(defaults.max_regenerations),
  )
}

#[instrument(level = "info", skip(state, body), fields(topics = body.topics.len(), save = body.save_as.is_some()))]
pub async fn run_quiz(state: &AppState, body: QuizIn) -> Result<QuizOut, RunError> {
  let request = build_request(&state.defaults, &body)?;
  let controller = state.controller().ok_or(RunError::ModelUnavailable)?;

  let run_id = Uuid::new_v4().to_string();
  info!(
    target: "quizforge",
    %run_id,
    topics = ?request.topics(),
    questions_per_topic = request.questions_per_topic(),
    difficulty = %request.difficulty(),
    quality_threshold = request.quality_threshold(),
    max_regenerations = request.max_regenerations(),
    "Quiz run started"
  );

  let request = Arc::new(request);
  let outcome = controller.run(request.clone()).await;
  for report in outcome.reports() {
    debug!(target: "quizforge", %run_id, summary = %report.format_summary(), "Topic report");
  }
  let (per_topic, reports) = match outcome.into_accepted() {
    Ok(ok) => ok,
    Err(exhausted) => {
      for f in &exhausted.failures {
        error!(target: "quizforge", %run_id, topic = %f.topic, attempts = f.attempts, deficit = f.deficit, "Quiz run failed");
      }
      return Err(exhausted.into());
    }
  };

  let requested = QuizOverrides { title: body.title.clone(), description: body.description.clone(), ..Default::default() };
  let overrides = match state.planner() {
    Some(planner) => planner.plan_or_fallback(&request, &requested).await,
    None => requested,
  };
  let quiz = assemble(&request, &per_topic, &overrides)?;
  let mode = body.output_mode.unwrap_or_default();
  let documents = render_markdown(&quiz, mode);

  let saved_files = match body.save_as.as_deref() {
    Some(raw) => {
      let stem = sanitize_file_stem(raw);
      save_documents(&state.output_dir, &stem, &run_id[..8], &documents).await?
    }
    None => Vec::new(),
  };

  info!(
    target: "quizforge",
    %run_id,
    rounds = quiz.total_rounds(),
    questions = quiz.total_questions(),
    average_quality = quiz.average_quality().unwrap_or_default(),
    saved = saved_files.len(),
    "Quiz run complete"
  );

  let (sheet, answer_key) = match mode {
    OutputMode::Separate => (Some(quiz.questions_only()), Some(quiz.answer_key())),
    OutputMode::Combined => (None, None),
  };
  Ok(QuizOut { run_id, quiz, sheet, answer_key, documents, reports, saved_files })
}

/// Write every document into `dir`, creating it if needed. Returns the written paths.
#[instrument(level = "info", skip(docs), fields(dir = %dir.display(), count = docs.len()))]
pub async fn save_documents(dir: &Path, stem: &str, run_prefix: &str, docs: &[RenderedDocument]) -> std::io::Result<Vec<String>> {
  tokio::fs::create_dir_all(dir).await?;
  let mut written = Vec::with_capacity(docs.len());
  for doc in docs {
    let path = dir.join(doc.file_name(stem, run_prefix));
    tokio::fs::write(&path, &doc.content).await?;
    info!(target: "quizforge", path = %path.display(), bytes = doc.content.len(), "Saved quiz document");
    written.push(path.display().to_string());
  }
  Ok(written)
}

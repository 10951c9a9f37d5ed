//! The model-facing stages and the gate every model call goes through.
//!
//! Generator, reviewer and validator each make exactly one model call per invocation,
//! batched over all candidates of an attempt. The planner makes one call per quiz.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::domain::Candidate;
use crate::model::{ModelClient, ModelError, ModelPrompt};

pub mod generator;
pub mod planner;
pub mod reviewer;
pub mod validator;

pub use generator::{GenerationError, QuestionGenerator};
pub use planner::QuizPlanner;
pub use reviewer::{QuestionReviewer, ReviewError};
pub use validator::{QuestionValidator, ValidationError};

/// Shared access to the model: the rate-limit semaphore plus a per-call timeout.
/// This is the only state shared between topic tasks.
#[derive(Clone)]
pub struct ModelGate {
  model: Arc<dyn ModelClient>,
  limiter: Arc<Semaphore>,
  timeout: Duration,
}

impl ModelGate {
  pub fn new(model: Arc<dyn ModelClient>, parallelism: usize, timeout: Duration) -> Self {
    Self { model, limiter: Arc::new(Semaphore::new(parallelism.max(1))), timeout }
  }

  pub fn model_name(&self) -> &str { self.model.name() }

  /// One bounded model call. A timeout is reported like any other model failure.
  pub async fn call(&self, prompt: &ModelPrompt, temperature: f32) -> Result<String, ModelError> {
    let _permit = self.limiter.acquire().await.map_err(|_| ModelError::LimiterClosed)?;
    debug!(target: "pipeline", model = %self.model.name(), temperature, available = self.limiter.available_permits(), "Model call");
    match tokio::time::timeout(self.timeout, self.model.complete(prompt, temperature)).await {
      Ok(res) => res,
      Err(_) => Err(ModelError::Timeout(self.timeout)),
    }
  }
}

/// Stage failure that consumes one attempt.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
  #[error("generation failed: {0}")]
  Generation(#[from] GenerationError),

  #[error("review failed: {0}")]
  Review(#[from] ReviewError),

  #[error("validation failed: {0}")]
  Validation(#[from] ValidationError),
}

impl StageError {
  pub fn stage(&self) -> &'static str {
    match self {
      StageError::Generation(_) => "generate",
      StageError::Review(_) => "review",
      StageError::Validation(_) => "validate",
    }
  }
}

/// Render candidates as the numbered block reviewer and validator prompts embed.
pub fn format_candidates(candidates: &[Candidate]) -> String {
  let mut out = String::new();
  for (i, c) in candidates.iter().enumerate() {
    out.push_str(&format!("Question {}:\n", i));
    out.push_str(&format!("Topic: {}\n", c.topic));
    out.push_str(&format!("Difficulty: {}\n", c.difficulty));
    out.push_str(&format!("Question: {}\n", c.question_text));
    if !c.options.is_empty() {
      out.push_str("Options:\n");
      for (j, o) in c.options.iter().enumerate() {
        out.push_str(&format!("  {}: {}\n", crate::util::option_label(j), o));
      }
    }
    out.push_str(&format!("Marked correct answer: {}\n", c.correct_answer));
    let explanation = if c.explanation.is_empty() { "Not provided" } else { c.explanation.as_str() };
    out.push_str(&format!("Explanation: {}\n---\n", explanation));
  }
  out
}

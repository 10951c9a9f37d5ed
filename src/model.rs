//! The language-model capability the pipeline depends on.
//!
//! Stages only see `ModelClient`; the OpenAI transport lives in `openai.rs` and tests
//! plug in `testing::ScriptedModel`.

use std::time::Duration;

use async_trait::async_trait;

/// System + user message pair sent to the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelPrompt {
  pub system: String,
  pub user: String,
}

impl ModelPrompt {
  pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
    Self { system: system.into(), user: user.into() }
  }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
  #[error("transport error: {0}")]
  Transport(String),

  #[error("model HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("rate limited: {0}")]
  RateLimited(String),

  #[error("timed out after {0:?}")]
  Timeout(Duration),

  #[error("rate limiter closed")]
  LimiterClosed,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
  /// Human readable model identifier, for logs.
  fn name(&self) -> &str;

  async fn complete(&self, prompt: &ModelPrompt, temperature: f32) -> Result<String, ModelError>;
}

//! Minimal OpenAI-compatible client implementing `ModelClient`.
//!
//! We only call chat.completions and always request a strict JSON object; turning that
//! JSON into stage outputs is `parse.rs`'s job.
//! Calls are instrumented and log model name, latency and token usage (not contents).
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::model::{ModelClient, ModelError, ModelPrompt};

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  /// Completion cap from OPENAI_MAX_TOKENS; omitted from requests when unset.
  pub max_tokens: Option<u32>,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  /// `timeout` is a transport-level ceiling; the pipeline applies its own per-call timeout.
  pub fn from_env(timeout: Duration) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".into());
    let max_tokens = parse_max_tokens(std::env::var("OPENAI_MAX_TOKENS").ok().as_deref());

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string(), model, max_tokens })
  }

  fn build_request(&self, system: &str, user: &str, temperature: f32) -> ChatCompletionRequest {
    ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: self.max_tokens,
    }
  }

  /// JSON-object chat completion. Returns the raw message content.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model, system_len = system.len(), user_len = user.len()))]
  async fn chat_json(&self, system: &str, user: &str, temperature: f32) -> Result<String, ModelError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = self.build_request(system, user, temperature);

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "quizforge-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| {
        error!(elapsed = ?start.elapsed(), error = %e, "Model request failed");
        ModelError::Transport(e.to_string())
      })?;

    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      error!(elapsed = ?start.elapsed(), %status, "Model returned an error status");
      return Err(status_error(status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| ModelError::Transport(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();
    info!(elapsed = ?start.elapsed(), response_len = text.len(), "Model response received");
    Ok(text)
  }
}

#[async_trait]
impl ModelClient for OpenAI {
  fn name(&self) -> &str { &self.model }

  async fn complete(&self, prompt: &ModelPrompt, temperature: f32) -> Result<String, ModelError> {
    self.chat_json(&prompt.system, &prompt.user, temperature).await
  }
}

/// Positive integer or nothing; anything else is logged and ignored.
fn parse_max_tokens(raw: Option<&str>) -> Option<u32> {
  let raw = raw?.trim();
  match raw.parse::<u32>() {
    Ok(n) if n > 0 => Some(n),
    _ => {
      warn!(target: "quizforge", value = %raw, "Ignoring invalid OPENAI_MAX_TOKENS");
      None
    }
  }
}

fn status_error(status: StatusCode, message: String) -> ModelError {
  if status == StatusCode::TOO_MANY_REQUESTS {
    ModelError::RateLimited(message)
  } else {
    ModelError::Http { status: status.as_u16(), message }
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}

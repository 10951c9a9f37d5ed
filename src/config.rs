//! Loading agent configuration (prompts + pipeline settings + request defaults) from TOML,
//! with environment overrides for the tunables.
//!
//! See `AgentConfig`, `Prompts` and `PipelineConfig` for the expected schema.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::domain::Difficulty;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub pipeline: PipelineConfig,
  #[serde(default)]
  pub defaults: RequestDefaults,
}

/// Immutable per-process pipeline settings threaded into every stage.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
  /// "Creative" temperature for question generation.
  pub generation_temperature: f32,
  /// "Analytical" temperature for review.
  pub review_temperature: f32,
  /// "Deterministic" temperature for validation.
  pub validation_temperature: f32,
  /// Max concurrent model calls across all topic tasks.
  pub parallelism: usize,
  /// Per model call timeout.
  pub call_timeout_secs: u64,
  /// Ask the model for a quiz title, description and round names before assembly.
  pub plan_quiz: bool,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      generation_temperature: 0.8,
      review_temperature: 0.3,
      validation_temperature: 0.1,
      parallelism: 4,
      call_timeout_secs: 60,
      plan_quiz: true,
    }
  }
}

impl PipelineConfig {
  pub fn call_timeout(&self) -> Duration { Duration::from_secs(self.call_timeout_secs) }

  /// Clamp temperatures to [0,1] and keep parallelism/timeout positive.
  pub fn sanitized(mut self) -> Self {
    self.generation_temperature = clamp_temperature(self.generation_temperature, 0.8);
    self.review_temperature = clamp_temperature(self.review_temperature, 0.3);
    self.validation_temperature = clamp_temperature(self.validation_temperature, 0.1);
    self.parallelism = self.parallelism.max(1);
    self.call_timeout_secs = self.call_timeout_secs.max(1);
    self
  }
}

fn clamp_temperature(t: f32, fallback: f32) -> f32 {
  if t.is_finite() { t.clamp(0.0, 1.0) } else { fallback }
}

/// Values used when a quiz request leaves a field out.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RequestDefaults {
  pub questions_per_topic: u32,
  pub difficulty: Difficulty,
  pub quality_threshold: f32,
  pub max_regenerations: u32,
}

impl Default for RequestDefaults {
  fn default() -> Self {
    Self {
      questions_per_topic: 10,
      difficulty: Difficulty::Medium,
      quality_threshold: 0.7,
      max_regenerations: 3,
    }
  }
}

/// Prompts used by the model-facing stages.
/// You can override them in TOML if you need to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub generator_system: String,
  /// Keys: {count} {topic} {difficulty} {difficulty_guidance} {exclusions} {feedback}
  pub generator_user_template: String,
  pub reviewer_system: String,
  /// Keys: {questions}
  pub reviewer_user_template: String,
  pub validator_system: String,
  /// Keys: {questions}
  pub validator_user_template: String,
  pub planner_system: String,
  /// Keys: {topics} {questions_per_topic} {difficulty} {custom}
  pub planner_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      generator_system: "You are an expert quiz question writer. Create high-quality, engaging multiple-choice questions.\n\
Requirements:\n\
- Each question must have exactly 4 options (A, B, C, D) and only ONE correct option.\n\
- Incorrect options must be plausible but clearly wrong.\n\
- Questions must be clear, unambiguous, neither trivial nor overly obscure.\n\
- Match the requested difficulty level.\n\
Respond ONLY with strict JSON.".into(),
      generator_user_template: "Generate {count} multiple-choice questions on the topic: {topic}\n\
Difficulty: {difficulty} ({difficulty_guidance})\n\
{exclusions}{feedback}\
Return JSON {\"questions\": [{\"question_text\": string, \"options\": {\"A\": string, \"B\": string, \"C\": string, \"D\": string}, \"correct_answer\": \"A\"|\"B\"|\"C\"|\"D\", \"explanation\": string}]} with exactly {count} questions.".into(),
      reviewer_system: "You are an expert quiz quality reviewer. For each question assess clarity, answer correctness, \
distractor quality, difficulty match and engagement. List concrete issues and recommend an action. Respond ONLY with strict JSON.".into(),
      reviewer_user_template: "Review these quiz questions:\n\n{questions}\n\n\
Return JSON {\"reviews\": [{\"question_index\": number, \"clarity_score\": number, \"correctness_score\": number, \"distractor_score\": number, \
\"difficulty_score\": number, \"engagement_score\": number, \"overall_score\": number, \"issues\": [string], \
\"recommended_action\": \"accept\"|\"revise\"|\"reject\", \"feedback\": string}]} with scores between 0 and 1, \
with one entry per question, in order.".into(),
      validator_system: "You are an expert fact-checker and quiz validator. Verify that the marked answer is correct, that every other option is wrong, \
that the question is unambiguous and that the explanation supports the answer. Respond ONLY with strict JSON.".into(),
      validator_user_template: "Validate these quiz questions:\n\n{questions}\n\n\
Return JSON {\"validations\": [{\"question_index\": number, \"quality_score\": number between 0 and 1, \"factual_issues\": [string]}]} \
with one entry per question, in order.".into(),
      planner_system: "You are a quiz planning expert. Give the quiz an engaging title and a brief description, \
and give each round (one per topic) an engaging, descriptive name. Keep the user's custom title or description if one is given. \
Respond ONLY with strict JSON.".into(),
      planner_user_template: "Plan a quiz with these requirements:\n\
Topics: {topics}\n\
Questions per round: {questions_per_topic}\n\
Difficulty: {difficulty}\n\
{custom}\
Return JSON {\"title\": string, \"description\": string, \"rounds\": [{\"topic\": string, \"round_name\": string}]} \
with one round per topic, in the order given.".into(),
    }
  }
}

/// Attempt to load `AgentConfig` from QUIZ_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("QUIZ_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AgentConfig>(&s) {
      Ok(cfg) => {
        info!(target: "quizforge", %path, "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quizforge", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quizforge", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

impl AgentConfig {
  /// Apply env-style overrides. `get` is `std::env::var` in production.
  pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
    let p = &mut self.pipeline;
    override_with(&get, &["GENERATION_TEMPERATURE", "DEFAULT_TEMPERATURE"], &mut p.generation_temperature);
    override_with(&get, &["REVIEW_TEMPERATURE"], &mut p.review_temperature);
    override_with(&get, &["VALIDATION_TEMPERATURE"], &mut p.validation_temperature);
    override_with(&get, &["MODEL_PARALLELISM"], &mut p.parallelism);
    override_with(&get, &["MODEL_TIMEOUT_SECS"], &mut p.call_timeout_secs);
    override_with(&get, &["PLAN_QUIZ"], &mut p.plan_quiz);

    let d = &mut self.defaults;
    override_with(&get, &["QUALITY_THRESHOLD"], &mut d.quality_threshold);
    override_with(&get, &["MAX_REGENERATIONS"], &mut d.max_regenerations);
    override_with(&get, &["QUESTIONS_PER_TOPIC"], &mut d.questions_per_topic);

    self.pipeline = self.pipeline.clone().sanitized();
  }
}

/// First present key wins; unparsable values are logged and ignored.
fn override_with<T: FromStr>(get: &impl Fn(&str) -> Option<String>, keys: &[&str], slot: &mut T) {
  for key in keys {
    if let Some(raw) = get(key) {
      match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => warn!(target: "quizforge", key = %key, value = %raw, "Ignoring unparsable setting"),
      }
      return;
    }
  }
}

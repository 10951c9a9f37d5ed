//! QuizPlanner: one optional call that names the quiz and its rounds.
//!
//! Presentation only. It never touches questions, and a failed or empty plan leaves the
//! assembler defaults in place. Caller-supplied title/description always win.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::assembler::QuizOverrides;
use crate::config::Prompts;
use crate::domain::GenerationRequest;
use crate::model::{ModelError, ModelPrompt};
use crate::parse::{parse_plan, ParseError, ParsedPlan, PlannedRound};
use crate::stages::ModelGate;
use crate::util::fill_template;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
  #[error("model call failed: {0}")]
  Model(#[from] ModelError),

  #[error("unparsable plan: {0}")]
  Parse(#[from] ParseError),
}

#[derive(Clone)]
pub struct QuizPlanner {
  gate: ModelGate,
  prompts: Arc<Prompts>,
  temperature: f32,
}

impl QuizPlanner {
  pub fn new(gate: ModelGate, prompts: Arc<Prompts>, temperature: f32) -> Self {
    Self { gate, prompts, temperature }
  }

  pub fn build_prompt(&self, request: &GenerationRequest, requested: &QuizOverrides) -> ModelPrompt {
    let mut custom = String::new();
    if let Some(title) = non_blank(&requested.title) {
      custom.push_str(&format!("Custom title: {}\n", title));
    }
    if let Some(description) = non_blank(&requested.description) {
      custom.push_str(&format!("Custom description: {}\n", description));
    }
    let user = fill_template(
      &self.prompts.planner_user_template,
      &[
        ("topics", &request.topics().join(", ")),
        ("questions_per_topic", &request.questions_per_topic().to_string()),
        ("difficulty", request.difficulty().as_str()),
        ("custom", &custom),
      ],
    );
    ModelPrompt::new(self.prompts.planner_system.clone(), user)
  }

  /// Ask the model for a plan and merge it under the caller's own overrides.
  #[instrument(level = "info", skip(self, request, requested), fields(topics = request.topics().len()))]
  pub async fn plan(&self, request: &GenerationRequest, requested: &QuizOverrides) -> Result<QuizOverrides, PlanError> {
    let prompt = self.build_prompt(request, requested);
    let raw = self.gate.call(&prompt, self.temperature).await?;
    let plan = parse_plan(&raw)?;
    let merged = merge_plan(request.topics(), requested, plan);
    info!(
      target: "pipeline",
      title = merged.title.as_deref().unwrap_or_default(),
      named_rounds = merged.round_names.len(),
      "Quiz plan ready"
    );
    Ok(merged)
  }

  /// Like `plan`, but any failure keeps the caller's overrides unchanged.
  pub async fn plan_or_fallback(&self, request: &GenerationRequest, requested: &QuizOverrides) -> QuizOverrides {
    match self.plan(request, requested).await {
      Ok(planned) => planned,
      Err(e) => {
        warn!(target: "pipeline", error = %e, "Quiz planning failed; using default title and round names");
        requested.clone()
      }
    }
  }
}

fn non_blank(v: &Option<String>) -> Option<&str> {
  v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn merge_plan(topics: &[String], requested: &QuizOverrides, plan: ParsedPlan) -> QuizOverrides {
  let mut round_names = round_names_for(topics, plan.rounds);
  round_names.extend(requested.round_names.iter().map(|(k, v)| (k.clone(), v.clone())));
  QuizOverrides {
    title: non_blank(&requested.title).map(str::to_string).or(plan.title),
    description: non_blank(&requested.description).map(str::to_string).or(plan.description),
    round_names,
  }
}

/// Match planned rounds to request topics by name (case-insensitive). Rounds without a
/// recognizable topic are matched by position, but only when the plan has one round per topic.
fn round_names_for(topics: &[String], rounds: Vec<PlannedRound>) -> HashMap<String, String> {
  let positional = rounds.len() == topics.len();
  let mut names = HashMap::new();
  for (i, round) in rounds.into_iter().enumerate() {
    let by_name = round
      .topic
      .as_deref()
      .and_then(|t| topics.iter().find(|topic| topic.eq_ignore_ascii_case(t)));
    let topic = match (by_name, positional) {
      (Some(topic), _) => topic,
      (None, true) => &topics[i],
      (None, false) => continue,
    };
    names.entry(topic.clone()).or_insert(round.name);
  }
  names
}

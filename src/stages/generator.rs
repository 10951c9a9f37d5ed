//! QuestionGenerator: topic + difficulty + count -> candidate questions.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::Prompts;
use crate::domain::{Candidate, Difficulty};
use crate::model::{ModelError, ModelPrompt};
use crate::parse::{parse_questions, ParseError};
use crate::stages::ModelGate;
use crate::util::{fill_template, trunc_for_log};

/// Most recent exclusions quoted in the prompt; older ones are still deduplicated locally.
const MAX_EXCLUSIONS_IN_PROMPT: usize = 60;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
  #[error("model call failed: {0}")]
  Model(#[from] ModelError),

  #[error("unparsable generator output: {0}")]
  Parse(#[from] ParseError),

  #[error("asked for {expected} questions, got {got} usable")]
  ShortBatch { expected: usize, got: usize },
}

/// One generation call's inputs.
#[derive(Debug, Clone, Copy)]
pub struct GenerationAsk<'a> {
  pub topic: &'a str,
  pub difficulty: Difficulty,
  pub count: usize,
  /// Previously seen question texts. Advisory only.
  pub exclude: &'a [String],
  /// Issues raised against last attempt's rejected questions. Advisory only.
  pub feedback: &'a [String],
  pub attempt: u32,
}

#[derive(Clone)]
pub struct QuestionGenerator {
  gate: ModelGate,
  prompts: Arc<Prompts>,
  temperature: f32,
}

impl QuestionGenerator {
  pub fn new(gate: ModelGate, prompts: Arc<Prompts>, temperature: f32) -> Self {
    Self { gate, prompts, temperature }
  }

  pub fn build_prompt(&self, ask: &GenerationAsk<'_>) -> ModelPrompt {
    let count = ask.count.to_string();
    let exclusions = exclusions_block(ask.exclude);
    let feedback = feedback_block(ask.feedback, ask.attempt);
    let user = fill_template(
      &self.prompts.generator_user_template,
      &[
        ("count", &count),
        ("topic", ask.topic),
        ("difficulty", ask.difficulty.as_str()),
        ("difficulty_guidance", ask.difficulty.guidance()),
        ("exclusions", &exclusions),
        ("feedback", &feedback),
      ],
    );
    ModelPrompt::new(self.prompts.generator_system.clone(), user)
  }

  /// One model call at the creative temperature. Fewer than `count` usable questions is an error;
  /// extra questions are passed through for the controller to truncate.
  #[instrument(level = "info", skip(self, ask), fields(topic = %ask.topic, count = ask.count, attempt = ask.attempt, excluded = ask.exclude.len()))]
  pub async fn generate(&self, ask: GenerationAsk<'_>) -> Result<Vec<Candidate>, GenerationError> {
    let prompt = self.build_prompt(&ask);
    let raw = self.gate.call(&prompt, self.temperature).await?;
    let batch = parse_questions(&raw)?;

    for reason in &batch.rejected {
      warn!(target: "pipeline", topic = %ask.topic, attempt = ask.attempt, %reason, "Dropping malformed generated question");
    }
    if batch.questions.len() < ask.count {
      return Err(GenerationError::ShortBatch { expected: ask.count, got: batch.questions.len() });
    }

    let candidates: Vec<Candidate> = batch
      .questions
      .into_iter()
      .map(|q| Candidate {
        id: Uuid::new_v4().to_string(),
        topic: ask.topic.to_string(),
        difficulty: ask.difficulty,
        prompt_text: prompt.user.clone(),
        question_text: q.question_text,
        options: q.options,
        correct_answer: q.correct_answer,
        explanation: q.explanation,
        attempt_number: ask.attempt,
      })
      .collect();

    info!(
      target: "pipeline",
      topic = %ask.topic,
      generated = candidates.len(),
      first_preview = %candidates.first().map(|c| trunc_for_log(&c.question_text, 40)).unwrap_or_default(),
      "Candidates generated"
    );
    Ok(candidates)
  }
}

fn exclusions_block(exclude: &[String]) -> String {
  if exclude.is_empty() {
    return String::new();
  }
  let start = exclude.len().saturating_sub(MAX_EXCLUSIONS_IN_PROMPT);
  let mut s = String::from("Do NOT repeat or rephrase any of these existing questions:\n");
  for t in &exclude[start..] {
    s.push_str("- ");
    s.push_str(t);
    s.push('\n');
  }
  s
}

fn feedback_block(feedback: &[String], attempt: u32) -> String {
  if feedback.is_empty() {
    return String::new();
  }
  let mut s = format!(
    "IMPORTANT: this is regeneration attempt {}. Previous questions on this topic had quality issues:\n",
    attempt
  );
  for f in feedback {
    s.push_str("- ");
    s.push_str(f);
    s.push('\n');
  }
  s.push_str("Focus on clear, unambiguous wording, plausible but clearly incorrect distractors and the proper difficulty level.\n");
  s
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  use crate::model::testing::{questions_json, ScriptedModel, GENERATOR};

  fn generator(model: ScriptedModel) -> (QuestionGenerator, Arc<ScriptedModel>) {
    let model = Arc::new(model);
    let gate = ModelGate::new(model.clone(), 2, Duration::from_secs(5));
    (QuestionGenerator::new(gate, Arc::new(Prompts::default()), 0.8), model)
  }

  fn ask<'a>(count: usize, exclude: &'a [String], feedback: &'a [String]) -> GenerationAsk<'a> {
    GenerationAsk { topic: "Science", difficulty: Difficulty::Hard, count, exclude, feedback, attempt: 1 }
  }

  #[tokio::test]
  async fn builds_candidates_with_topic_and_attempt() {
    let (gen, model) = generator(
      ScriptedModel::new().route(GENERATOR, "Science", vec![questions_json(&["What is H2O?", "What is NaCl?"])]),
    );
    let cs = gen.generate(ask(2, &[], &[])).await.unwrap();
    assert_eq!(cs.len(), 2);
    assert!(cs.iter().all(|c| c.topic == "Science" && c.attempt_number == 1 && c.difficulty == Difficulty::Hard));
    assert_ne!(cs[0].id, cs[1].id);

    let calls = model.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].temperature, 0.8);
    assert!(calls[0].prompt.user.contains("Generate 2 multiple-choice questions on the topic: Science"));
  }

  #[tokio::test]
  async fn short_batch_is_an_error() {
    let (gen, _) = generator(ScriptedModel::new().route(GENERATOR, "", vec![questions_json(&["Only one?"])]));
    let err = gen.generate(ask(3, &[], &[])).await.unwrap_err();
    assert!(matches!(err, GenerationError::ShortBatch { expected: 3, got: 1 }));
  }

  #[tokio::test]
  async fn model_failures_surface_as_generation_errors() {
    let (gen, _) = generator(ScriptedModel::new().route(GENERATOR, "", vec![Ok("not json".into())]));
    assert!(matches!(gen.generate(ask(1, &[], &[])).await, Err(GenerationError::Parse(_))));
    // script is now exhausted
    assert!(matches!(gen.generate(ask(1, &[], &[])).await, Err(GenerationError::Model(_))));
  }

  #[test]
  fn prompt_lists_exclusions_and_feedback() {
    let (gen, _) = generator(ScriptedModel::new());
    let exclude = vec!["Old question?".to_string()];
    let feedback = vec!["answer B is also correct".to_string()];
    let p = gen.build_prompt(&ask(2, &exclude, &feedback));
    assert!(p.user.contains("- Old question?"));
    assert!(p.user.contains("regeneration attempt 1"));
    assert!(p.user.contains("- answer B is also correct"));
    assert!(p.system.contains("quiz question writer"));

    let bare = gen.build_prompt(&ask(2, &[], &[]));
    assert!(!bare.user.contains("Do NOT repeat"));
  }
}

//! QuestionValidator: strict factual/format check producing the authoritative quality score.

use std::sync::Arc;

use tracing::{instrument, warn};

use crate::config::Prompts;
use crate::domain::{Candidate, ValidationResult};
use crate::model::{ModelError, ModelPrompt};
use crate::parse::{parse_validations, OrderError, ParseError};
use crate::stages::{format_candidates, ModelGate};
use crate::util::{fill_template, trunc_for_log};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
  #[error("model call failed: {0}")]
  Model(#[from] ModelError),

  #[error("unparsable validation output: {0}")]
  Parse(#[from] ParseError),

  #[error("validation does not line up with candidates: {0}")]
  Misaligned(#[from] OrderError),
}

#[derive(Clone)]
pub struct QuestionValidator {
  gate: ModelGate,
  prompts: Arc<Prompts>,
  temperature: f32,
}

impl QuestionValidator {
  pub fn new(gate: ModelGate, prompts: Arc<Prompts>, temperature: f32) -> Self {
    Self { gate, prompts, temperature }
  }

  #[instrument(level = "info", skip(self, candidates), fields(count = candidates.len()))]
  pub async fn validate(&self, candidates: &[Candidate]) -> Result<Vec<ValidationResult>, ValidationError> {
    let user = fill_template(&self.prompts.validator_user_template, &[("questions", &format_candidates(candidates))]);
    let prompt = ModelPrompt::new(self.prompts.validator_system.clone(), user);
    let raw = self.gate.call(&prompt, self.temperature).await?;
    let parsed = parse_validations(&raw, candidates.len())??;

    let results: Vec<ValidationResult> = candidates
      .iter()
      .zip(parsed)
      .map(|(c, v)| ValidationResult {
        candidate_ref: c.id.clone(),
        quality_score: v.quality_score,
        factual_issues: v.factual_issues,
      })
      .collect();

    // Factual issues never reject on their own; surface them for diagnostics.
    for (c, r) in candidates.iter().zip(&results) {
      if !r.factual_issues.is_empty() {
        warn!(
          target: "pipeline",
          topic = %c.topic,
          question = %trunc_for_log(&c.question_text, 40),
          score = r.quality_score,
          issues = ?r.factual_issues,
          "Validator reported factual issues"
        );
      }
    }
    Ok(results)
  }
}

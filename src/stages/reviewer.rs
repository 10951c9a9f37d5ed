//! QuestionReviewer: batched critique of one attempt's candidates.
//! Its verdicts are diagnostics; only the validator score decides acceptance.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::Prompts;
use crate::domain::{Candidate, RecommendedAction, ReviewFeedback};
use crate::model::{ModelError, ModelPrompt};
use crate::parse::{parse_reviews, OrderError, ParseError};
use crate::stages::{format_candidates, ModelGate};
use crate::util::fill_template;

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
  #[error("model call failed: {0}")]
  Model(#[from] ModelError),

  #[error("unparsable review output: {0}")]
  Parse(#[from] ParseError),

  #[error("review does not line up with candidates: {0}")]
  Misaligned(#[from] OrderError),
}

#[derive(Clone)]
pub struct QuestionReviewer {
  gate: ModelGate,
  prompts: Arc<Prompts>,
  temperature: f32,
}

impl QuestionReviewer {
  pub fn new(gate: ModelGate, prompts: Arc<Prompts>, temperature: f32) -> Self {
    Self { gate, prompts, temperature }
  }

  #[instrument(level = "info", skip(self, candidates), fields(count = candidates.len()))]
  pub async fn review(&self, candidates: &[Candidate]) -> Result<Vec<ReviewFeedback>, ReviewError> {
    let user = fill_template(&self.prompts.reviewer_user_template, &[("questions", &format_candidates(candidates))]);
    let prompt = ModelPrompt::new(self.prompts.reviewer_system.clone(), user);
    let raw = self.gate.call(&prompt, self.temperature).await?;
    let reviews = parse_reviews(&raw, candidates.len())??;

    let feedback: Vec<ReviewFeedback> = candidates
      .iter()
      .zip(reviews)
      .map(|(c, r)| ReviewFeedback {
        candidate_ref: c.id.clone(),
        issues: r.issues,
        recommended_action: r.recommended_action,
        summary: r.summary,
        criteria: r.criteria,
      })
      .collect();

    let rejects = feedback.iter().filter(|f| f.recommended_action == RecommendedAction::Reject).count();
    let overall = mean_overall(&feedback);
    debug!(target: "pipeline", reviewed = feedback.len(), rejects, ?overall, "Review complete");
    Ok(feedback)
  }
}

/// Mean reviewer `overall` score over the candidates that carry one.
pub fn mean_overall(feedback: &[ReviewFeedback]) -> Option<f32> {
  let scores: Vec<f32> = feedback.iter().filter_map(|f| f.criteria.overall).collect();
  if scores.is_empty() {
    None
  } else {
    Some(scores.iter().sum::<f32>() / scores.len() as f32)
  }
}

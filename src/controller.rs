//! RegenerationController: the per-topic generate → review → validate loop.
//!
//! Each topic runs as its own task and owns its state (accepted questions, seen texts,
//! attempt counter). Scoring and deduplication happen on every attempt, so only the
//! deficit is ever regenerated and a topic makes at most `max_regenerations + 1` attempts.
//!
//! ```text
//! PENDING -> GENERATING -> REVIEWING -> VALIDATING -+-> ACCEPTED
//!                ^                                  +-> REGENERATING -+
//!                |                                  +-> EXHAUSTED     |
//!                +----------------------------------------------------+
//! ```
//! Any stage failure (including a timeout) consumes the attempt and goes straight to
//! REGENERATING or EXHAUSTED.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::config::{PipelineConfig, Prompts};
use crate::domain::{AcceptedQuestion, Candidate, GenerationRequest, RecommendedAction, ReviewFeedback, ValidationResult};
use crate::stages::generator::GenerationAsk;
use crate::stages::reviewer::mean_overall;
use crate::stages::{ModelGate, QuestionGenerator, QuestionReviewer, QuestionValidator, StageError};
use crate::util::{normalize_question, trunc_for_log};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicState {
  Pending,
  Generating,
  Reviewing,
  Validating,
  Regenerating,
  Accepted,
  Exhausted,
}

/// State plus the data each transition hands to the next stage.
enum Phase {
  Pending,
  Generating,
  Reviewing(Vec<Candidate>),
  Validating(Vec<Candidate>, Vec<ReviewFeedback>),
  Regenerating,
  Accepted,
  Exhausted,
}

impl Phase {
  fn state(&self) -> TopicState {
    match self {
      Phase::Pending => TopicState::Pending,
      Phase::Generating => TopicState::Generating,
      Phase::Reviewing(_) => TopicState::Reviewing,
      Phase::Validating(..) => TopicState::Validating,
      Phase::Regenerating => TopicState::Regenerating,
      Phase::Accepted => TopicState::Accepted,
      Phase::Exhausted => TopicState::Exhausted,
    }
  }
}

/// What one attempt did. Failed attempts carry the stage and error instead of counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttemptRecord {
  pub attempt: u32,
  pub requested: usize,
  pub generated: usize,
  pub accepted: usize,
  pub duplicates: usize,
  pub below_threshold: usize,
  pub overflow: usize,
  pub reviewer_rejects: usize,
  pub factual_issues: usize,
  /// Mean reviewer overall score for the batch, when the reviewer scored criteria.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mean_review_score: Option<f32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failed_stage: Option<&'static str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub elapsed_ms: u64,
}

/// Per-topic outcome surfaced to callers so they can raise the budget or reword a topic.
#[derive(Debug, Clone, Serialize)]
pub struct TopicReport {
  pub topic: String,
  pub state: TopicState,
  pub attempts_used: u32,
  pub accepted: usize,
  pub deficit: usize,
  pub attempts: Vec<AttemptRecord>,
}

impl TopicReport {
  pub fn format_summary(&self) -> String {
    let status = match self.state {
      TopicState::Accepted => "ACCEPTED",
      TopicState::Exhausted => "EXHAUSTED",
      _ => "IN PROGRESS",
    };
    let mut s = format!(
      "[{}] {}: {} accepted, deficit {}, {} attempt(s)\n",
      status, self.topic, self.accepted, self.deficit, self.attempts_used
    );
    for a in &self.attempts {
      match (&a.failed_stage, &a.error) {
        (Some(stage), Some(err)) => s.push_str(&format!("  #{}: {} failed - {}\n", a.attempt, stage, err)),
        _ => s.push_str(&format!(
          "  #{}: {}/{} generated, {} accepted, {} duplicate, {} below threshold\n",
          a.attempt, a.generated, a.requested, a.accepted, a.duplicates, a.below_threshold
        )),
      }
    }
    s
  }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("topic '{topic}' exhausted its budget after {attempts} attempt(s), {deficit} question(s) short")]
pub struct TopicExhaustedError {
  pub topic: String,
  pub attempts: u32,
  pub deficit: usize,
}

/// Terminal result of one topic task.
#[derive(Debug, Clone)]
pub struct TopicOutcome {
  pub report: TopicReport,
  pub accepted: Vec<AcceptedQuestion>,
}

impl TopicOutcome {
  pub fn into_result(self) -> Result<Vec<AcceptedQuestion>, TopicExhaustedError> {
    match self.report.state {
      TopicState::Accepted => Ok(self.accepted),
      _ => Err(TopicExhaustedError {
        topic: self.report.topic,
        attempts: self.report.attempts_used,
        deficit: self.report.deficit,
      }),
    }
  }
}

/// At least one topic did not reach its quota; nothing may be assembled.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} topic(s) exhausted their regeneration budget", failures.len())]
pub struct ExhaustedRun {
  pub failures: Vec<TopicExhaustedError>,
  pub reports: Vec<TopicReport>,
}

/// All topic outcomes of one run, in request order.
#[derive(Debug, Clone)]
pub struct RunOutcome {
  pub outcomes: Vec<TopicOutcome>,
}

impl RunOutcome {
  pub fn reports(&self) -> Vec<TopicReport> {
    self.outcomes.iter().map(|o| o.report.clone()).collect()
  }

  /// Per-topic accepted questions, or every exhausted topic when any fell short.
  pub fn into_accepted(self) -> Result<(HashMap<String, Vec<AcceptedQuestion>>, Vec<TopicReport>), ExhaustedRun> {
    let reports = self.reports();
    let mut per_topic = HashMap::new();
    let mut failures = Vec::new();
    for outcome in self.outcomes {
      let topic = outcome.report.topic.clone();
      match outcome.into_result() {
        Ok(qs) => {
          per_topic.insert(topic, qs);
        }
        Err(e) => failures.push(e),
      }
    }
    if failures.is_empty() {
      Ok((per_topic, reports))
    } else {
      Err(ExhaustedRun { failures, reports })
    }
  }
}

/// Question texts a topic has already evaluated, in first-seen order.
#[derive(Debug, Default)]
struct SeenTexts {
  normalized: HashSet<String>,
  texts: Vec<String>,
}

impl SeenTexts {
  /// True when the text was not seen before.
  fn insert(&mut self, text: &str) -> bool {
    if self.normalized.insert(normalize_question(text)) {
      self.texts.push(text.to_string());
      true
    } else {
      false
    }
  }
}

/// Task-local state of one topic.
struct TopicRun<'a> {
  topic: &'a str,
  request: &'a GenerationRequest,
  accepted: Vec<AcceptedQuestion>,
  seen: SeenTexts,
  feedback: Vec<String>,
  attempt: u32,
  history: Vec<AttemptRecord>,
  attempt_started: Instant,
}

impl<'a> TopicRun<'a> {
  fn new(topic: &'a str, request: &'a GenerationRequest) -> Self {
    Self {
      topic,
      request,
      accepted: Vec::new(),
      seen: SeenTexts::default(),
      feedback: Vec::new(),
      attempt: 0,
      history: Vec::new(),
      attempt_started: Instant::now(),
    }
  }

  fn deficit(&self) -> usize {
    self.request.questions_per_topic().saturating_sub(self.accepted.len())
  }

  fn elapsed_ms(&self) -> u64 {
    self.attempt_started.elapsed().as_millis() as u64
  }

  /// Where the topic goes once the current attempt has been consumed.
  fn after_attempt(&mut self) -> Phase {
    self.attempt += 1;
    if self.accepted.len() >= self.request.questions_per_topic() {
      Phase::Accepted
    } else if self.attempt > self.request.max_regenerations() {
      Phase::Exhausted
    } else {
      Phase::Regenerating
    }
  }

  fn fail_attempt(&mut self, requested: usize, err: StageError) -> Phase {
    warn!(
      target: "pipeline",
      topic = %self.topic,
      attempt = self.attempt,
      stage = err.stage(),
      error = %err,
      "Attempt consumed by stage failure"
    );
    self.history.push(AttemptRecord {
      attempt: self.attempt,
      requested,
      failed_stage: Some(err.stage()),
      error: Some(err.to_string()),
      elapsed_ms: self.elapsed_ms(),
      ..Default::default()
    });
    self.after_attempt()
  }

  /// Apply the acceptance policy in generation order.
  fn score_attempt(
    &mut self,
    requested: usize,
    candidates: Vec<Candidate>,
    reviews: Vec<ReviewFeedback>,
    validations: Vec<ValidationResult>,
  ) -> Phase {
    let threshold = self.request.quality_threshold();
    let quota = self.request.questions_per_topic();
    let mut record = AttemptRecord {
      attempt: self.attempt,
      requested,
      generated: candidates.len(),
      mean_review_score: mean_overall(&reviews),
      ..Default::default()
    };
    let mut next_feedback = Vec::new();

    for ((candidate, review), validation) in candidates.into_iter().zip(reviews).zip(validations) {
      let score = validation.quality_score;
      if review.recommended_action == RecommendedAction::Reject {
        record.reviewer_rejects += 1;
      }
      record.factual_issues += validation.factual_issues.len();

      if !self.seen.insert(&candidate.question_text) {
        record.duplicates += 1;
        debug!(target: "pipeline", topic = %self.topic, question = %trunc_for_log(&candidate.question_text, 40), "Duplicate dropped");
        continue;
      }
      if score < threshold {
        record.below_threshold += 1;
        next_feedback.push(describe_rejection(&candidate, &review, &validation, threshold));
        continue;
      }
      if self.accepted.len() >= quota {
        record.overflow += 1;
        continue;
      }
      if review.recommended_action != RecommendedAction::Accept {
        debug!(
          target: "pipeline",
          topic = %self.topic,
          action = ?review.recommended_action,
          score,
          "Reviewer disagreed; accepting on validator score"
        );
      }
      record.accepted += 1;
      self.accepted.push(AcceptedQuestion::from_candidate(candidate, score));
    }

    record.elapsed_ms = self.elapsed_ms();
    info!(
      target: "pipeline",
      topic = %self.topic,
      attempt = self.attempt,
      generated = record.generated,
      accepted = record.accepted,
      duplicates = record.duplicates,
      below_threshold = record.below_threshold,
      total_accepted = self.accepted.len(),
      quota,
      "Attempt scored"
    );
    self.history.push(record);
    self.feedback = next_feedback;
    self.after_attempt()
  }

  fn finish(self, state: TopicState) -> TopicOutcome {
    let deficit = self.deficit();
    TopicOutcome {
      report: TopicReport {
        topic: self.topic.to_string(),
        state,
        attempts_used: self.attempt,
        accepted: self.accepted.len(),
        deficit,
        attempts: self.history,
      },
      accepted: self.accepted,
    }
  }
}

/// Improvement note for the next generation prompt.
fn describe_rejection(candidate: &Candidate, review: &ReviewFeedback, validation: &ValidationResult, threshold: f32) -> String {
  let mut reasons: Vec<String> = review.issues.iter().chain(&validation.factual_issues).cloned().collect();
  if reasons.is_empty() {
    reasons.push(format!("scored {:.2}, below the {:.2} bar", validation.quality_score, threshold));
  }
  format!("\"{}\": {}", trunc_for_log(&candidate.question_text, 80), reasons.join("; "))
}

#[derive(Clone)]
pub struct RegenerationController {
  generator: QuestionGenerator,
  reviewer: QuestionReviewer,
  validator: QuestionValidator,
}

impl RegenerationController {
  pub fn new(gate: ModelGate, prompts: Arc<Prompts>, cfg: &PipelineConfig) -> Self {
    Self {
      generator: QuestionGenerator::new(gate.clone(), prompts.clone(), cfg.generation_temperature),
      reviewer: QuestionReviewer::new(gate.clone(), prompts.clone(), cfg.review_temperature),
      validator: QuestionValidator::new(gate, prompts, cfg.validation_temperature),
    }
  }

  /// Drive one topic to ACCEPTED or EXHAUSTED.
  #[instrument(level = "info", skip(self, request), fields(quota = request.questions_per_topic(), max_regenerations = request.max_regenerations()))]
  pub async fn run_topic(&self, request: &GenerationRequest, topic: &str) -> TopicOutcome {
    let mut run = TopicRun::new(topic, request);
    let mut phase = Phase::Pending;

    let terminal = loop {
      debug!(target: "pipeline", %topic, state = ?phase.state(), attempt = run.attempt, "Topic transition");
      phase = match phase {
        Phase::Pending | Phase::Regenerating => Phase::Generating,
        Phase::Generating => {
          run.attempt_started = Instant::now();
          let requested = run.deficit();
          let ask = GenerationAsk {
            topic,
            difficulty: request.difficulty(),
            count: requested,
            exclude: &run.seen.texts,
            feedback: &run.feedback,
            attempt: run.attempt,
          };
          let result = self.generator.generate(ask).await;
          match result {
            Ok(candidates) => Phase::Reviewing(candidates),
            Err(e) => run.fail_attempt(requested, e.into()),
          }
        }
        Phase::Reviewing(candidates) => {
          let requested = run.deficit();
          let result = self.reviewer.review(&candidates).await;
          match result {
            Ok(reviews) => Phase::Validating(candidates, reviews),
            Err(e) => run.fail_attempt(requested, e.into()),
          }
        }
        Phase::Validating(candidates, reviews) => {
          let requested = run.deficit();
          let result = self.validator.validate(&candidates).await;
          match result {
            Ok(validations) => run.score_attempt(requested, candidates, reviews, validations),
            Err(e) => run.fail_attempt(requested, e.into()),
          }
        }
        Phase::Accepted => break TopicState::Accepted,
        Phase::Exhausted => break TopicState::Exhausted,
      };
    };

    let outcome = run.finish(terminal);
    match terminal {
      TopicState::Accepted => info!(target: "pipeline", %topic, attempts = outcome.report.attempts_used, "Topic accepted"),
      _ => error!(
        target: "pipeline",
        %topic,
        attempts = outcome.report.attempts_used,
        deficit = outcome.report.deficit,
        "Topic exhausted its regeneration budget"
      ),
    }
    outcome
  }

  /// Run every topic concurrently and wait for all of them to reach a terminal state.
  /// Model concurrency is bounded by the gate's semaphore, not by the number of tasks.
  pub async fn run(&self, request: Arc<GenerationRequest>) -> RunOutcome {
    let topics = request.topics().to_vec();
    let mut set = JoinSet::new();
    for (idx, topic) in topics.iter().cloned().enumerate() {
      let this = self.clone();
      let req = request.clone();
      let span = info_span!("topic", topic = %topic);
      set.spawn(async move { (idx, this.run_topic(&req, &topic).await) }.instrument(span));
    }

    let mut slots: Vec<Option<TopicOutcome>> = (0..topics.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
      match joined {
        Ok((idx, outcome)) => slots[idx] = Some(outcome),
        Err(e) => error!(target: "pipeline", error = %e, "Topic task failed"),
      }
    }

    let outcomes = slots
      .into_iter()
      .zip(topics)
      .map(|(slot, topic)| slot.unwrap_or_else(|| lost_task(topic, request.questions_per_topic())))
      .collect();
    RunOutcome { outcomes }
  }
}

/// Outcome for a topic whose task panicked or was cancelled.
fn lost_task(topic: String, quota: usize) -> TopicOutcome {
  TopicOutcome {
    report: TopicReport {
      topic,
      state: TopicState::Exhausted,
      attempts_used: 0,
      accepted: 0,
      deficit: quota,
      attempts: Vec::new(),
    },
    accepted: Vec::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  use crate::domain::Difficulty;
  use crate::model::testing::*;
  use crate::model::ModelError;

  fn controller(model: ScriptedModel) -> (RegenerationController, Arc<ScriptedModel>) {
    controller_with_timeout(model, Duration::from_secs(5))
  }

  fn controller_with_timeout(model: ScriptedModel, timeout: Duration) -> (RegenerationController, Arc<ScriptedModel>) {
    controller_with(model, 2, timeout)
  }

  fn controller_with(model: ScriptedModel, parallelism: usize, timeout: Duration) -> (RegenerationController, Arc<ScriptedModel>) {
    let model = Arc::new(model);
    let gate = ModelGate::new(model.clone(), parallelism, timeout);
    let ctl = RegenerationController::new(gate, Arc::new(Prompts::default()), &PipelineConfig::default());
    (ctl, model)
  }

  fn request(topics: &[&str], qpt: u32, threshold: f32, max_regen: u32) -> GenerationRequest {
    GenerationRequest::new(topics.iter().map(|s| s.to_string()).collect(), qpt, Difficulty::Medium, threshold, max_regen)
      .unwrap()
  }

  fn texts(qs: &[AcceptedQuestion]) -> Vec<&str> {
    qs.iter().map(|q| q.final_question_text.as_str()).collect()
  }

  #[tokio::test]
  async fn keeps_partial_credit_and_regenerates_only_the_deficit() {
    let model = ScriptedModel::new()
      .route(GENERATOR, "History", vec![
        questions_json(&["Who built the pyramids?", "When did Rome fall?", "Who was Charlemagne?"]),
        questions_json(&["Who signed the Magna Carta?", "When did WW1 start?"]),
      ])
      .route(REVIEWER, "History", vec![reviews_json(3), reviews_json(2)])
      .route(VALIDATOR, "History", vec![validations_json(&[0.9, 0.5, 0.6]), validations_json(&[0.8, 0.95])]);
    let (ctl, model) = controller(model);
    let req = request(&["History"], 3, 0.7, 2);

    let outcome = ctl.run_topic(&req, "History").await;
    assert_eq!(outcome.report.state, TopicState::Accepted);
    assert_eq!(outcome.report.attempts_used, 2);
    assert_eq!(outcome.report.deficit, 0);
    assert_eq!(
      texts(&outcome.accepted),
      vec!["Who built the pyramids?", "Who signed the Magna Carta?", "When did WW1 start?"]
    );
    let scores: Vec<f32> = outcome.accepted.iter().map(|q| q.quality_score).collect();
    assert_eq!(scores, vec![0.9, 0.8, 0.95]);

    let gens = model.calls_matching(GENERATOR);
    assert_eq!(gens.len(), 2);
    let second = &gens[1].prompt.user;
    assert!(second.contains("Generate 2 multiple-choice questions"));
    assert!(second.contains("- When did Rome fall?"));
    assert!(second.contains("- Who built the pyramids?"));
    assert!(second.contains("regeneration attempt 1"));
    assert!(second.contains("below the 0.70 bar"));
  }

  #[tokio::test]
  async fn full_budget_never_exceeds_max_regenerations() {
    let model = ScriptedModel::new()
      .route(GENERATOR, "Music", vec![
        questions_json(&["Who wrote Fidelio?", "Who wrote Aida?", "Who wrote Carmen?", "Who wrote Tosca?"]),
        questions_json(&["Who wrote Norma?", "Who wrote Lakme?", "Who wrote Otello?"]),
        questions_json(&["Who wrote Rusalka?", "Who wrote Salome?"]),
        questions_json(&["Who wrote Wozzeck?"]),
        questions_json(&["Never requested?"]),
      ])
      .route(REVIEWER, "Music", vec![reviews_json(4), reviews_json(3), reviews_json(2), reviews_json(1)])
      .route(VALIDATOR, "Music", vec![
        validations_json(&[0.9, 0.1, 0.1, 0.1]),
        validations_json(&[0.9, 0.1, 0.1]),
        validations_json(&[0.9, 0.1]),
        validations_json(&[0.9]),
      ]);
    let (ctl, model) = controller(model);
    let outcome = ctl.run_topic(&request(&["Music"], 4, 0.7, 3), "Music").await;

    assert_eq!(outcome.report.state, TopicState::Accepted);
    assert_eq!(outcome.report.attempts_used, 4);
    assert_eq!(model.calls_matching(GENERATOR).len(), 4);
    let attempts: Vec<u32> = outcome.accepted.iter().map(|q| q.attempt_number).collect();
    assert_eq!(attempts, vec![0, 1, 2, 3]);
    assert!(outcome.report.attempts.iter().all(|a| a.attempt <= 3));
    let asked: Vec<usize> = outcome.report.attempts.iter().map(|a| a.requested).collect();
    assert_eq!(asked, vec![4, 3, 2, 1]);
  }

  #[tokio::test]
  async fn exhaustion_stops_at_max_regenerations_plus_one_calls() {
    let batches = (0..6).map(|i| questions_json(&[&format!("Which opera is number {}?", i)])).collect();
    let model = ScriptedModel::new()
      .route(GENERATOR, "Music", batches)
      .route(REVIEWER, "Music", (0..6).map(|_| reviews_json(1)).collect())
      .route(VALIDATOR, "Music", (0..6).map(|_| validations_json(&[0.2])).collect());
    let (ctl, model) = controller(model);
    let outcome = ctl.run_topic(&request(&["Music"], 1, 0.7, 2), "Music").await;

    assert_eq!(outcome.report.state, TopicState::Exhausted);
    assert_eq!(model.calls_matching(GENERATOR).len(), 3);
    assert_eq!(outcome.report.attempts_used, 3);
    let numbers: Vec<u32> = outcome.report.attempts.iter().map(|a| a.attempt).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
  }

  #[tokio::test]
  async fn exhausts_when_budget_runs_out() {
    let model = ScriptedModel::new()
      .route(GENERATOR, "History", vec![
        questions_json(&["Who built the pyramids?", "When did Rome fall?", "Who was Charlemagne?"]),
        questions_json(&["Who signed the Magna Carta?", "When did WW1 start?"]),
      ])
      .route(REVIEWER, "History", vec![reviews_json(3), reviews_json(2)])
      .route(VALIDATOR, "History", vec![validations_json(&[0.9, 0.5, 0.6]), validations_json(&[0.4, 0.3])]);
    let (ctl, model) = controller(model);
    let req = request(&["History"], 3, 0.7, 1);

    let outcome = ctl.run_topic(&req, "History").await;
    assert_eq!(outcome.report.state, TopicState::Exhausted);
    assert_eq!(outcome.report.attempts_used, 2);
    assert_eq!(model.calls_matching(GENERATOR).len(), 2);

    let err = outcome.into_result().unwrap_err();
    assert_eq!(err, TopicExhaustedError { topic: "History".into(), attempts: 2, deficit: 2 });
  }

  #[tokio::test]
  async fn duplicates_never_take_a_slot() {
    let model = ScriptedModel::new()
      .route(GENERATOR, "Geo", vec![
        questions_json(&["What is the capital of Peru?", "Which river is longest?"]),
        questions_json(&["  what is the CAPITAL   of peru? ", "Which desert is largest?"]),
      ])
      .route(REVIEWER, "Geo", vec![reviews_json(2), reviews_json(2)])
      .route(VALIDATOR, "Geo", vec![validations_json(&[0.9, 0.5]), validations_json(&[0.99, 0.8])]);
    let (ctl, _) = controller(model);
    let req = request(&["Geo"], 2, 0.7, 1);

    let outcome = ctl.run_topic(&req, "Geo").await;
    assert_eq!(outcome.report.state, TopicState::Accepted);
    assert_eq!(texts(&outcome.accepted), vec!["What is the capital of Peru?", "Which desert is largest?"]);
    assert_eq!(outcome.report.attempts[1].duplicates, 1);
    assert_eq!(outcome.report.attempts[1].accepted, 1);
  }

  #[tokio::test]
  async fn duplicates_within_one_batch_are_dropped() {
    let model = ScriptedModel::new()
      .route(GENERATOR, "Geo", vec![questions_json(&["Where is Lima?", "where is  lima?"])])
      .route(REVIEWER, "Geo", vec![reviews_json(2)])
      .route(VALIDATOR, "Geo", vec![validations_json(&[0.9, 0.9])]);
    let (ctl, _) = controller(model);
    let outcome = ctl.run_topic(&request(&["Geo"], 2, 0.7, 0), "Geo").await;
    assert_eq!(outcome.report.state, TopicState::Exhausted);
    assert_eq!(outcome.report.deficit, 1);
    assert_eq!(outcome.accepted.len(), 1);
  }

  #[tokio::test]
  async fn overshoot_is_truncated_but_remembered() {
    let model = ScriptedModel::new()
      .route(GENERATOR, "Art", vec![questions_json(&["Who painted the Mona Lisa?", "Who sculpted David?", "Who painted Guernica?"])])
      .route(REVIEWER, "Art", vec![reviews_json(3)])
      .route(VALIDATOR, "Art", vec![validations_json(&[0.9, 0.9, 0.9])]);
    let (ctl, _) = controller(model);
    let outcome = ctl.run_topic(&request(&["Art"], 2, 0.7, 0), "Art").await;
    assert_eq!(outcome.report.state, TopicState::Accepted);
    assert_eq!(outcome.accepted.len(), 2);
    assert_eq!(outcome.report.attempts[0].overflow, 1);
  }

  #[tokio::test]
  async fn stage_failures_consume_attempts() {
    let model = ScriptedModel::new()
      .route(GENERATOR, "Art", vec![
        Err(ModelError::RateLimited("slow down".into())),
        questions_json(&["Who painted the Mona Lisa?"]),
        questions_json(&["Who sculpted David?"]),
      ])
      .route(REVIEWER, "Art", vec![reviews_with(&["accept", "accept"]), reviews_json(1)])
      .route(VALIDATOR, "Art", vec![validations_json(&[0.9])]);
    let (ctl, _) = controller(model);
    let outcome = ctl.run_topic(&request(&["Art"], 1, 0.7, 2), "Art").await;

    assert_eq!(outcome.report.state, TopicState::Accepted);
    assert_eq!(outcome.report.attempts_used, 3);
    let stages: Vec<_> = outcome.report.attempts.iter().map(|a| a.failed_stage).collect();
    assert_eq!(stages, vec![Some("generate"), Some("review"), None]);
    assert_eq!(texts(&outcome.accepted), vec!["Who sculpted David?"]);
  }

  #[tokio::test]
  async fn timeouts_count_against_the_budget() {
    let model = ScriptedModel::new()
      .with_delay(Duration::from_millis(200))
      .route(GENERATOR, "", vec![questions_json(&["A?"]), questions_json(&["B?"]), questions_json(&["C?"])]);
    let (ctl, model) = controller_with_timeout(model, Duration::from_millis(10));
    let outcome = ctl.run_topic(&request(&["Slow"], 1, 0.7, 1), "Slow").await;

    assert_eq!(outcome.report.state, TopicState::Exhausted);
    assert_eq!(outcome.report.attempts_used, 2);
    assert_eq!(model.calls_matching(GENERATOR).len(), 2);
    assert!(outcome.report.attempts.iter().all(|a| a.error.as_deref().unwrap_or("").contains("timed out")));
  }

  #[tokio::test]
  async fn reviewer_reject_is_advisory() {
    let model = ScriptedModel::new()
      .route(GENERATOR, "Art", vec![questions_json(&["Who painted the Mona Lisa?"])])
      .route(REVIEWER, "Art", vec![reviews_with(&["reject"])])
      .route(VALIDATOR, "Art", vec![validations_json(&[0.85])]);
    let (ctl, _) = controller(model);
    let outcome = ctl.run_topic(&request(&["Art"], 1, 0.7, 0), "Art").await;
    assert_eq!(outcome.report.state, TopicState::Accepted);
    assert_eq!(outcome.report.attempts[0].reviewer_rejects, 1);
  }

  #[tokio::test]
  async fn run_keeps_request_order_and_succeeds_when_all_topics_fill() {
    let model = ScriptedModel::new()
      .route(GENERATOR, "Science", vec![questions_json(&["What is H2O?"])])
      .route(GENERATOR, "History", vec![questions_json(&["Who built the pyramids?"])])
      .route(REVIEWER, "Science", vec![reviews_json(1)])
      .route(REVIEWER, "History", vec![reviews_json(1)])
      .route(VALIDATOR, "Science", vec![validations_json(&[0.8])])
      .route(VALIDATOR, "History", vec![validations_json(&[0.9])]);
    let (ctl, _) = controller(model);
    let req = Arc::new(request(&["Science", "History"], 1, 0.7, 0));

    let run = ctl.run(req).await;
    let order: Vec<_> = run.reports().into_iter().map(|r| r.topic).collect();
    assert_eq!(order, vec!["Science", "History"]);
    let (per_topic, reports) = run.into_accepted().unwrap();
    assert_eq!(per_topic["History"][0].final_question_text, "Who built the pyramids?");
    assert!(reports.iter().all(|r| r.state == TopicState::Accepted));
  }

  #[tokio::test]
  async fn shared_gate_bounds_concurrent_model_calls() {
    let topics = ["Science", "History", "Art"];
    let script = |parallelism: usize| {
      let mut model = ScriptedModel::new().with_delay(Duration::from_millis(20));
      for t in topics {
        model = model
          .route(GENERATOR, t, vec![questions_json(&[&format!("A question about {}?", t)])])
          .route(REVIEWER, t, vec![reviews_json(1)])
          .route(VALIDATOR, t, vec![validations_json(&[0.9])]);
      }
      controller_with(model, parallelism, Duration::from_secs(5))
    };

    let (ctl, model) = script(1);
    let (per_topic, _) = ctl.run(Arc::new(request(&topics, 1, 0.7, 0))).await.into_accepted().unwrap();
    assert_eq!(per_topic.len(), 3);
    assert_eq!(model.calls().len(), 9);
    assert_eq!(model.peak_in_flight(), 1);

    let (ctl, model) = script(3);
    ctl.run(Arc::new(request(&topics, 1, 0.7, 0))).await.into_accepted().unwrap();
    assert!(model.peak_in_flight() > 1);
    assert!(model.peak_in_flight() <= 3);
  }

  #[tokio::test]
  async fn one_exhausted_topic_fails_the_run() {
    let model = ScriptedModel::new()
      .route(GENERATOR, "Science", vec![questions_json(&["What is H2O?"])])
      .route(GENERATOR, "History", vec![questions_json(&["Who built the pyramids?"])])
      .route(REVIEWER, "Science", vec![reviews_json(1)])
      .route(REVIEWER, "History", vec![reviews_json(1)])
      .route(VALIDATOR, "Science", vec![validations_json(&[0.2])])
      .route(VALIDATOR, "History", vec![validations_json(&[0.9])]);
    let (ctl, _) = controller(model);
    let req = Arc::new(request(&["History", "Science"], 1, 0.7, 0));

    let err = ctl.run(req).await.into_accepted().unwrap_err();
    assert_eq!(err.failures, vec![TopicExhaustedError { topic: "Science".into(), attempts: 1, deficit: 1 }]);
    assert_eq!(err.reports.len(), 2);
    assert_eq!(err.reports[0].state, TopicState::Accepted);
  }

  #[test]
  fn summary_lists_failed_attempts() {
    let report = TopicReport {
      topic: "Art".into(),
      state: TopicState::Exhausted,
      attempts_used: 1,
      accepted: 0,
      deficit: 1,
      attempts: vec![AttemptRecord {
        attempt: 0,
        failed_stage: Some("review"),
        error: Some("boom".into()),
        ..Default::default()
      }],
    };
    let s = report.format_summary();
    assert!(s.starts_with("[EXHAUSTED] Art"));
    assert!(s.contains("#0: review failed - boom"));
  }
}

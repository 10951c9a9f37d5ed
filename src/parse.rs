//! Raw model text -> typed stage outputs.
//!
//! The model is asked for strict JSON but we still tolerate code fences, leading prose,
//! keyed or listed options, and 0- or 1-based `question_index`. Anything we cannot make
//! sense of fails fast with `ParseError` and never reaches the controller.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::domain::{RecommendedAction, ReviewScores};
use crate::util::option_label;

/// Options are labelled A..Z.
pub const MAX_OPTIONS: usize = 26;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
  #[error("empty model response")]
  Empty,

  #[error("malformed JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error("unexpected response shape: {0}")]
  Shape(String),
}

/// Ordering/count contract violations for batched per-question outputs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
  #[error("expected {expected} entries, got {got}")]
  CountMismatch { expected: usize, got: usize },

  #[error("question_index {0} is duplicated or out of range")]
  BadIndex(usize),
}

/// Strip markdown fences / surrounding prose and return the JSON payload.
pub fn extract_json(text: &str) -> Result<&str, ParseError> {
  let t = text.trim();
  if t.is_empty() {
    return Err(ParseError::Empty);
  }
  let start = t.find(|c| c == '{' || c == '[');
  let end = t.rfind(|c| c == '}' || c == ']');
  match (start, end) {
    (Some(s), Some(e)) if e >= s => Ok(&t[s..=e]),
    _ => Err(ParseError::Shape("no JSON object in response".into())),
  }
}

// --- Generator output ---

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionsEnvelope {
  Wrapped { questions: Vec<QuestionWire> },
  Bare(Vec<QuestionWire>),
}

#[derive(Debug, Deserialize)]
struct QuestionWire {
  #[serde(alias = "question", alias = "text")]
  question_text: String,
  #[serde(default)]
  options: OptionsWire,
  #[serde(alias = "answer")]
  correct_answer: AnswerWire,
  #[serde(default)]
  explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OptionsWire {
  Keyed(BTreeMap<String, String>),
  Listed(Vec<String>),
}

impl Default for OptionsWire {
  fn default() -> Self { OptionsWire::Listed(vec![]) }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnswerWire {
  Index(usize),
  Label(String),
}

/// A well-formed generated question, before it becomes a `Candidate`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuestion {
  pub question_text: String,
  pub options: Vec<String>,
  pub correct_answer: String,
  pub explanation: String,
}

/// Parsed generator batch: well-formed questions plus reasons for the dropped ones.
#[derive(Debug, Default)]
pub struct QuestionBatch {
  pub questions: Vec<ParsedQuestion>,
  pub rejected: Vec<String>,
}

pub fn parse_questions(text: &str) -> Result<QuestionBatch, ParseError> {
  let payload = extract_json(text)?;
  let env: QuestionsEnvelope = serde_json::from_str(payload)?;
  let wires = match env {
    QuestionsEnvelope::Wrapped { questions } => questions,
    QuestionsEnvelope::Bare(qs) => qs,
  };
  let mut batch = QuestionBatch::default();
  for (i, w) in wires.into_iter().enumerate() {
    match normalize_question(w) {
      Ok(q) => batch.questions.push(q),
      Err(reason) => batch.rejected.push(format!("question {}: {}", i, reason)),
    }
  }
  Ok(batch)
}

fn normalize_question(w: QuestionWire) -> Result<ParsedQuestion, String> {
  let question_text = w.question_text.trim().to_string();
  if question_text.is_empty() {
    return Err("empty question text".into());
  }

  let options: Vec<String> = match w.options {
    OptionsWire::Keyed(map) => map.into_values().map(|v| v.trim().to_string()).collect(),
    OptionsWire::Listed(list) => list.into_iter().map(|v| v.trim().to_string()).collect(),
  };
  if options.iter().any(|o| o.is_empty()) {
    return Err("empty option".into());
  }
  if options.len() == 1 {
    return Err("a multiple-choice question needs at least two options".into());
  }
  if options.len() > MAX_OPTIONS {
    return Err(format!("{} options, at most {} can be labelled", options.len(), MAX_OPTIONS));
  }

  let correct_answer = match w.correct_answer {
    AnswerWire::Index(i) if i < options.len() => option_label(i),
    AnswerWire::Index(i) => return Err(format!("correct answer index {} has no option", i)),
    AnswerWire::Label(s) => resolve_label(s.trim(), &options)?,
  };

  Ok(ParsedQuestion {
    question_text,
    options,
    correct_answer,
    explanation: w.explanation.unwrap_or_default().trim().to_string(),
  })
}

/// Map "b", "B", "B) Paris" or "Paris" to the option label; free text for open-form.
fn resolve_label(raw: &str, options: &[String]) -> Result<String, String> {
  if raw.is_empty() {
    return Err("empty correct answer".into());
  }
  if options.is_empty() {
    return Ok(raw.to_string());
  }
  if let Some(i) = options.iter().position(|o| o.eq_ignore_ascii_case(raw)) {
    return Ok(option_label(i));
  }
  let first = raw.chars().next().map(|c| c.to_ascii_uppercase());
  let rest = raw.chars().skip(1).collect::<String>();
  let is_bare_label = rest.is_empty() || rest.starts_with([')', '.', ':', ' ']);
  if let (Some(c), true) = (first, is_bare_label) {
    if c.is_ascii_uppercase() {
      let idx = (c as u8 - b'A') as usize;
      if idx < options.len() {
        return Ok(option_label(idx));
      }
    }
  }
  Err(format!("correct answer '{}' matches no option", raw))
}

// --- Reviewer output ---

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReviewsEnvelope {
  Wrapped { reviews: Vec<ReviewWire> },
  Bare(Vec<ReviewWire>),
}

#[derive(Debug, Deserialize)]
struct ReviewWire {
  #[serde(default)]
  question_index: Option<usize>,
  #[serde(default)]
  issues: Vec<String>,
  #[serde(default, alias = "action")]
  recommended_action: Option<String>,
  #[serde(default)]
  passed: Option<bool>,
  #[serde(default)]
  feedback: Option<String>,
  #[serde(default)]
  clarity_score: Option<f64>,
  #[serde(default, alias = "accuracy_score")]
  correctness_score: Option<f64>,
  #[serde(default, alias = "distractors_score")]
  distractor_score: Option<f64>,
  #[serde(default)]
  difficulty_score: Option<f64>,
  #[serde(default)]
  engagement_score: Option<f64>,
  #[serde(default)]
  overall_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReview {
  pub issues: Vec<String>,
  pub recommended_action: RecommendedAction,
  pub summary: String,
  pub criteria: ReviewScores,
}

fn review_scores(w: &ReviewWire) -> Result<ReviewScores, ParseError> {
  let norm = |v: Option<f64>| v.map(normalize_score).transpose();
  let mut scores = ReviewScores {
    clarity: norm(w.clarity_score)?,
    correctness: norm(w.correctness_score)?,
    distractors: norm(w.distractor_score)?,
    difficulty: norm(w.difficulty_score)?,
    engagement: norm(w.engagement_score)?,
    overall: norm(w.overall_score)?,
  };
  if scores.overall.is_none() {
    scores.overall = scores.criteria_mean();
  }
  Ok(scores)
}

/// Parse reviews and enforce the one-per-candidate ordering contract.
pub fn parse_reviews(text: &str, expected: usize) -> Result<Result<Vec<ParsedReview>, OrderError>, ParseError> {
  let payload = extract_json(text)?;
  let env: ReviewsEnvelope = serde_json::from_str(payload)?;
  let wires = match env {
    ReviewsEnvelope::Wrapped { reviews } => reviews,
    ReviewsEnvelope::Bare(rs) => rs,
  };
  let ordered = match order_by_index(wires, |w| w.question_index, expected) {
    Ok(v) => v,
    Err(e) => return Ok(Err(e)),
  };
  let mut out = Vec::with_capacity(ordered.len());
  for w in ordered {
    let action = match w.recommended_action.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
      Some(a) => match a.as_str() {
        "accept" => RecommendedAction::Accept,
        "revise" => RecommendedAction::Revise,
        "reject" => RecommendedAction::Reject,
        other => return Err(ParseError::Shape(format!("unknown recommended_action '{}'", other))),
      },
      None => match w.passed {
        Some(true) => RecommendedAction::Accept,
        Some(false) => RecommendedAction::Revise,
        None if w.issues.is_empty() => RecommendedAction::Accept,
        None => RecommendedAction::Revise,
      },
    };
    let criteria = review_scores(&w)?;
    out.push(ParsedReview {
      issues: w.issues,
      recommended_action: action,
      summary: w.feedback.unwrap_or_default(),
      criteria,
    });
  }
  Ok(Ok(out))
}

// --- Validator output ---

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ValidationsEnvelope {
  Wrapped { validations: Vec<ValidationWire> },
  Bare(Vec<ValidationWire>),
}

#[derive(Debug, Deserialize)]
struct ValidationWire {
  #[serde(default)]
  question_index: Option<usize>,
  #[serde(default, alias = "score", alias = "confidence")]
  quality_score: Option<f64>,
  #[serde(default, alias = "issues")]
  factual_issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedValidation {
  pub quality_score: f32,
  pub factual_issues: Vec<String>,
}

pub fn parse_validations(text: &str, expected: usize) -> Result<Result<Vec<ParsedValidation>, OrderError>, ParseError> {
  let payload = extract_json(text)?;
  let env: ValidationsEnvelope = serde_json::from_str(payload)?;
  let wires = match env {
    ValidationsEnvelope::Wrapped { validations } => validations,
    ValidationsEnvelope::Bare(vs) => vs,
  };
  let ordered = match order_by_index(wires, |w| w.question_index, expected) {
    Ok(v) => v,
    Err(e) => return Ok(Err(e)),
  };
  let mut out = Vec::with_capacity(ordered.len());
  for (i, w) in ordered.into_iter().enumerate() {
    let raw = w
      .quality_score
      .ok_or_else(|| ParseError::Shape(format!("validation {} has no quality_score", i)))?;
    out.push(ParsedValidation {
      quality_score: normalize_score(raw)?,
      factual_issues: w.factual_issues,
    });
  }
  Ok(Ok(out))
}

// --- Planner output ---

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanEnvelope {
  Wrapped { plan: PlanWire },
  Bare(PlanWire),
}

#[derive(Debug, Deserialize)]
struct PlanWire {
  #[serde(default)]
  title: Option<String>,
  #[serde(default)]
  description: Option<String>,
  #[serde(default)]
  rounds: Vec<PlannedRoundWire>,
}

#[derive(Debug, Deserialize)]
struct PlannedRoundWire {
  #[serde(default)]
  topic: Option<String>,
  #[serde(default, alias = "name")]
  round_name: Option<String>,
}

/// Quiz-level presentation proposed by the planner. Blank fields are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPlan {
  pub title: Option<String>,
  pub description: Option<String>,
  pub rounds: Vec<PlannedRound>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRound {
  pub topic: Option<String>,
  /// Round name without any leading "Round N:" numbering.
  pub name: String,
}

pub fn parse_plan(text: &str) -> Result<ParsedPlan, ParseError> {
  let payload = extract_json(text)?;
  let env: PlanEnvelope = serde_json::from_str(payload)?;
  let wire = match env {
    PlanEnvelope::Wrapped { plan } => plan,
    PlanEnvelope::Bare(plan) => plan,
  };
  let rounds = wire
    .rounds
    .into_iter()
    .filter_map(|r| {
      let name = strip_round_number(r.round_name.as_deref().unwrap_or_default());
      (!name.is_empty()).then(|| PlannedRound { topic: non_blank(r.topic), name: name.to_string() })
    })
    .collect();
  Ok(ParsedPlan { title: non_blank(wire.title), description: non_blank(wire.description), rounds })
}

fn non_blank(v: Option<String>) -> Option<String> {
  v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// "Round 2: Ancient Rome" -> "Ancient Rome". Names without the prefix are returned trimmed.
fn strip_round_number(name: &str) -> &str {
  let t = name.trim();
  let Some(rest) = t.strip_prefix("Round ").or_else(|| t.strip_prefix("round ")) else {
    return t;
  };
  let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
  if digits == 0 {
    return t;
  }
  match rest[digits..].trim_start().strip_prefix([':', '-', '.']) {
    Some(name) => name.trim(),
    None => t,
  }
}

/// Scores are expected in [0,1]; (1,100] is read as a percentage, the rest is clamped.
pub fn normalize_score(raw: f64) -> Result<f32, ParseError> {
  if !raw.is_finite() {
    return Err(ParseError::Shape(format!("non-finite quality score {}", raw)));
  }
  let s = if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw };
  Ok(s.clamp(0.0, 1.0) as f32)
}

/// Reorder per-question entries by their `question_index` when every entry carries one.
/// Indices may be 0-based or 1-based. Entries without indices keep response order.
pub fn order_by_index<T>(
  items: Vec<T>,
  index_of: impl Fn(&T) -> Option<usize>,
  expected: usize,
) -> Result<Vec<T>, OrderError> {
  if items.len() != expected {
    return Err(OrderError::CountMismatch { expected, got: items.len() });
  }
  let indices: Option<Vec<usize>> = items.iter().map(&index_of).collect();
  let Some(indices) = indices else {
    return Ok(items);
  };
  let one_based = !indices.is_empty() && !indices.contains(&0) && indices.iter().all(|&i| i <= expected);
  let mut slots: Vec<Option<T>> = (0..expected).map(|_| None).collect();
  for (item, raw) in items.into_iter().zip(indices) {
    let idx = if one_based { raw - 1 } else { raw };
    match slots.get_mut(idx) {
      Some(slot) if slot.is_none() => *slot = Some(item),
      _ => return Err(OrderError::BadIndex(raw)),
    }
  }
  Ok(slots.into_iter().flatten().collect())
}

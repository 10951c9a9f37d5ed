//! Domain models: generation request, candidates, stage outputs, accepted questions and the quiz itself.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Upper bound on questions per topic.
pub const MAX_QUESTIONS_PER_TOPIC: u32 = 50;
/// Upper bound on regeneration attempts.
pub const MAX_REGENERATIONS: u32 = 10;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  #[default]
  Medium,
  Hard,
}

impl Difficulty {
  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
    }
  }

  /// Guidance handed to the generator for this level.
  pub fn guidance(&self) -> &'static str {
    match self {
      Difficulty::Easy => "common knowledge, straightforward questions",
      Difficulty::Medium => "requires general knowledge or logical thinking",
      Difficulty::Hard => "challenging, requires specific knowledge or deep thinking",
    }
  }
}

impl fmt::Display for Difficulty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Rejected request shape. Raised before any model call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid quiz request: {0}")]
pub struct ConfigurationError(pub String);

/// Immutable input to one pipeline run.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct GenerationRequest {
  topics: Vec<String>,
  questions_per_topic: u32,
  difficulty: Difficulty,
  quality_threshold: f32,
  max_regenerations: u32,
}

impl GenerationRequest {
  /// Validate and build. Topics are trimmed; blank topics are dropped.
  pub fn new(
    topics: Vec<String>,
    questions_per_topic: u32,
    difficulty: Difficulty,
    quality_threshold: f32,
    max_regenerations: u32,
  ) -> Result<Self, ConfigurationError> {
    let topics: Vec<String> = topics
      .into_iter()
      .map(|t| t.trim().to_string())
      .filter(|t| !t.is_empty())
      .collect();
    if topics.is_empty() {
      return Err(ConfigurationError("at least one non-empty topic is required".into()));
    }
    let mut seen = HashSet::new();
    for t in &topics {
      if !seen.insert(t.to_lowercase()) {
        return Err(ConfigurationError(format!("duplicate topic '{}'", t)));
      }
    }
    if !(1..=MAX_QUESTIONS_PER_TOPIC).contains(&questions_per_topic) {
      return Err(ConfigurationError(format!(
        "questions_per_topic must be within 1..={}, got {}",
        MAX_QUESTIONS_PER_TOPIC, questions_per_topic
      )));
    }
    if !quality_threshold.is_finite() || !(0.0..=1.0).contains(&quality_threshold) {
      return Err(ConfigurationError(format!(
        "quality_threshold must be within 0.0..=1.0, got {}",
        quality_threshold
      )));
    }
    if max_regenerations > MAX_REGENERATIONS {
      return Err(ConfigurationError(format!(
        "max_regenerations must be at most {}, got {}",
        MAX_REGENERATIONS, max_regenerations
      )));
    }
    Ok(Self { topics, questions_per_topic, difficulty, quality_threshold, max_regenerations })
  }

  pub fn topics(&self) -> &[String] { &self.topics }
  pub fn questions_per_topic(&self) -> usize { self.questions_per_topic as usize }
  pub fn difficulty(&self) -> Difficulty { self.difficulty }
  pub fn quality_threshold(&self) -> f32 { self.quality_threshold }
  pub fn max_regenerations(&self) -> u32 { self.max_regenerations }
}

/// A generated, not yet accepted question.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Candidate {
  pub id: String,
  pub topic: String,
  pub difficulty: Difficulty,
  /// User prompt that produced this candidate.
  #[serde(skip)]
  pub prompt_text: String,
  pub question_text: String,
  pub options: Vec<String>,
  /// Option label ("A".."D") for multiple choice, free text otherwise.
  pub correct_answer: String,
  pub explanation: String,
  pub attempt_number: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
  #[default]
  Accept,
  Revise,
  Reject,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ReviewFeedback {
  pub candidate_ref: String,
  pub issues: Vec<String>,
  pub recommended_action: RecommendedAction,
  pub summary: String,
  pub criteria: ReviewScores,
}

/// Per-criterion reviewer scores in [0,1]. Diagnostic only, never used for acceptance.
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq)]
pub struct ReviewScores {
  pub clarity: Option<f32>,
  pub correctness: Option<f32>,
  pub distractors: Option<f32>,
  pub difficulty: Option<f32>,
  pub engagement: Option<f32>,
  pub overall: Option<f32>,
}

impl ReviewScores {
  /// Mean of the five criteria the reviewer actually scored.
  pub fn criteria_mean(&self) -> Option<f32> {
    let present: Vec<f32> = [self.clarity, self.correctness, self.distractors, self.difficulty, self.engagement]
      .into_iter()
      .flatten()
      .collect();
    if present.is_empty() {
      None
    } else {
      Some(present.iter().sum::<f32>() / present.len() as f32)
    }
  }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ValidationResult {
  pub candidate_ref: String,
  pub quality_score: f32,
  pub factual_issues: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AcceptedQuestion {
  pub topic: String,
  pub difficulty: Difficulty,
  pub final_question_text: String,
  pub options: Vec<String>,
  pub correct_answer: String,
  pub explanation: String,
  pub quality_score: f32,
  /// Controller attempt (0 = first generation) that produced this question.
  pub attempt_number: u32,
}

impl AcceptedQuestion {
  pub fn from_candidate(c: Candidate, quality_score: f32) -> Self {
    Self {
      topic: c.topic,
      difficulty: c.difficulty,
      final_question_text: c.question_text,
      options: c.options,
      correct_answer: c.correct_answer,
      explanation: c.explanation,
      quality_score,
      attempt_number: c.attempt_number,
    }
  }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct QuizRound {
  pub number: usize,
  pub name: String,
  pub topic: String,
  pub questions: Vec<AcceptedQuestion>,
}

/// Sole top-level artifact handed to rendering.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct QuizDocument {
  pub title: String,
  pub description: String,
  pub difficulty: Difficulty,
  pub rounds: Vec<QuizRound>,
}

impl QuizDocument {
  pub fn total_rounds(&self) -> usize { self.rounds.len() }

  pub fn total_questions(&self) -> usize {
    self.rounds.iter().map(|r| r.questions.len()).sum()
  }

  pub fn average_quality(&self) -> Option<f32> {
    let n = self.total_questions();
    if n == 0 { return None; }
    let sum: f32 = self.rounds.iter().flat_map(|r| &r.questions).map(|q| q.quality_score).sum();
    Some(sum / n as f32)
  }

  /// Questions-only projection: no answers, no explanations.
  pub fn questions_only(&self) -> QuestionSheet {
    QuestionSheet {
      title: self.title.clone(),
      description: self.description.clone(),
      rounds: self
        .rounds
        .iter()
        .map(|r| SheetRound {
          number: r.number,
          name: r.name.clone(),
          topic: r.topic.clone(),
          questions: r
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| SheetQuestion {
              index: i + 1,
              text: q.final_question_text.clone(),
              options: q.options.clone(),
            })
            .collect(),
        })
        .collect(),
    }
  }

  /// Answers-only projection, index-aligned with `questions_only`.
  pub fn answer_key(&self) -> AnswerKey {
    AnswerKey {
      title: format!("{} - Answer Key", self.title),
      entries: self
        .rounds
        .iter()
        .flat_map(|r| {
          r.questions.iter().enumerate().map(move |(i, q)| AnswerEntry {
            round: r.number,
            topic: r.topic.clone(),
            question_index: i + 1,
            correct_answer: q.correct_answer.clone(),
            answer_text: answer_text(q),
            explanation: q.explanation.clone(),
          })
        })
        .collect(),
    }
  }
}

/// Text of the correct option when `correct_answer` is an option label.
fn answer_text(q: &AcceptedQuestion) -> Option<String> {
  let label = q.correct_answer.trim();
  if label.len() != 1 { return None; }
  let idx = label.chars().next()?.to_ascii_uppercase() as usize;
  idx.checked_sub('A' as usize).and_then(|i| q.options.get(i)).cloned()
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct QuestionSheet {
  pub title: String,
  pub description: String,
  pub rounds: Vec<SheetRound>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SheetRound {
  pub number: usize,
  pub name: String,
  pub topic: String,
  pub questions: Vec<SheetQuestion>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SheetQuestion {
  pub index: usize,
  pub text: String,
  pub options: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AnswerKey {
  pub title: String,
  pub entries: Vec<AnswerEntry>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AnswerEntry {
  pub round: usize,
  pub topic: String,
  pub question_index: usize,
  pub correct_answer: String,
  pub answer_text: Option<String>,
  pub explanation: String,
}

/// How the rendering boundary lays out answers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
  Combined,
  #[default]
  Separate,
}

//! QuizAssembler: accepted questions per topic -> `QuizDocument`.
//!
//! Pure: no model calls, no clock, no randomness. Rounds follow the request's topic order.
//! Question texts must be unique across the whole quiz, not just within a round.

use std::collections::HashMap;

use crate::domain::{AcceptedQuestion, GenerationRequest, QuizDocument, QuizRound};
use crate::util::{join_human, normalize_question};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
  #[error("no accepted questions for topic '{0}'")]
  MissingTopic(String),

  #[error("topic '{topic}' has {got} accepted questions, expected {expected}")]
  WrongCount { topic: String, expected: usize, got: usize },

  #[error("question '{text}' in round '{topic}' already appears in round '{first_topic}'")]
  DuplicateAcrossRounds { first_topic: String, topic: String, text: String },
}

/// Title, description and round names chosen by the caller or the planner.
/// Blank values fall back to the derived defaults. `round_names` is keyed by topic.
#[derive(Debug, Clone, Default)]
pub struct QuizOverrides {
  pub title: Option<String>,
  pub description: Option<String>,
  pub round_names: HashMap<String, String>,
}

pub fn assemble(
  request: &GenerationRequest,
  per_topic: &HashMap<String, Vec<AcceptedQuestion>>,
  overrides: &QuizOverrides,
) -> Result<QuizDocument, AssemblyError> {
  let expected = request.questions_per_topic();
  let mut rounds = Vec::with_capacity(request.topics().len());
  let mut seen: HashMap<String, &str> = HashMap::new();

  for (i, topic) in request.topics().iter().enumerate() {
    let questions = per_topic.get(topic).ok_or_else(|| AssemblyError::MissingTopic(topic.clone()))?;
    if questions.len() != expected {
      return Err(AssemblyError::WrongCount { topic: topic.clone(), expected, got: questions.len() });
    }
    for q in questions {
      if let Some(first) = seen.insert(normalize_question(&q.final_question_text), topic.as_str()) {
        return Err(AssemblyError::DuplicateAcrossRounds {
          first_topic: first.to_string(),
          topic: topic.clone(),
          text: q.final_question_text.clone(),
        });
      }
    }
    let number = i + 1;
    let name = match overrides.round_names.get(topic).map(|n| n.trim()).filter(|n| !n.is_empty()) {
      Some(planned) => format!("Round {}: {}", number, planned),
      None => format!("Round {}: {}", number, topic),
    };
    rounds.push(QuizRound {
      number,
      name,
      topic: topic.clone(),
      questions: questions.clone(),
    });
  }

  Ok(QuizDocument {
    title: non_blank(&overrides.title).unwrap_or_else(|| default_title(request)),
    description: non_blank(&overrides.description).unwrap_or_else(|| default_description(request)),
    difficulty: request.difficulty(),
    rounds,
  })
}

fn non_blank(v: &Option<String>) -> Option<String> {
  v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn default_title(request: &GenerationRequest) -> String {
  format!("{} Quiz", join_human(request.topics()))
}

pub fn default_description(request: &GenerationRequest) -> String {
  let rounds = request.topics().len();
  format!(
    "A {} quiz with {} round{} of {} questions covering {}.",
    request.difficulty(),
    rounds,
    if rounds == 1 { "" } else { "s" },
    request.questions_per_topic(),
    join_human(request.topics())
  )
}

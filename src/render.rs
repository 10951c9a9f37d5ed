//! Markdown rendering of a finished quiz.
//!
//! `combined` mode gives one document with answers marked inline and an answer key at the end.
//! `separate` mode gives a questions-only sheet and a standalone answer key.

use std::fmt::Write as _;

use serde::Serialize;

use crate::domain::{AnswerKey, OutputMode, QuizDocument};
use crate::util::option_label;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
  /// Questions with answers inline (combined mode).
  Quiz,
  /// Questions only (separate mode).
  Questions,
  Answers,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RenderedDocument {
  pub kind: DocumentKind,
  pub content: String,
}

impl RenderedDocument {
  /// `<stem>_<run>.md` for the quiz/questions document, `<stem>_<run>_answers.md` for the key.
  pub fn file_name(&self, stem: &str, run_prefix: &str) -> String {
    match self.kind {
      DocumentKind::Answers => format!("{}_{}_answers.md", stem, run_prefix),
      _ => format!("{}_{}.md", stem, run_prefix),
    }
  }
}

pub fn render_markdown(doc: &QuizDocument, mode: OutputMode) -> Vec<RenderedDocument> {
  match mode {
    OutputMode::Combined => {
      let mut content = render_questions(doc, true);
      content.push_str("\n---\n\n");
      render_answer_section(&mut content, &doc.answer_key(), doc, 2);
      vec![RenderedDocument { kind: DocumentKind::Quiz, content }]
    }
    OutputMode::Separate => {
      let key = doc.answer_key();
      let mut answers = format!("# {}\n\n", key.title);
      render_answer_section(&mut answers, &key, doc, 2);
      vec![
        RenderedDocument { kind: DocumentKind::Questions, content: render_questions(doc, false) },
        RenderedDocument { kind: DocumentKind::Answers, content: answers },
      ]
    }
  }
}

fn capitalized(s: &str) -> String {
  let mut cs = s.chars();
  match cs.next() {
    Some(first) => first.to_uppercase().chain(cs).collect(),
    None => String::new(),
  }
}

fn render_questions(doc: &QuizDocument, with_answers: bool) -> String {
  let sheet = doc.questions_only();
  let mut out = String::new();
  let _ = writeln!(out, "# {}\n", sheet.title);
  if !sheet.description.is_empty() {
    let _ = writeln!(out, "_{}_\n", sheet.description);
  }
  let _ = writeln!(
    out,
    "**Total Rounds: {}** | **Total Questions: {}** | Difficulty: {}\n",
    doc.total_rounds(),
    doc.total_questions(),
    capitalized(doc.difficulty.as_str())
  );

  for (round, full) in sheet.rounds.iter().zip(&doc.rounds) {
    let _ = writeln!(out, "## {}\n", round.name);
    let _ = writeln!(out, "_Topic: {} | Questions: {}_\n", round.topic, round.questions.len());
    for (q, accepted) in round.questions.iter().zip(&full.questions) {
      let _ = writeln!(out, "**Q{}.** {}\n", q.index, q.text);
      for (i, option) in q.options.iter().enumerate() {
        let label = option_label(i);
        if with_answers && label.eq_ignore_ascii_case(accepted.correct_answer.trim()) {
          let _ = writeln!(out, "- **{}. {}** ✓", label, option);
        } else {
          let _ = writeln!(out, "- {}. {}", label, option);
        }
      }
      if with_answers {
        if q.options.is_empty() {
          let _ = writeln!(out, "\n> Answer: {}", accepted.correct_answer);
        }
        if !accepted.explanation.is_empty() {
          let _ = writeln!(out, "\n> _Explanation: {}_", accepted.explanation);
        }
      }
      out.push('\n');
    }
  }
  out
}

fn render_answer_section(out: &mut String, key: &AnswerKey, doc: &QuizDocument, level: usize) {
  let hashes = "#".repeat(level);
  let _ = writeln!(out, "{} Answer Key\n", hashes);
  for round in &doc.rounds {
    let _ = writeln!(out, "{}# {}\n", hashes, round.name);
    out.push_str("| Q# | Answer | Explanation |\n|---|---|---|\n");
    for e in key.entries.iter().filter(|e| e.round == round.number) {
      let answer = match &e.answer_text {
        Some(text) => format!("{} - {}", e.correct_answer, text),
        None => e.correct_answer.clone(),
      };
      let explanation = if e.explanation.is_empty() { "N/A" } else { e.explanation.as_str() };
      let _ = writeln!(out, "| {} | {} | {} |", e.question_index, cell(&answer), cell(explanation));
    }
    out.push('\n');
  }
}

/// Keep a value inside one Markdown table cell.
fn cell(s: &str) -> String {
  s.replace('|', "\\|").replace(['\n', '\r'], " ")
}

//! Public protocol structs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and clients independently.

use serde::{Deserialize, Serialize};

use crate::config::{PipelineConfig, RequestDefaults};
use crate::controller::TopicReport;
use crate::domain::{AnswerKey, Difficulty, OutputMode, QuestionSheet, QuizDocument};
use crate::render::RenderedDocument;

/// Quiz request. Omitted tunables fall back to the configured defaults.
#[derive(Debug, Deserialize)]
pub struct QuizIn {
    pub topics: Vec<String>,
    #[serde(default)]
    pub questions_per_topic: Option<u32>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub quality_threshold: Option<f32>,
    #[serde(default)]
    pub max_regenerations: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub output_mode: Option<OutputMode>,
    /// File stem; when set the rendered documents are written to the output directory.
    #[serde(default)]
    pub save_as: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuizOut {
    pub run_id: String,
    pub quiz: QuizDocument,
    /// Present in `separate` mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<QuestionSheet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_key: Option<AnswerKey>,
    pub documents: Vec<RenderedDocument>,
    pub reports: Vec<TopicReport>,
    pub saved_files: Vec<String>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub model_enabled: bool,
}

#[derive(Serialize)]
pub struct SettingsOut {
    pub model: Option<String>,
    pub pipeline: PipelineConfig,
    pub defaults: RequestDefaults,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reports: Option<Vec<TopicReport>>,
}

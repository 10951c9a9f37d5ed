//! Application state: prompts, pipeline settings, request defaults and the optional model.
//!
//! This module owns:
//!   - the prompts struct (from TOML or defaults)
//!   - the process-wide `PipelineConfig` (TOML + env overrides)
//!   - the model gate, so every request shares one rate-limit semaphore
//!
//! Without OPENAI_API_KEY the service still starts; quiz requests then answer 503.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::config::{load_agent_config_from_env, AgentConfig, PipelineConfig, Prompts, RequestDefaults};
use crate::controller::RegenerationController;
use crate::model::ModelClient;
use crate::openai::OpenAI;
use crate::stages::{ModelGate, QuizPlanner};

/// Slack on top of the pipeline timeout so the pipeline's own timeout fires first.
const TRANSPORT_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub prompts: Arc<Prompts>,
    pub pipeline: PipelineConfig,
    pub defaults: RequestDefaults,
    pub output_dir: PathBuf,
    gate: Option<ModelGate>,
}

impl AppState {
    /// Build state from env: load config, apply overrides, init OpenAI.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let mut cfg = load_agent_config_from_env().unwrap_or_default();
        cfg.apply_overrides(|k| std::env::var(k).ok());

        let output_dir = std::env::var("QUIZ_OUTPUT_DIR").unwrap_or_else(|_| "output".into());

        let openai = OpenAI::from_env(cfg.pipeline.call_timeout() + TRANSPORT_TIMEOUT_SLACK);
        let model: Option<Arc<dyn ModelClient>> = match openai {
            Some(oa) => {
                info!(target: "quizforge", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
                Some(Arc::new(oa))
            }
            None => {
                warn!(target: "quizforge", "OpenAI disabled (no OPENAI_API_KEY). Quiz generation is unavailable.");
                None
            }
        };

        Self::from_parts(model, cfg, output_dir.into())
    }

    pub fn from_parts(model: Option<Arc<dyn ModelClient>>, cfg: AgentConfig, output_dir: PathBuf) -> Self {
        let pipeline = cfg.pipeline.sanitized();
        info!(
            target: "quizforge",
            generation_temperature = pipeline.generation_temperature,
            review_temperature = pipeline.review_temperature,
            validation_temperature = pipeline.validation_temperature,
            parallelism = pipeline.parallelism,
            call_timeout_secs = pipeline.call_timeout_secs,
            plan_quiz = pipeline.plan_quiz,
            quality_threshold = cfg.defaults.quality_threshold,
            max_regenerations = cfg.defaults.max_regenerations,
            output_dir = %output_dir.display(),
            "Pipeline settings"
        );
        let gate = model.map(|m| ModelGate::new(m, pipeline.parallelism, pipeline.call_timeout()));
        Self {
            prompts: Arc::new(cfg.prompts),
            pipeline,
            defaults: cfg.defaults,
            output_dir,
            gate,
        }
    }

    pub fn model_enabled(&self) -> bool {
        self.gate.is_some()
    }

    pub fn model_name(&self) -> Option<String> {
        self.gate.as_ref().map(|g| g.model_name().to_string())
    }

    /// A controller over the shared gate, or None when no model is configured.
    pub fn controller(&self) -> Option<RegenerationController> {
        self.gate
            .as_ref()
            .map(|g| RegenerationController::new(g.clone(), self.prompts.clone(), &self.pipeline))
    }

    /// The quiz planner, unless planning is switched off or no model is configured.
    pub fn planner(&self) -> Option<QuizPlanner> {
        if !self.pipeline.plan_quiz {
            return None;
        }
        self.gate
            .as_ref()
            .map(|g| QuizPlanner::new(g.clone(), self.prompts.clone(), self.pipeline.generation_temperature))
    }
}

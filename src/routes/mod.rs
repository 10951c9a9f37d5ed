//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - API under `/api/v1/...`
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/settings", get(http::http_get_settings))
        .route("/api/v1/quiz", post(http::http_post_quiz))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::AgentConfig;
    use crate::model::testing::*;
    use crate::model::ModelClient;

    fn app(model: Option<ScriptedModel>, output_dir: PathBuf) -> Router {
        let model = model.map(|m| Arc::new(m) as Arc<dyn ModelClient>);
        build_router(Arc::new(AppState::from_parts(model, AgentConfig::default(), output_dir)))
    }

    fn app_with(model: Arc<ScriptedModel>, cfg: AgentConfig) -> Router {
        build_router(Arc::new(AppState::from_parts(Some(model as Arc<dyn ModelClient>), cfg, PathBuf::from("unused"))))
    }

    fn scripted_history() -> ScriptedModel {
        ScriptedModel::new()
            .route(GENERATOR, "History", vec![questions_json(&["Who built the pyramids?"])])
            .route(REVIEWER, "History", vec![reviews_json(1)])
            .route(VALIDATOR, "History", vec![validations_json(&[0.9])])
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_quiz(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/quiz")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_model_availability() {
        let req = Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap();
        let (status, json) = send(app(None, PathBuf::from("unused")), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert_eq!(json["model_enabled"], false);
    }

    #[tokio::test]
    async fn settings_expose_effective_defaults() {
        let req = Request::builder().uri("/api/v1/settings").body(Body::empty()).unwrap();
        let (status, json) = send(app(Some(ScriptedModel::new()), PathBuf::from("unused")), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["model"], "scripted");
        assert_eq!(json["defaults"]["max_regenerations"], 3);
        assert_eq!(json["defaults"]["difficulty"], "medium");
    }

    #[tokio::test]
    async fn invalid_request_is_400_even_without_model() {
        let (status, json) = send(app(None, PathBuf::from("unused")), post_quiz(r#"{"topics":["  "]}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("topic"));
    }

    #[tokio::test]
    async fn quiz_without_model_is_503() {
        let (status, _) = send(app(None, PathBuf::from("unused")), post_quiz(r#"{"topics":["History"]}"#)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn quiz_is_generated_and_rendered() {
        let body = r#"{"topics":["History"],"questions_per_topic":1,"max_regenerations":0,"title":"Pub Night"}"#;
        let (status, json) = send(app(Some(scripted_history()), PathBuf::from("unused")), post_quiz(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["quiz"]["title"], "Pub Night");
        assert_eq!(json["quiz"]["rounds"][0]["name"], "Round 1: History");
        assert_eq!(json["sheet"]["rounds"][0]["questions"][0]["text"], "Who built the pyramids?");
        assert_eq!(json["answer_key"]["entries"][0]["correct_answer"], "B");
        assert_eq!(json["documents"].as_array().unwrap().len(), 2);
        assert_eq!(json["reports"][0]["state"], "accepted");
        assert!(json["saved_files"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn plan_names_the_quiz_when_the_caller_does_not() {
        let plan = r#"{"title":"Time Travellers","description":"Back we go.","rounds":[{"topic":"History","round_name":"Ancient Wonders"}]}"#;
        let model = scripted_history().route(PLANNER, "History", vec![Ok(plan.into())]);
        let body = r#"{"topics":["History"],"questions_per_topic":1,"max_regenerations":0}"#;
        let (status, json) = send(app(Some(model), PathBuf::from("unused")), post_quiz(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["quiz"]["title"], "Time Travellers");
        assert_eq!(json["quiz"]["description"], "Back we go.");
        assert_eq!(json["quiz"]["rounds"][0]["name"], "Round 1: Ancient Wonders");
        assert_eq!(json["quiz"]["rounds"][0]["topic"], "History");
    }

    #[tokio::test]
    async fn planning_can_be_switched_off() {
        let plan = r#"{"title":"Time Travellers","rounds":[]}"#;
        let model = Arc::new(scripted_history().route(PLANNER, "", vec![Ok(plan.into())]));
        let mut cfg = AgentConfig::default();
        cfg.pipeline.plan_quiz = false;
        let body = r#"{"topics":["History"],"questions_per_topic":1,"max_regenerations":0}"#;
        let (status, json) = send(app_with(model.clone(), cfg), post_quiz(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["quiz"]["title"], "History Quiz");
        assert!(model.calls_matching(PLANNER).is_empty());
    }

    #[tokio::test]
    async fn same_question_in_two_rounds_is_422() {
        let france = "What is the capital of France?";
        let model = ScriptedModel::new()
            .route(GENERATOR, "Geography", vec![questions_json(&[france])])
            .route(GENERATOR, "Capitals", vec![questions_json(&["what is the capital of  France?"])])
            .route(REVIEWER, "", vec![reviews_json(1), reviews_json(1)])
            .route(VALIDATOR, "", vec![validations_json(&[0.9]), validations_json(&[0.9])]);
        let body = r#"{"topics":["Geography","Capitals"],"questions_per_topic":1,"max_regenerations":0}"#;
        let (status, json) = send(app(Some(model), PathBuf::from("unused")), post_quiz(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].as_str().unwrap().contains("already appears in round 'Geography'"));
    }

    #[tokio::test]
    async fn exhausted_topic_is_422_with_reports() {
        let model = ScriptedModel::new()
            .route(GENERATOR, "History", vec![questions_json(&["Who built the pyramids?"])])
            .route(REVIEWER, "History", vec![reviews_json(1)])
            .route(VALIDATOR, "History", vec![validations_json(&[0.3])]);
        let body = r#"{"topics":["History"],"questions_per_topic":1,"max_regenerations":0}"#;
        let (status, json) = send(app(Some(model), PathBuf::from("unused")), post_quiz(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["reports"][0]["state"], "exhausted");
        assert_eq!(json["reports"][0]["deficit"], 1);
        assert!(json.get("quiz").is_none());
    }

    #[tokio::test]
    async fn combined_quiz_is_saved_to_output_dir() {
        let dir = std::env::temp_dir().join(format!("quizforge-routes-{}", uuid::Uuid::new_v4()));
        let body = r#"{"topics":["History"],"questions_per_topic":1,"max_regenerations":0,"output_mode":"combined","save_as":"../night.md"}"#;
        let (status, json) = send(app(Some(scripted_history()), dir.clone()), post_quiz(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.get("sheet").is_none());
        let saved = json["saved_files"].as_array().unwrap();
        assert_eq!(saved.len(), 1);
        let path = PathBuf::from(saved[0].as_str().unwrap());
        assert_eq!(path.parent(), Some(dir.as_path()));
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("night_"));
        assert!(std::fs::read_to_string(&path).unwrap().contains("✓"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}

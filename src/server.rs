use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::EstimateError;
use crate::handlers::{PromptPlayground, StructuredEstimator};
use crate::models::{
    EstimateRequest, GenerateRequest, GenerateResponse, MealSummaryResponse, StructuredEstimate,
};
use crate::services::TextGenerator;

pub struct AppState {
    pub estimator: StructuredEstimator,
    pub playground: PromptPlayground,
}

impl AppState {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            estimator: StructuredEstimator::new(generator.clone()),
            playground: PromptPlayground::new(generator),
        }
    }
}

impl IntoResponse for EstimateError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn create_router(generator: Arc<dyn TextGenerator>) -> Router {
    let state = Arc::new(AppState::new(generator));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/structured-estimate", post(structured_estimate_handler))
        .route("/generate", post(generate_handler))
        .route("/meal-summary", post(meal_summary_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Parse a JSON body by hand so malformed input is a 400 with our error shape.
fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, EstimateError> {
    serde_json::from_str(body).map_err(|e| {
        log::warn!("⚠️ Rejecting request body: {}", e);
        EstimateError::InvalidRequest(format!("invalid request body: {}", e))
    })
}

fn log_failure(route: &str, err: &EstimateError) {
    if err.is_client_error() {
        log::warn!("⚠️ {} rejected: {}", route, err);
    } else {
        log::error!("❌ {} failed at {}: {}", route, err.stage(), err);
    }
}

async fn run_estimate(state: &AppState, body: &str) -> Result<StructuredEstimate, EstimateError> {
    let request: EstimateRequest = parse_body(body)?;
    log::info!("🍽️ Estimate requested: '{}'", request.text);
    state.estimator.estimate(&request.text).await
}

async fn run_generate(state: &AppState, body: &str) -> Result<GenerateResponse, EstimateError> {
    let request: GenerateRequest = parse_body(body)?;
    state
        .playground
        .generate(&request.prompt, request.preset.as_deref())
        .await
}

async fn run_meal_summary(
    state: &AppState,
    body: &str,
) -> Result<MealSummaryResponse, EstimateError> {
    let request: EstimateRequest = parse_body(body)?;
    state.playground.meal_summary(&request.text).await
}

async fn structured_estimate_handler(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Response {
    match run_estimate(&state, &body).await {
        Ok(estimate) => {
            log::info!(
                "✅ Estimate: {} kcal, {} items, confidence {:.2}",
                estimate.total_calories,
                estimate.items.len(),
                estimate.confidence
            );
            (StatusCode::OK, Json(estimate)).into_response()
        }
        Err(e) => {
            log_failure("/structured-estimate", &e);
            e.into_response()
        }
    }
}

async fn generate_handler(State(state): State<Arc<AppState>>, body: String) -> Response {
    match run_generate(&state, &body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            log_failure("/generate", &e);
            e.into_response()
        }
    }
}

async fn meal_summary_handler(State(state): State<Arc<AppState>>, body: String) -> Response {
    match run_meal_summary(&state, &body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            log_failure("/meal-summary", &e);
            e.into_response()
        }
    }
}

async fn root_handler() -> &'static str {
    "Calorie Estimate Service - POST /structured-estimate with {\"text\": \"...\"}"
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

//! HTTP API for training, valuation, and status.
//!
//! Thin axum layer over the registry and valuation service. Handlers do no
//! domain work of their own; they translate JSON in, dispatch blocking work
//! off the runtime, and map domain errors to status codes.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::registry::RegistryStatus;
use crate::service::{PredictionService, ValuationRequest, ValuationResponse};
use crate::training::TrainingSummary;

/// Shared state across handlers.
pub struct AppState {
    pub service: Arc<PredictionService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRequest {
    /// Train only roster members without a usable on-disk artifact.
    #[serde(default)]
    pub missing_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainResponse {
    pub success: bool,
    pub models: Vec<TrainingSummary>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    success: bool,
    error: String,
}

type ErrorReply = (StatusCode, Json<ApiError>);

fn error_reply(err: &Error) -> ErrorReply {
    let status = match err {
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::TrainingInProgress => StatusCode::CONFLICT,
        Error::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        Error::DatasetMissing { .. } | Error::EmptyDataset => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            success: false,
            error: err.to_string(),
        }),
    )
}

fn task_panicked(e: tokio::task::JoinError) -> ErrorReply {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            success: false,
            error: format!("background task failed: {e}"),
        }),
    )
}

/// Run a full or missing-only training pass. Training is CPU-bound, so it
/// runs on the blocking pool; a concurrent request gets 409.
async fn train_models(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TrainRequest>,
) -> std::result::Result<Json<TrainResponse>, ErrorReply> {
    let service = state.service.clone();
    let models = tokio::task::spawn_blocking(move || service.registry().train(request.missing_only))
        .await
        .map_err(task_panicked)?
        .map_err(|e| error_reply(&e))?;
    Ok(Json(TrainResponse {
        success: true,
        models,
    }))
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValuationRequest>,
) -> std::result::Result<Json<ValuationResponse>, ErrorReply> {
    let service = state.service.clone();
    let response = tokio::task::spawn_blocking(move || service.predict_price(&request))
        .await
        .map_err(task_panicked)?
        .map_err(|e| error_reply(&e))?;
    Ok(Json(response))
}

async fn model_status(State(state): State<Arc<AppState>>) -> Json<RegistryStatus> {
    Json(state.service.registry().status())
}

async fn health_check() -> &'static str {
    "OK"
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/ml/train", post(train_models))
        .route("/api/ml/predict", post(predict))
        .route("/api/ml/status", get(model_status))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("valuation API listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

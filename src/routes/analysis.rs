use axum::{
    extract::State,
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::{error::AppError, services::controller::StatusSnapshot, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/analysis", post(start_analysis))
        .route("/analysis/stop", post(stop_analysis))
        .route("/analysis/status", get(analysis_status))
        .route("/analysis/report", get(analysis_report))
        .route("/analysis/log", get(analysis_log))
        .route("/analysis/report/save", post(save_report))
        .route("/analysis/log/save", post(save_log))
        .layer(cors)
}

/// `top_n` and `chunk_size` are accepted as numbers or free text and validated server side.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    path: String,
    #[serde(default)]
    top_n: Option<Value>,
    #[serde(default)]
    chunk_size: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    utf8: bool,
}

#[derive(Debug, Serialize)]
pub struct SavedResponse {
    path: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    stop_requested: bool,
}

fn raw_input(value: Option<Value>, default: usize) -> String {
    match value {
        None | Some(Value::Null) => default.to_string(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

async fn start_analysis(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StatusSnapshot>), AppError> {
    tracing::info!("Start requested for {}", request.path);
    let config = state.controller.config();
    let top_n = raw_input(request.top_n, config.default_top_n);
    let chunk_size = raw_input(request.chunk_size, config.default_chunk_size);

    // The worker is detached; progress is observed through /analysis/status.
    let _handle = state
        .controller
        .start(PathBuf::from(request.path), &top_n, &chunk_size)?;

    Ok((StatusCode::ACCEPTED, Json(state.controller.status())))
}

async fn stop_analysis(State(state): State<Arc<AppState>>) -> Json<StopResponse> {
    Json(StopResponse {
        stop_requested: state.controller.stop(),
    })
}

async fn analysis_status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.controller.status())
}

async fn analysis_report(State(state): State<Arc<AppState>>) -> Result<String, AppError> {
    state
        .controller
        .report_text()
        .ok_or_else(|| AppError::NotFound("No report available yet".to_string()))
}

async fn analysis_log(State(state): State<Arc<AppState>>) -> String {
    state.controller.log_text()
}

async fn save_report(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SaveRequest>,
) -> Result<Json<SavedResponse>, AppError> {
    let path = request.path.map(PathBuf::from);
    let saved = state.controller.save_report(path.as_deref(), request.utf8)?;
    Ok(Json(SavedResponse {
        path: saved.display().to_string(),
    }))
}

async fn save_log(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SaveRequest>,
) -> Result<Json<SavedResponse>, AppError> {
    let path = request.path.map(PathBuf::from);
    let saved = state.controller.save_log(path.as_deref())?;
    Ok(Json(SavedResponse {
        path: saved.display().to_string(),
    }))
}

use axum::{extract::State, routing::get, Json, Router, response::Json as ResponseJson};
use crate::models::{AppState, HealthResponse, RemoteSourcesResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/sources/remote", get(remote_sources))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> ResponseJson<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        work_dir: state.config.storage.work_dir.display().to_string(),
    })
}

async fn remote_sources(State(state): State<AppState>) -> ResponseJson<RemoteSourcesResponse> {
    Json(RemoteSourcesResponse {
        base_url: state.config.remote.base_url.clone(),
        files: state.config.remote.files.clone(),
    })
}

//! 运行环境诊断 API
//!
//! GET /check-docker-environment

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::services::{docker, environment};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/check-docker-environment", get(check_docker_environment))
}

/// 容器、socket、挂载路径诊断
///
/// GET /check-docker-environment
async fn check_docker_environment(
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let availability = docker::availability(&state.config.docker, state.config.containerized);
    let cli_version = if state.config.docker.enabled {
        state.docker.version().await
    } else {
        None
    };

    let config = state.config.clone();
    let report = tokio::task::spawn_blocking(move || {
        environment::build_report(&config, availability, cli_version)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Environment check failed: {}", e)))?;

    tracing::info!(
        containerized = report.docker.containerized,
        docker_usable = report.docker.usable,
        mounted = report.mounted_paths.len(),
        "Environment checked"
    );

    Ok(Json(report))
}

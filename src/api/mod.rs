//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod deploy;
pub mod environment;
pub mod github;
pub mod health;
pub mod projects;
pub mod ui;

use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // UI
        .merge(ui::router())
        // Health & Status
        .merge(health::router())
        // Project discovery
        .merge(projects::router())
        // GitHub
        .merge(github::router())
        // Deploy & logs
        .merge(deploy::router())
        // Diagnostics
        .merge(environment::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

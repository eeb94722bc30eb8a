//! 部署管理 API
//!
//! 包含 /deploy, /deploy/:task_id/*, /deploys, /logs, /stream 端点

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::deploy::{DeployRequest, DeployTask, LogLine};
use crate::error::{ApiError, ApiResult};
use crate::services::deploy::{self, DeployPlan};
use crate::state::AppState;

/// 启动部署响应
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub task_id: String,
    pub project: String,
    pub repository: String,
    pub image: String,
    pub status: String,
    pub stream_url: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: String,
    pub cancelled: bool,
}

/// 任务列表查询参数
#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    /// 返回数量限制，默认 20
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct RecentResponse {
    pub tasks: Vec<DeployTask>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct PendingLogsResponse {
    pub logs: Vec<LogLine>,
}

/// 创建部署管理路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deploy", post(start_deploy))
        .route("/deploy/:task_id", get(get_task_status))
        .route("/deploy/:task_id/cancel", post(cancel_deploy))
        .route("/deploy/:task_id/stream", get(stream_task_logs))
        .route("/deploys", get(get_recent_tasks))
        .route("/logs", get(get_pending_logs))
        .route("/stream", get(stream_console))
}

/// 启动部署
///
/// POST /deploy
/// 校验在请求内完成，流水线在后台执行
async fn start_deploy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<impl IntoResponse> {
    let plan = DeployPlan::from_request(request, &state.config).map_err(ApiError::bad_request)?;
    let task_id = uuid::Uuid::new_v4().to_string();

    // 同一仓库同时只允许一个部署
    state
        .register_running_deploy(&plan.repository, &task_id)
        .await
        .map_err(|existing| {
            ApiError::conflict(format!(
                "A deploy to '{}' is already running (task {})",
                plan.repository, existing
            ))
        })?;

    let mut task = DeployTask::new(
        task_id.clone(),
        plan.project_name.clone(),
        plan.repository.clone(),
    );
    task.stages = deploy::initial_stages();
    state.task_store.create(task).await;

    // 先建通道，客户端拿到 stream_url 后即可订阅
    let _log_tx = state.log_hub.create(&task_id).await;

    tracing::info!(
        task_id = %task_id,
        project = %plan.project_name,
        repository = %plan.repository,
        image = %plan.versioned_image(),
        "Deploy started"
    );

    let response = DeployResponse {
        task_id: task_id.clone(),
        project: plan.project_name.clone(),
        repository: plan.repository.clone(),
        image: plan.versioned_image(),
        status: "running".to_string(),
        stream_url: format!("/deploy/{}/stream", task_id),
    };

    tokio::spawn(deploy::execute(state.clone(), task_id, plan));

    Ok(Json(response))
}

/// 获取任务状态
///
/// GET /deploy/:task_id
/// 运行中和已完成的任务都可以查到
async fn get_task_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state
        .task_store
        .get_any(&task_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Task '{}'", task_id)))?;

    Ok(Json(task))
}

/// 取消运行中的部署
///
/// POST /deploy/:task_id/cancel
async fn cancel_deploy(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if state.cancel_deploy(&task_id).await {
        tracing::info!(task_id = %task_id, "Deploy cancellation requested");
        return Ok(Json(CancelResponse {
            task_id,
            cancelled: true,
        }));
    }

    match state.task_store.get_any(&task_id).await {
        Some(task) => Err(ApiError::conflict(format!(
            "Task '{}' is not running ({})",
            task_id,
            task.status.as_str()
        ))),
        None => Err(ApiError::not_found(format!("Task '{}'", task_id))),
    }
}

/// 最近的任务
///
/// GET /deploys
async fn get_recent_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    let tasks = state.task_store.recent(query.limit).await;
    Json(RecentResponse {
        total: tasks.len(),
        tasks,
    })
}

/// 任务结束事件
fn complete_event(task: Option<&DeployTask>) -> Event {
    let payload = match task {
        Some(task) => serde_json::json!({
            "status": task.status.as_str(),
            "exit_code": task.exit_code,
        }),
        None => serde_json::json!({ "status": "unknown", "exit_code": null }),
    };
    Event::default().event("complete").data(payload.to_string())
}

fn log_event(line: &LogLine) -> Event {
    let json = serde_json::to_string(line).unwrap_or_default();
    Event::default().data(json)
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keepalive")
}

/// 任务日志流
///
/// GET /deploy/:task_id/stream
/// 已结束的任务立即返回 complete 事件
async fn stream_task_logs(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let rx = state.log_hub.subscribe(&task_id).await;
    if rx.is_none() && state.task_store.get_any(&task_id).await.is_none() {
        return Err(ApiError::not_found(format!("Task '{}'", task_id)));
    }

    let stream = async_stream::stream! {
        if let Some(mut rx) = rx {
            loop {
                match rx.recv().await {
                    Ok(line) => yield Ok(log_event(&line)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(task_id = %task_id, lagged = n, "Log subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }

        let task = state.task_store.get_any(&task_id).await;
        yield Ok(complete_event(task.as_ref()));
    };

    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

/// 取出控制台缓冲区
///
/// GET /logs
async fn get_pending_logs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(PendingLogsResponse {
        logs: state.log_hub.drain_pending().await,
    })
}

/// 控制台日志流（所有任务及扫描信息）
///
/// GET /stream
async fn stream_console(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.log_hub.subscribe_console();
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(line) => yield Ok(log_event(&line)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "Console subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}

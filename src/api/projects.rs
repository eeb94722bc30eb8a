//! 项目发现 API
//!
//! 包含 /get-projects, /scan-custom-folder, /browse-folders,
//! /get-available-drives, /test-project-detection 端点

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::domain::project::{FolderEntry, ProjectInfo, ProjectsResponse};
use crate::domain::{DetectionProbe, LogLine};
use crate::error::{ApiError, ApiResult};
use crate::services::{environment, scanner};
use crate::state::AppState;

/// 文件夹路径请求
#[derive(Debug, Default, Deserialize)]
pub struct FolderRequest {
    #[serde(default)]
    pub folder_path: String,
}

/// 文件夹浏览响应
#[derive(Debug, Serialize)]
pub struct BrowseResponse {
    pub path: String,
    pub entries: Vec<FolderEntry>,
}

#[derive(Debug, Serialize)]
pub struct DrivesResponse {
    pub drives: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    pub containerized: bool,
    pub current_working_dir: String,
    pub results: BTreeMap<String, DetectionProbe>,
}

/// 创建项目发现路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/get-projects", get(get_projects))
        .route("/scan-custom-folder", post(scan_custom_folder))
        .route("/browse-folders", post(browse_folders))
        .route("/get-available-drives", get(get_available_drives))
        .route("/test-project-detection", get(test_project_detection))
}

/// 在阻塞线程池中执行文件系统操作
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, scanner::ScanError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("Scan task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// 扫描工作区根目录和当前工作目录
///
/// GET /get-projects
async fn get_projects(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let mut roots = vec![state.config.workspace_root.clone()];
    if let Ok(cwd) = std::env::current_dir() {
        if !roots.contains(&cwd) {
            roots.push(cwd);
        }
    }

    let scanned: Vec<String> = roots.iter().map(|p| p.display().to_string()).collect();

    let projects = blocking(move || {
        let mut seen = HashSet::new();
        let mut projects: Vec<ProjectInfo> = Vec::new();
        for root in roots.iter().filter(|r| r.is_dir()) {
            for project in scanner::detect_projects(root)? {
                if seen.insert(project.path.clone()) {
                    projects.push(project);
                }
            }
        }
        scanner::sort_by_relevance(&mut projects);
        Ok(projects)
    })
    .await?;

    info!(count = projects.len(), "Projects scanned");
    state
        .log_hub
        .emit(LogLine::info(format!(
            "Total projects found: {}",
            projects.len()
        )))
        .await;

    Ok(Json(ProjectsResponse { projects, scanned }))
}

/// 扫描用户指定的目录
///
/// POST /scan-custom-folder
/// 容器内会把 Windows / 相对路径映射到工作区根目录
async fn scan_custom_folder(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FolderRequest>,
) -> ApiResult<impl IntoResponse> {
    let path = scanner::resolve_scan_path(
        &request.folder_path,
        state.config.containerized,
        &state.config.workspace_root,
    );

    info!(requested = %request.folder_path, resolved = %path.display(), "Scanning custom folder");
    state
        .log_hub
        .emit(LogLine::info(format!("Scanning {}", path.display())))
        .await;

    let scanned = vec![path.display().to_string()];
    let projects = blocking(move || {
        let mut projects = scanner::detect_projects(&path)?;
        scanner::sort_by_relevance(&mut projects);
        Ok(projects)
    })
    .await?;

    Ok(Json(ProjectsResponse { projects, scanned }))
}

/// 列出目录内容
///
/// POST /browse-folders
async fn browse_folders(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FolderRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.folder_path.trim().is_empty() {
        return Err(ApiError::bad_request("No folder path provided"));
    }

    let path = scanner::resolve_scan_path(
        &request.folder_path,
        state.config.containerized,
        &state.config.workspace_root,
    );
    let display = path.display().to_string();
    let entries = blocking(move || scanner::list_entries(&path)).await?;

    Ok(Json(BrowseResponse {
        path: display,
        entries,
    }))
}

/// 文件夹浏览器的起始位置
///
/// GET /get-available-drives
async fn get_available_drives(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(DrivesResponse {
        drives: available_drives(
            state.config.custom_drives.as_deref(),
            &state.config.workspace_root,
        ),
    })
}

fn available_drives(custom: Option<&[String]>, workspace_root: &std::path::Path) -> Vec<String> {
    if let Some(custom) = custom {
        return custom.to_vec();
    }

    let mut drives: Vec<String> = ["/", "/home", "/mnt", "/opt"]
        .iter()
        .map(|d| d.to_string())
        .collect();
    let workspace = workspace_root.display().to_string();
    if !drives.contains(&workspace) {
        drives.push(workspace);
    }
    drives
}

/// 对每个诊断路径执行项目检测
///
/// GET /test-project-detection
async fn test_project_detection(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let paths: Vec<PathBuf> = state.config.test_paths.clone();
    let results = tokio::task::spawn_blocking(move || environment::test_detection(&paths))
        .await
        .map_err(|e| ApiError::internal(format!("Detection task failed: {}", e)))?;

    Ok(Json(DetectionResponse {
        containerized: state.config.containerized,
        current_working_dir: std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        results,
    }))
}

//! 运行环境诊断模型

use serde::Serialize;
use std::collections::BTreeMap;

/// 单个路径的探测结果
#[derive(Clone, Debug, Serialize)]
pub struct PathProbe {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_dir: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample_items: Vec<String>,
    /// 有内容即视为已挂载
    pub is_mounted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Docker 可用性
#[derive(Clone, Debug, Serialize)]
pub struct DockerAvailability {
    pub usable: bool,
    pub containerized: bool,
    pub enabled: bool,
    pub socket: String,
    pub socket_present: bool,
    pub reason: String,
}

/// 系统信息
#[derive(Clone, Debug, Serialize)]
pub struct SystemSummary {
    pub platform: &'static str,
    pub arch: &'static str,
    pub hostname: String,
    pub current_working_dir: String,
    pub workspace_root: String,
    pub user: String,
    pub home: String,
}

/// GET /check-docker-environment 响应
#[derive(Debug, Serialize)]
pub struct EnvironmentReport {
    pub system_info: SystemSummary,
    pub docker: DockerAvailability,
    /// docker CLI 版本输出（失败时为 None）
    pub docker_cli_version: Option<String>,
    pub path_info: BTreeMap<String, PathProbe>,
    pub mounted_paths: Vec<String>,
    pub recommendation: String,
    pub environment_vars: BTreeMap<String, String>,
}

/// GET /test-project-detection 中单个路径的结果
#[derive(Debug, Serialize)]
pub struct DetectionProbe {
    pub exists: bool,
    pub item_count: usize,
    pub projects_found: usize,
    pub projects: Vec<crate::domain::project::ProjectInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

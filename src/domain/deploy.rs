//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 部署任务状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Running,
    Success,
    Failed,
}

impl DeployStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Running => "running",
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
        }
    }
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// 部署阶段信息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployStage {
    /// 阶段标识 (e.g., "git_push", "docker_build", "docker_push")
    pub name: String,
    /// 显示名称 (e.g., "Git Push", "Docker Build")
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    /// 附加信息
    pub message: Option<String>,
}

impl DeployStage {
    /// 创建新的待执行阶段
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, success: bool, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 跳过阶段
    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }

    /// 是否尚未结束
    pub fn is_open(&self) -> bool {
        matches!(self.status, StageStatus::Pending | StageStatus::Running)
    }
}

/// 部署任务信息
#[derive(Clone, Debug, Serialize)]
pub struct DeployTask {
    pub id: String,
    /// 项目名称
    pub project: String,
    /// 目标仓库 owner/name
    pub repository: String,
    pub status: DeployStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// 推送的镜像（含 tag）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// 部署阶段详情
    #[serde(default)]
    pub stages: Vec<DeployStage>,
}

impl DeployTask {
    /// 创建新任务
    pub fn new(id: String, project: String, repository: String) -> Self {
        Self {
            id,
            project,
            repository,
            status: DeployStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            image: None,
            stages: Vec::new(),
        }
    }
}

/// 部署请求
///
/// 字段名与前端表单保持一致
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub project_path: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub github_username: String,
    #[serde(default)]
    pub github_token: String,
    /// owner/name
    #[serde(default)]
    pub selected_repository: String,
    pub version: Option<String>,
    pub semantic_version: Option<String>,
    /// 提交说明，追加到 commit message
    pub version_note: Option<String>,
}

impl DeployRequest {
    /// 返回缺失的必填字段
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let required = [
            ("project_name", &self.project_name),
            ("github_username", &self.github_username),
            ("github_token", &self.github_token),
            ("selected_repository", &self.selected_repository),
        ];
        required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect()
    }

    /// 仓库标识是否为 owner/name 格式
    pub fn repository_is_well_formed(&self) -> bool {
        split_repository(&self.selected_repository).is_some()
    }
}

/// 拆分 `owner/name`，格式不合法时返回 None
pub fn split_repository(repository: &str) -> Option<(&str, &str)> {
    let mut parts = repository.trim().split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if is_name_segment(owner) && is_name_segment(name) => {
            Some((owner, name))
        }
        _ => None,
    }
}

/// GitHub owner / 仓库名允许的字符：字母数字和 `.` `_` `-`，且不能是 `.` / `..`
fn is_name_segment(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// 日志行
#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: String, // stdout | stderr | info
    pub content: String,
}

impl LogLine {
    /// 创建新日志行
    pub fn new(stream: &str, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: stream.to_string(),
            content: content.into(),
        }
    }

    /// 工具自身的进度信息
    pub fn info(content: impl Into<String>) -> Self {
        Self::new("info", content)
    }
}

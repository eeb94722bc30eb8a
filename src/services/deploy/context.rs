//! 部署上下文
//!
//! 统一的部署执行上下文，包含任务信息、日志通道等

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::domain::deploy::{DeployStage, DeployStatus, LogLine, StageStatus};
use crate::infra::command::redact;
use crate::state::AppState;

/// 部署执行上下文
#[derive(Clone)]
pub struct DeployContext {
    /// 任务 ID
    pub task_id: String,
    /// 项目名称
    pub project: String,
    /// 目标仓库 owner/name
    pub repository: String,
    /// 应用状态
    pub state: Arc<AppState>,
    /// 任务日志通道
    pub log_tx: broadcast::Sender<LogLine>,
    /// 取消令牌
    pub cancel_token: CancellationToken,
    /// 需要从日志中隐去的凭据
    secret: String,
}

impl DeployContext {
    pub fn new(
        task_id: String,
        project: String,
        repository: String,
        state: Arc<AppState>,
        log_tx: broadcast::Sender<LogLine>,
        cancel_token: CancellationToken,
        secret: String,
    ) -> Self {
        Self {
            task_id,
            project,
            repository,
            state,
            log_tx,
            cancel_token,
            secret,
        }
    }

    /// 发送日志（凭据替换为 ***）
    pub fn log(&self, stream: &str, content: &str) {
        let content = redact(content, &self.secret);
        tracing::debug!(task_id = %self.task_id, stream = stream, "{}", content);
        let _ = self.log_tx.send(LogLine::new(stream, content));
    }

    /// 工具自身的进度信息
    pub fn log_info(&self, content: &str) {
        self.log("info", content);
    }

    pub fn log_stderr(&self, content: &str) {
        self.log("stderr", content);
    }

    /// 多行输出逐行发送
    pub fn log_output(&self, stream: &str, bytes: &[u8]) {
        for line in String::from_utf8_lossy(bytes).lines() {
            if !line.trim().is_empty() {
                self.log(stream, line);
            }
        }
    }

    /// 更新任务阶段
    pub async fn update_stages(&self, stages: &[DeployStage]) {
        self.state
            .task_store
            .update_stages(&self.task_id, stages.to_vec())
            .await;
    }

    /// 打印阶段汇总
    pub fn log_summary(&self, stages: &[DeployStage]) {
        self.log_info("=== Stage Summary ===");
        for stage in stages {
            let duration = stage
                .duration_ms
                .map(|d| format!("{}ms", d))
                .unwrap_or_else(|| "-".to_string());
            let status_icon = match stage.status {
                StageStatus::Success => "✓",
                StageStatus::Failed => "✗",
                StageStatus::Skipped => "⊘",
                StageStatus::Running => "⟳",
                StageStatus::Pending => "○",
            };
            let message = stage
                .message
                .as_deref()
                .map(|m| format!(" - {}", m))
                .unwrap_or_default();
            self.log_info(&format!(
                "{} {} ({}){}",
                status_icon, stage.display_name, duration, message
            ));
        }
    }

    /// 完成任务
    pub async fn finish(&self, status: DeployStatus, exit_code: Option<i32>, stages: Vec<DeployStage>) {
        self.log_summary(&stages);
        self.log_info(&format!(
            "=== Deploy {} (exit code {}) ===",
            status.as_str(),
            exit_code.unwrap_or(-1)
        ));

        self.update_stages(&stages).await;

        self.state
            .task_store
            .finish(&self.task_id, status.clone(), exit_code)
            .await;

        // 标记日志通道完成
        self.state.log_hub.finish(&self.task_id).await;

        // 取消注册运行中的部署
        self.state.unregister_running_deploy(&self.repository).await;

        tracing::info!(
            task_id = %self.task_id,
            project = %self.project,
            repository = %self.repository,
            status = status.as_str(),
            exit_code = ?exit_code,
            "Deploy finished"
        );
    }

    /// 检查是否被取消
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

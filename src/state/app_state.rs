//! 应用状态

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::env::EnvConfig;
use crate::infra::github::{GitHubClient, GitHubError};
use crate::services::docker::DockerCli;

use super::log_hub::LogHub;
use super::task_store::TaskStore;

/// 运行中的部署信息
pub struct RunningDeploy {
    pub task_id: String,
    pub cancel_token: CancellationToken,
}

/// 应用状态
pub struct AppState {
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    /// GitHub 客户端
    pub github: GitHubClient,
    /// docker CLI
    pub docker: DockerCli,

    /// 任务存储
    pub task_store: TaskStore,
    /// 日志中心
    pub log_hub: LogHub,
    /// 每个目标仓库当前运行中的部署 (小写 owner/name -> RunningDeploy)
    pub running_deploys: RwLock<HashMap<String, RunningDeploy>>,

    /// 关闭信号，后台任务监听
    pub shutdown: CancellationToken,
}

impl AppState {
    /// 使用给定配置创建
    pub fn with_config(config: EnvConfig) -> Result<Self, GitHubError> {
        tracing::info!(
            port = config.port,
            workspace_root = %config.workspace_root.display(),
            containerized = config.containerized,
            docker_enabled = config.docker.enabled,
            registry = %config.docker.registry,
            github_api = %config.github.api_url,
            "Loaded configuration"
        );

        Ok(Self {
            github: GitHubClient::new(config.github.api_url.clone())?,
            docker: DockerCli::from_config(&config.docker),
            started_at: Utc::now(),
            task_store: TaskStore::new(),
            log_hub: LogHub::new(),
            running_deploys: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            config,
        })
    }

    /// 注册运行中的部署
    ///
    /// 该仓库已有部署在运行时返回 `Err(正在运行的 task_id)`
    pub async fn register_running_deploy(
        &self,
        repository: &str,
        task_id: &str,
    ) -> Result<CancellationToken, String> {
        let key = repository_key(repository);
        let mut running = self.running_deploys.write().await;
        if let Some(existing) = running.get(&key) {
            return Err(existing.task_id.clone());
        }

        let cancel_token = self.shutdown.child_token();
        running.insert(
            key,
            RunningDeploy {
                task_id: task_id.to_string(),
                cancel_token: cancel_token.clone(),
            },
        );
        Ok(cancel_token)
    }

    /// 取消注册运行中的部署
    pub async fn unregister_running_deploy(&self, repository: &str) {
        let mut running = self.running_deploys.write().await;
        running.remove(&repository_key(repository));
    }

    /// 仓库当前部署的取消令牌
    pub async fn running_cancel_token(&self, repository: &str) -> Option<CancellationToken> {
        let running = self.running_deploys.read().await;
        running
            .get(&repository_key(repository))
            .map(|d| d.cancel_token.clone())
    }

    /// 按任务 ID 取消部署
    pub async fn cancel_deploy(&self, task_id: &str) -> bool {
        let running = self.running_deploys.read().await;
        match running.values().find(|d| d.task_id == task_id) {
            Some(deploy) => {
                deploy.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    /// 运行中的目标仓库
    pub async fn running_repositories(&self) -> Vec<String> {
        let running = self.running_deploys.read().await;
        running.keys().cloned().collect()
    }
}

/// GitHub 的 owner/name 不区分大小写
fn repository_key(repository: &str) -> String {
    repository.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_running_deploy_per_repository() {
        let state = AppState::with_config(EnvConfig::default()).unwrap();

        let token = state
            .register_running_deploy("octo/demo", "task-1")
            .await
            .unwrap();
        assert_eq!(
            state.register_running_deploy("octo/demo", "task-2").await.err(),
            Some("task-1".to_string())
        );
        assert!(state.register_running_deploy("octo/other", "task-3").await.is_ok());

        assert!(state.cancel_deploy("task-1").await);
        assert!(token.is_cancelled());
        assert!(!state.cancel_deploy("unknown").await);

        state.unregister_running_deploy("octo/demo").await;
        assert!(state.register_running_deploy("octo/demo", "task-4").await.is_ok());
    }

    #[tokio::test]
    async fn test_repository_guard_ignores_case() {
        let state = AppState::with_config(EnvConfig::default()).unwrap();

        state
            .register_running_deploy("octo/demo", "task-1")
            .await
            .unwrap();
        assert_eq!(
            state.register_running_deploy("Octo/Demo", "task-2").await.err(),
            Some("task-1".to_string())
        );
        assert!(state.running_cancel_token("OCTO/demo").await.is_some());

        state.unregister_running_deploy("Octo/DEMO").await;
        assert!(state.running_repositories().await.is_empty());
    }
}

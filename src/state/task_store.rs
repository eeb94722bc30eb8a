//! 任务存储
//!
//! 管理活跃任务和历史记录，自动清理过期任务

use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::config::env::constants::MAX_TASK_HISTORY;
use crate::domain::deploy::{DeployStage, DeployStatus, DeployTask};

/// 任务存储
pub struct TaskStore {
    /// 活跃任务
    tasks: RwLock<HashMap<String, DeployTask>>,
    /// 历史记录（最新在前）
    history: RwLock<VecDeque<DeployTask>>,
    /// 最大历史记录数
    max_history: usize,
    /// 任务保留时间
    retention: Duration,
}

impl TaskStore {
    /// 创建新的任务存储
    pub fn new() -> Self {
        Self::with_config(MAX_TASK_HISTORY, 24)
    }

    /// 使用自定义配置创建
    pub fn with_config(max_history: usize, retention_hours: i64) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            max_history,
            retention: Duration::hours(retention_hours),
        }
    }

    /// 创建新任务
    pub async fn create(&self, task: DeployTask) -> String {
        let task_id = task.id.clone();
        let mut tasks = self.tasks.write().await;
        tasks.insert(task_id.clone(), task);
        task_id
    }

    /// 获取活跃任务
    pub async fn get(&self, task_id: &str) -> Option<DeployTask> {
        let tasks = self.tasks.read().await;
        tasks.get(task_id).cloned()
    }

    /// 获取任务（优先活跃任务，然后查历史记录）
    pub async fn get_any(&self, task_id: &str) -> Option<DeployTask> {
        if let Some(task) = self.get(task_id).await {
            return Some(task);
        }
        let history = self.history.read().await;
        history.iter().find(|t| t.id == task_id).cloned()
    }

    /// 更新任务阶段
    pub async fn update_stages(&self, task_id: &str, stages: Vec<DeployStage>) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.stages = stages;
        }
    }

    /// 记录推送的镜像
    pub async fn set_image(&self, task_id: &str, image: &str) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.image = Some(image.to_string());
        }
    }

    /// 完成任务并移到历史记录
    pub async fn finish(&self, task_id: &str, status: DeployStatus, exit_code: Option<i32>) {
        let task = {
            let mut tasks = self.tasks.write().await;
            tasks.remove(task_id).map(|mut task| {
                task.status = status;
                task.exit_code = exit_code;
                task.finished_at = Some(Utc::now());
                task
            })
        };

        if let Some(task) = task {
            self.add_to_history(task).await;
        }
    }

    /// 添加任务到历史记录
    pub async fn add_to_history(&self, task: DeployTask) {
        let mut history = self.history.write().await;
        history.push_front(task);

        while history.len() > self.max_history {
            history.pop_back();
        }
    }

    /// 最近的任务（运行中的在前）
    pub async fn recent(&self, limit: usize) -> Vec<DeployTask> {
        let mut running: Vec<DeployTask> = self.tasks.read().await.values().cloned().collect();
        running.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let history = self.history.read().await;
        running
            .into_iter()
            .chain(history.iter().cloned())
            .take(limit)
            .collect()
    }

    /// 获取历史记录总数
    pub async fn history_count(&self) -> usize {
        let history = self.history.read().await;
        history.len()
    }

    /// 清理过期任务
    ///
    /// 移除超过保留时间的已完成任务
    pub async fn cleanup_stale(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let mut history = self.history.write().await;
        let before = history.len();
        history.retain(|task| task.finished_at.map_or(true, |t| t > cutoff));
        before - history.len()
    }

    /// 获取活跃任务数量
    pub async fn active_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        tasks.len()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> DeployTask {
        DeployTask::new(id.to_string(), "demo".to_string(), "octo/demo".to_string())
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let store = TaskStore::new();
        store.create(task("task-1")).await;

        let found = store.get("task-1").await;
        assert!(found.is_some());
        assert_eq!(found.unwrap().repository, "octo/demo");

        store.set_image("task-1", "ghcr.io/octo/demo:v1").await;
        store.finish("task-1", DeployStatus::Success, Some(0)).await;

        // 任务从活跃列表移除，但仍可查询
        assert!(store.get("task-1").await.is_none());
        let finished = store.get_any("task-1").await.unwrap();
        assert_eq!(finished.status, DeployStatus::Success);
        assert_eq!(finished.exit_code, Some(0));
        assert_eq!(finished.image.as_deref(), Some("ghcr.io/octo/demo:v1"));
        assert!(finished.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_history_limit() {
        let store = TaskStore::with_config(5, 24);

        for i in 0..10 {
            let mut t = task(&format!("task-{}", i));
            t.status = DeployStatus::Success;
            t.finished_at = Some(Utc::now());
            store.add_to_history(t).await;
        }

        assert_eq!(store.history_count().await, 5);
        // 最新的在前
        let recent = store.recent(2).await;
        assert_eq!(recent[0].id, "task-9");
    }

    #[tokio::test]
    async fn test_cleanup_stale() {
        let store = TaskStore::with_config(10, 1);

        let mut old = task("old");
        old.finished_at = Some(Utc::now() - Duration::hours(2));
        store.add_to_history(old).await;

        let mut fresh = task("fresh");
        fresh.finished_at = Some(Utc::now());
        store.add_to_history(fresh).await;

        assert_eq!(store.cleanup_stale().await, 1);
        assert!(store.get_any("old").await.is_none());
        assert!(store.get_any("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_recent_lists_running_first() {
        let store = TaskStore::new();
        let mut done = task("done");
        done.finished_at = Some(Utc::now());
        store.add_to_history(done).await;
        store.create(task("running")).await;

        let recent = store.recent(10).await;
        let ids: Vec<&str> = recent.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["running", "done"]);
    }
}

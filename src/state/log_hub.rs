//! 日志通道管理
//!
//! 管理控制台广播、待拉取缓冲和任务日志通道，支持 SSE 订阅和自动清理

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::config::env::constants::MAX_PENDING_LOG_LINES;
use crate::domain::deploy::LogLine;

/// 日志通道容量
const LOG_CHANNEL_CAPACITY: usize = 1024;

/// 任务日志通道
struct LogChannel {
    /// 广播发送者，完成后置为 None
    sender: Option<broadcast::Sender<LogLine>>,
    /// 创建时间
    created_at: DateTime<Utc>,
    /// 是否已完成
    finished: bool,
}

/// 控制台输出：广播 + 待拉取缓冲
#[derive(Clone)]
struct Console {
    sender: broadcast::Sender<LogLine>,
    pending: Arc<Mutex<VecDeque<LogLine>>>,
    max_pending: usize,
}

impl Console {
    async fn relay(&self, line: LogLine) {
        {
            let mut pending = self.pending.lock().await;
            pending.push_back(line.clone());
            while pending.len() > self.max_pending {
                pending.pop_front();
            }
        }
        // 没有订阅者时发送失败，忽略
        let _ = self.sender.send(line);
    }
}

/// 日志中心
///
/// 所有任务日志都会转发到控制台，`/stream` 与 `/logs` 读取控制台
pub struct LogHub {
    /// 通道映射 (task_id -> LogChannel)
    channels: RwLock<HashMap<String, LogChannel>>,
    console: Console,
}

impl LogHub {
    /// 创建新的日志中心
    pub fn new() -> Self {
        Self::with_pending_limit(MAX_PENDING_LOG_LINES)
    }

    /// 指定待拉取缓冲上限
    pub fn with_pending_limit(max_pending: usize) -> Self {
        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self {
            channels: RwLock::new(HashMap::new()),
            console: Console {
                sender,
                pending: Arc::new(Mutex::new(VecDeque::new())),
                max_pending,
            },
        }
    }

    /// 创建新的任务日志通道
    ///
    /// 如果通道已存在，返回现有的发送者。
    /// 每个通道有一个转发任务，把日志镜像到控制台。
    pub async fn create(&self, task_id: &str) -> broadcast::Sender<LogLine> {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(task_id).and_then(|c| c.sender.clone()) {
            return sender;
        }

        let (sender, mut rx) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        channels.insert(
            task_id.to_string(),
            LogChannel {
                sender: Some(sender.clone()),
                created_at: Utc::now(),
                finished: false,
            },
        );

        let console = self.console.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(line) => console.relay(line).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(task_id = %task_id, lagged = n, "Console forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        sender
    }

    /// 订阅任务日志通道
    ///
    /// 通道不存在或已完成时返回 None
    pub async fn subscribe(&self, task_id: &str) -> Option<broadcast::Receiver<LogLine>> {
        let channels = self.channels.read().await;
        channels
            .get(task_id)
            .and_then(|c| c.sender.as_ref())
            .map(|s| s.subscribe())
    }

    /// 标记通道完成
    ///
    /// 释放中心持有的发送者；其余发送者全部释放后，订阅者收到 Closed
    pub async fn finish(&self, task_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(task_id) {
            channel.finished = true;
            channel.sender = None;
        }
    }

    /// 清理已完成的通道
    pub async fn cleanup(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, channel| !channel.finished);
        before - channels.len()
    }

    /// 清理超过指定时长仍未完成的通道
    pub async fn cleanup_expired(&self, max_age_hours: i64) -> usize {
        let now = Utc::now();
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, channel| (now - channel.created_at).num_hours() < max_age_hours);
        before - channels.len()
    }

    /// 获取通道数量
    pub async fn count(&self) -> usize {
        let channels = self.channels.read().await;
        channels.len()
    }

    /// 获取活跃通道数量（未完成）
    pub async fn active_count(&self) -> usize {
        let channels = self.channels.read().await;
        channels.values().filter(|c| !c.finished).count()
    }

    /// 发送一条不属于任何任务的日志到控制台
    pub async fn emit(&self, line: LogLine) {
        self.console.relay(line).await;
    }

    /// 订阅控制台
    pub fn subscribe_console(&self) -> broadcast::Receiver<LogLine> {
        self.console.sender.subscribe()
    }

    /// 取出所有待拉取的控制台日志
    pub async fn drain_pending(&self) -> Vec<LogLine> {
        let mut pending = self.console.pending.lock().await;
        pending.drain(..).collect()
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_create_and_subscribe() {
        let hub = LogHub::new();

        let sender = hub.create("task-1").await;
        assert_eq!(hub.count().await, 1);

        let mut receiver = hub.subscribe("task-1").await.unwrap();
        let _ = sender.send(LogLine::new("stdout", "Hello"));

        let line = receiver.recv().await.unwrap();
        assert_eq!(line.content, "Hello");
    }

    #[tokio::test]
    async fn test_task_lines_reach_console() {
        let hub = LogHub::new();
        let mut console = hub.subscribe_console();

        let sender = hub.create("task-1").await;
        let _ = sender.send(LogLine::info("Building"));

        let line = tokio::time::timeout(Duration::from_secs(2), console.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.content, "Building");

        let pending = hub.drain_pending().await;
        assert_eq!(pending.len(), 1);
        assert!(hub.drain_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_finish_closes_subscribers() {
        let hub = LogHub::new();

        let sender = hub.create("task-1").await;
        let mut receiver = hub.subscribe("task-1").await.unwrap();
        assert_eq!(hub.active_count().await, 1);

        hub.finish("task-1").await;
        drop(sender);

        assert_eq!(hub.active_count().await, 0);
        assert!(hub.subscribe("task-1").await.is_none());
        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_running_channels() {
        let hub = LogHub::new();

        hub.create("task-1").await;
        hub.create("task-2").await;
        hub.finish("task-1").await;

        assert_eq!(hub.cleanup().await, 1);
        assert!(hub.subscribe("task-1").await.is_none());
        assert!(hub.subscribe("task-2").await.is_some());
        assert_eq!(hub.count().await, 1);
    }

    #[tokio::test]
    async fn test_pending_buffer_is_bounded() {
        let hub = LogHub::with_pending_limit(2);
        for i in 0..3 {
            hub.emit(LogLine::info(format!("line {}", i))).await;
        }

        let pending = hub.drain_pending().await;
        let contents: Vec<&str> = pending.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["line 1", "line 2"]);
    }
}

//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 实时日志流式输出
//! - 超时控制
//! - 取消支持
//! - 通过 stdin 传递凭据

use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::domain::deploy::LogLine;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// 命令启动失败
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// 命令超时
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
    /// 命令被取消
    #[error("Command was cancelled")]
    Cancelled,
    /// 等待命令完成失败
    #[error("Failed to wait for command: {0}")]
    WaitFailed(#[source] std::io::Error),
}

/// 命令执行结果
#[derive(Debug)]
pub struct CommandResult {
    /// 退出状态
    pub status: ExitStatus,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// 退出码，被信号终止时为 -1
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

impl CommandRunner {
    /// 执行命令并流式输出日志
    ///
    /// stdout/stderr 的每一行都作为 `LogLine` 发送到 `log_tx`。
    /// 超时和取消都会杀死子进程。
    pub async fn run_with_streaming(
        program: impl AsRef<OsStr>,
        args: &[&str],
        work_dir: &Path,
        log_tx: broadcast::Sender<LogLine>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        let program = program.as_ref();
        let mut child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::SpawnFailed {
                program: program.to_string_lossy().to_string(),
                source,
            })?;

        let stdout_task = spawn_line_reader(child.stdout.take(), "stdout", log_tx.clone());
        let stderr_task = spawn_line_reader(child.stderr.take(), "stderr", log_tx);

        // 等待命令完成，支持超时和取消
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Command cancelled, killing process");
                let _ = child.kill().await;
                Err(CommandError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                error!("Command timed out after {:?}", timeout);
                let _ = child.kill().await;
                Err(CommandError::Timeout(timeout))
            }
            status = child.wait() => {
                status
                    .map(|status| CommandResult { status })
                    .map_err(CommandError::WaitFailed)
            }
        };

        // 等待日志读取完成
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        result
    }

    /// 执行简单命令（无流式输出）
    ///
    /// 用于不需要实时日志的场景（如 docker tag）
    pub async fn run_simple(
        program: impl AsRef<OsStr>,
        args: &[&str],
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<std::process::Output, CommandError> {
        Self::run_captured(program, args, work_dir, &[], CancellationToken::new(), timeout).await
    }

    /// 执行命令并收集输出，支持额外环境变量和取消
    ///
    /// 超时或取消时丢弃 output future，`kill_on_drop` 会杀死子进程
    pub async fn run_captured(
        program: impl AsRef<OsStr>,
        args: &[&str],
        work_dir: &Path,
        envs: &[(&str, &str)],
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<std::process::Output, CommandError> {
        let program = program.as_ref();
        let child = Command::new(program)
            .args(args)
            .envs(envs.iter().copied())
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Command cancelled, killing process");
                Err(CommandError::Cancelled)
            }
            result = child => {
                result.map_err(|source| CommandError::SpawnFailed {
                    program: program.to_string_lossy().to_string(),
                    source,
                })
            }
            _ = tokio::time::sleep(timeout) => {
                Err(CommandError::Timeout(timeout))
            }
        }
    }

    /// 执行命令并把 `input` 写入 stdin
    ///
    /// 用于 `docker login --password-stdin`，凭据不出现在参数列表中
    pub async fn run_with_stdin(
        program: impl AsRef<OsStr>,
        args: &[&str],
        input: &str,
        timeout: Duration,
    ) -> Result<std::process::Output, CommandError> {
        let program = program.as_ref();
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::SpawnFailed {
                program: program.to_string_lossy().to_string(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(CommandError::WaitFailed)?;
            // 关闭 stdin，让子进程读到 EOF
            drop(stdin);
        }

        tokio::select! {
            output = child.wait_with_output() => output.map_err(CommandError::WaitFailed),
            _ = tokio::time::sleep(timeout) => Err(CommandError::Timeout(timeout)),
        }
    }
}

fn spawn_line_reader<R>(
    reader: Option<R>,
    stream: &'static str,
    log_tx: broadcast::Sender<LogLine>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(reader) = reader {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = log_tx.send(LogLine::new(stream, line));
            }
        }
    })
}

/// 把文本中的凭据替换为 `***`
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "***")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_run_simple_success() {
        let result = CommandRunner::run_simple(
            "echo",
            &["hello"],
            &PathBuf::from("/tmp"),
            Duration::from_secs(5),
        )
        .await;

        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("hello"));
    }

    #[tokio::test]
    async fn test_run_simple_not_found() {
        let result = CommandRunner::run_simple(
            "nonexistent_command_12345",
            &[],
            &PathBuf::from("/tmp"),
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(CommandError::SpawnFailed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_streaming_forwards_lines() {
        let (tx, mut rx) = broadcast::channel(16);
        let result = CommandRunner::run_with_streaming(
            "sh",
            &["-c", "echo out; echo err 1>&2; exit 3"],
            &PathBuf::from("/tmp"),
            tx,
            CancellationToken::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(!result.success());
        assert_eq!(result.code(), 3);

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push((line.stream, line.content));
        }
        assert!(lines.contains(&("stdout".to_string(), "out".to_string())));
        assert!(lines.contains(&("stderr".to_string(), "err".to_string())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_streaming_cancel() {
        let (tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = CommandRunner::run_with_streaming(
            "sleep",
            &["5"],
            &PathBuf::from("/tmp"),
            tx,
            cancel,
            Duration::from_secs(10),
        )
        .await;
        assert!(matches!(result, Err(CommandError::Cancelled)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captured_cancel_stops_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = CommandRunner::run_captured(
            "sleep",
            &["30"],
            &PathBuf::from("/tmp"),
            &[],
            cancel,
            Duration::from_secs(60),
        )
        .await;

        assert!(matches!(result, Err(CommandError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captured_sets_env() {
        let output = CommandRunner::run_captured(
            "sh",
            &["-c", "echo $GIT_TERMINAL_PROMPT"],
            &PathBuf::from("/tmp"),
            &[("GIT_TERMINAL_PROMPT", "0")],
            CancellationToken::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "0");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_stdin() {
        let output = CommandRunner::run_with_stdin("cat", &[], "secret", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "secret");
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("https://ghp_abc@github.com/o/r.git", "ghp_abc"),
            "https://***@github.com/o/r.git"
        );
        assert_eq!(redact("nothing here", ""), "nothing here");
    }
}

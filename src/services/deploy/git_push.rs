//! Git 推送
//!
//! 把项目复制到临时目录（不含 .git），清理冲突标记后提交并推送到目标仓库。
//! 失败不影响后续镜像阶段。

use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::env::constants::GIT_TIMEOUT_SECS;
use crate::domain::deploy::DeployStage;
use crate::infra::command::{CommandError, CommandRunner};

use super::context::DeployContext;
use super::DeployPlan;

/// 需要检查冲突标记的文件扩展名
const CONFLICT_CHECK_EXTENSIONS: &[&str] = &["py", "txt", "md", "toml"];

/// 去掉冲突标记，只保留 HEAD 一侧
///
/// 没有完整的 `<<<<<<<` / `=======` / `>>>>>>>` 块时返回 None，
/// 未闭合的块也返回 None（保持原文件不动）。
pub fn strip_conflict_markers(text: &str) -> Option<String> {
    #[derive(Clone, Copy)]
    enum Side {
        Outside,
        Ours,
        Base,
        Theirs,
    }

    let mut side = Side::Outside;
    let mut blocks = 0;
    let mut out = String::with_capacity(text.len());

    for line in text.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        match side {
            Side::Outside if bare.starts_with("<<<<<<<") => side = Side::Ours,
            Side::Outside => out.push_str(line),
            Side::Ours if bare.starts_with("|||||||") => side = Side::Base,
            Side::Ours | Side::Base if bare == "=======" => side = Side::Theirs,
            Side::Ours => out.push_str(line),
            Side::Base => {}
            Side::Theirs if bare.starts_with(">>>>>>>") => {
                side = Side::Outside;
                blocks += 1;
            }
            Side::Theirs => {}
        }
    }

    match side {
        Side::Outside if blocks > 0 => Some(out),
        _ => None,
    }
}

fn needs_conflict_check(path: &Path) -> bool {
    if path.file_name().and_then(|n| n.to_str()) == Some("Dockerfile") {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| CONFLICT_CHECK_EXTENSIONS.contains(&e))
}

/// 复制 `src` 到 `dest`（跳过 .git），返回清理过冲突标记的文件
pub fn prepare_workspace(src: &Path, dest: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut cleaned = Vec::new();

    for entry in WalkDir::new(src)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if !entry.file_type().is_file() {
            // 符号链接等不复制
            continue;
        }

        std::fs::copy(entry.path(), &target)?;

        if needs_conflict_check(&target) {
            // 非 UTF-8 文件跳过
            if let Ok(text) = std::fs::read_to_string(&target) {
                if let Some(stripped) = strip_conflict_markers(&text) {
                    std::fs::write(&target, stripped)?;
                    cleaned.push(rel.to_path_buf());
                }
            }
        }
    }

    Ok(cleaned)
}

/// 带 token 的 HTTPS remote
pub fn remote_url(git_host: &str, token: &str, repository: &str) -> String {
    format!("https://x-access-token:{}@{}/{}.git", token, git_host, repository)
}

fn commit_message(project: &str, note: Option<&str>) -> String {
    let mut message = format!("Deploy {} via flex-deploy", project);
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        message.push_str("\n\nChanges: ");
        message.push_str(note);
    }
    message
}

/// git 命令执行结果
struct GitOutput {
    success: bool,
    stderr: String,
}

/// git 阶段失败原因
#[derive(Debug, PartialEq)]
enum GitFailure {
    Cancelled,
    Failed(String),
}

impl From<CommandError> for GitFailure {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Cancelled => GitFailure::Cancelled,
            other => GitFailure::Failed(other.to_string()),
        }
    }
}

/// 执行一条 git 命令，输出逐行写入任务日志
///
/// 禁用终端凭据提示，token 无效时直接失败
async fn git(ctx: &DeployContext, dir: &Path, args: &[&str]) -> Result<GitOutput, GitFailure> {
    ctx.log_info(&format!(">>> git {}", args.join(" ")));

    let output = CommandRunner::run_captured(
        "git",
        args,
        dir,
        &[("GIT_TERMINAL_PROMPT", "0")],
        ctx.cancel_token.clone(),
        Duration::from_secs(GIT_TIMEOUT_SECS),
    )
    .await?;

    ctx.log_output("stdout", &output.stdout);
    ctx.log_output("stderr", &output.stderr);

    Ok(GitOutput {
        success: output.status.success(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// 必须成功的 git 命令
async fn git_required(ctx: &DeployContext, dir: &Path, args: &[&str]) -> Result<(), GitFailure> {
    let output = git(ctx, dir, args).await?;
    if output.success {
        Ok(())
    } else {
        Err(GitFailure::Failed(format!(
            "git {} failed",
            args.first().copied().unwrap_or_default()
        )))
    }
}

fn is_non_fast_forward(stderr: &str) -> bool {
    stderr.contains("non-fast-forward") || stderr.contains("fetch first") || stderr.contains("[rejected]")
}

async fn publish(ctx: &DeployContext, plan: &DeployPlan, dir: &Path) -> Result<(), GitFailure> {
    let email = format!("{}@users.noreply.github.com", plan.username);
    let message = commit_message(&plan.project_name, plan.version_note.as_deref());
    let remote = remote_url(
        &ctx.state.config.github.git_host,
        &plan.token,
        &plan.repository,
    );

    git_required(ctx, dir, &["init"]).await?;
    git_required(ctx, dir, &["add", "."]).await?;
    git_required(ctx, dir, &["config", "user.name", &plan.username]).await?;
    git_required(ctx, dir, &["config", "user.email", &email]).await?;
    git_required(ctx, dir, &["commit", "-m", &message]).await?;
    git_required(ctx, dir, &["branch", "-M", "main"]).await?;
    git_required(ctx, dir, &["remote", "add", "origin", &remote]).await?;

    // 合并远端已有内容（如自动生成的 README），失败不致命
    let pull = git(
        ctx,
        dir,
        &["pull", "origin", "main", "--allow-unrelated-histories", "--no-edit"],
    )
    .await?;
    if !pull.success {
        ctx.log_stderr("Warning: git pull failed, continuing with local history");
        if let Err(GitFailure::Cancelled) = git(ctx, dir, &["merge", "--abort"]).await {
            return Err(GitFailure::Cancelled);
        }
    }

    let push = git(ctx, dir, &["push", "-u", "origin", "main"]).await?;
    if push.success {
        return Ok(());
    }

    if is_non_fast_forward(&push.stderr) {
        ctx.log_stderr("Warning: push rejected as non-fast-forward, retrying with --force");
        git_required(ctx, dir, &["push", "-u", "origin", "main", "--force"]).await?;
        return Ok(());
    }

    Err(GitFailure::Failed("git push failed".to_string()))
}

/// 执行 git 推送阶段，返回是否成功
pub async fn execute(ctx: &DeployContext, plan: &DeployPlan, stage: &mut DeployStage) -> bool {
    stage.start();
    ctx.log_info(&format!("Publishing source to {}", plan.repository));

    let workspace = match tempfile::Builder::new().prefix("flex-deploy-").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            ctx.log_stderr(&format!("Error: Failed to create temp directory: {}", e));
            stage.finish(false, Some(e.to_string()));
            return false;
        }
    };

    let src = plan.project_path.clone();
    let dest = workspace.path().to_path_buf();
    let copied = tokio::task::spawn_blocking(move || prepare_workspace(&src, &dest)).await;

    match copied {
        Ok(Ok(cleaned)) => {
            for file in &cleaned {
                ctx.log_info(&format!("Cleaned merge conflict markers in {}", file.display()));
            }
        }
        Ok(Err(e)) => {
            ctx.log_stderr(&format!("Error: Failed to copy project files: {}", e));
            stage.finish(false, Some(e.to_string()));
            return false;
        }
        Err(e) => {
            stage.finish(false, Some(e.to_string()));
            return false;
        }
    }

    match publish(ctx, plan, workspace.path()).await {
        Ok(()) => {
            ctx.log_info(&format!("✓ Source pushed to {}", plan.repository));
            stage.finish(true, None);
            true
        }
        Err(GitFailure::Cancelled) => {
            ctx.log_stderr("git stopped: deploy cancelled");
            stage.finish(false, Some("Cancelled".to_string()));
            false
        }
        Err(GitFailure::Failed(e)) => {
            tracing::warn!(task_id = %ctx.task_id, error = %e, "Git push failed");
            ctx.log_stderr(&format!("Warning: {}, continuing with image build", e));
            stage.finish(false, Some(e));
            false
        }
    }
}

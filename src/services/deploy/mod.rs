//! 部署服务模块
//!
//! 校验 → GitHub 认证 → 仓库检查 → Git 推送 → 镜像构建/推送

pub mod context;
pub mod docker_build;
pub mod git_push;

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::EnvConfig;
use crate::domain::deploy::{DeployRequest, DeployStage, DeployStatus};
use crate::services::{docker, scanner};
use crate::state::AppState;

pub use context::DeployContext;

pub(crate) const VALIDATE: usize = 0;
pub(crate) const GITHUB_AUTH: usize = 1;
pub(crate) const REPOSITORY_CHECK: usize = 2;
pub(crate) const GIT_PUSH: usize = 3;
pub(crate) const DOCKER_BUILD: usize = 4;
pub(crate) const REGISTRY_LOGIN: usize = 5;
pub(crate) const DOCKER_PUSH: usize = 6;
pub(crate) const DOCKER_PUSH_LATEST: usize = 7;

/// 取消时的退出码
pub const CANCELLED_EXIT_CODE: i32 = -2;

/// 阶段组执行结果
#[derive(Debug, PartialEq)]
pub enum StageOutcome {
    Completed,
    Failed(i32),
    Cancelled,
}

/// 一次部署的执行计划（由请求校验得到）
#[derive(Clone, Debug)]
pub struct DeployPlan {
    pub project_name: String,
    pub project_path: PathBuf,
    pub username: String,
    pub token: String,
    /// owner/name
    pub repository: String,
    pub version_note: Option<String>,
    /// registry/owner/name（小写）
    pub image: String,
    pub tag: String,
}

impl DeployPlan {
    /// 校验请求字段并解析项目路径
    ///
    /// 项目路径是否存在由 validate 阶段检查
    pub fn from_request(request: DeployRequest, config: &EnvConfig) -> Result<Self, String> {
        let missing = request.missing_fields();
        if !missing.is_empty() {
            return Err(format!("Missing required fields: {}", missing.join(", ")));
        }
        if !request.repository_is_well_formed() {
            return Err(format!(
                "Repository must be in owner/name form, got '{}'",
                request.selected_repository
            ));
        }

        let raw_path = request.project_path.trim();
        let project_path = if raw_path.is_empty() || raw_path == "." {
            std::env::current_dir().map_err(|e| format!("Cannot read working directory: {}", e))?
        } else {
            scanner::resolve_scan_path(raw_path, config.containerized, &config.workspace_root)
        };

        let repository = request.selected_repository.trim().to_string();
        let tag = docker::version_tag(
            request.version.as_deref(),
            request.semantic_version.as_deref(),
            chrono::Utc::now(),
        );

        Ok(Self {
            project_name: request.project_name.trim().to_string(),
            project_path,
            username: request.github_username.trim().to_string(),
            token: request.github_token.trim().to_string(),
            image: docker::image_name(&config.docker.registry, &repository),
            repository,
            version_note: request.version_note,
            tag,
        })
    }

    pub fn versioned_image(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    pub fn latest_image(&self) -> String {
        format!("{}:latest", self.image)
    }
}

/// 初始阶段列表
pub fn initial_stages() -> Vec<DeployStage> {
    vec![
        DeployStage::new("validate", "Validate"),
        DeployStage::new("github_auth", "GitHub Auth"),
        DeployStage::new("repository_check", "Repository Check"),
        DeployStage::new("git_push", "Git Push"),
        DeployStage::new("docker_build", "Docker Build"),
        DeployStage::new("registry_login", "Registry Login"),
        DeployStage::new("docker_push", "Docker Push"),
        DeployStage::new("docker_push_latest", "Push Latest Tag"),
    ]
}

/// 把所有未结束的阶段标记为跳过
pub(crate) fn skip_open(stages: &mut [DeployStage], reason: &str) {
    for stage in stages.iter_mut().filter(|s| s.is_open()) {
        stage.skip(Some(reason.to_string()));
    }
}

/// 执行部署任务
///
/// 调用前需已在 task_store / log_hub / running_deploys 中注册该任务
pub async fn execute(state: Arc<AppState>, task_id: String, plan: DeployPlan) {
    let log_tx = state.log_hub.create(&task_id).await;
    let cancel_token = state
        .running_cancel_token(&plan.repository)
        .await
        .unwrap_or_else(CancellationToken::new);

    let ctx = DeployContext::new(
        task_id,
        plan.project_name.clone(),
        plan.repository.clone(),
        state,
        log_tx,
        cancel_token,
        plan.token.clone(),
    );

    let mut stages = initial_stages();
    let (status, exit_code) = run(&ctx, &plan, &mut stages).await;
    ctx.finish(status, Some(exit_code), stages).await;
}

async fn run(
    ctx: &DeployContext,
    plan: &DeployPlan,
    stages: &mut Vec<DeployStage>,
) -> (DeployStatus, i32) {
    ctx.log_info(&format!("=== Deploy {} to {} ===", plan.project_name, plan.repository));
    ctx.log_info(&format!("Project path: {}", plan.project_path.display()));
    ctx.log_info(&format!("Target image: {}", plan.versioned_image()));
    ctx.log_info(&format!("Timestamp: {}", chrono::Utc::now().to_rfc3339()));

    // Stage 1: Validate
    stages[VALIDATE].start();
    ctx.update_stages(stages).await;
    if !plan.project_path.is_dir() {
        let message = format!("Project path not found: {}", plan.project_path.display());
        return fail(ctx, stages, VALIDATE, message, -1);
    }
    let has_dockerfile = plan.project_path.join("Dockerfile").is_file();
    stages[VALIDATE].finish(true, None);
    ctx.update_stages(stages).await;

    // Stage 2: GitHub Auth
    stages[GITHUB_AUTH].start();
    ctx.update_stages(stages).await;
    ctx.log_info("Verifying GitHub token...");
    match ctx.state.github.verify_token(&plan.token).await {
        Ok(user) => {
            ctx.log_info(&format!("✓ Authenticated as {}", user.login));
            stages[GITHUB_AUTH].finish(true, Some(user.login));
        }
        Err(e) => return fail(ctx, stages, GITHUB_AUTH, e.to_string(), -1),
    }
    ctx.update_stages(stages).await;

    if ctx.is_cancelled() {
        return cancelled(ctx, stages);
    }

    // Stage 3: Repository Check
    stages[REPOSITORY_CHECK].start();
    ctx.update_stages(stages).await;
    match ctx
        .state
        .github
        .get_repository(&plan.token, &plan.repository)
        .await
    {
        Ok(repo) => {
            ctx.log_info(&format!("✓ Repository {} ({})", repo.full_name, repo.visibility));
            stages[REPOSITORY_CHECK].finish(true, None);
        }
        Err(e) => return fail(ctx, stages, REPOSITORY_CHECK, e.to_string(), -1),
    }
    ctx.update_stages(stages).await;

    if ctx.is_cancelled() {
        return cancelled(ctx, stages);
    }

    // Stage 4: Git Push（失败不致命）
    ctx.update_stages(stages).await;
    git_push::execute(ctx, plan, &mut stages[GIT_PUSH]).await;
    ctx.update_stages(stages).await;

    if ctx.is_cancelled() {
        return cancelled(ctx, stages);
    }

    // Stage 5-8: Docker
    if !has_dockerfile {
        ctx.log_info("No Dockerfile found, skipping image stages");
        skip_open(stages, "No Dockerfile");
        return (DeployStatus::Success, 0);
    }

    let availability = docker::availability(
        &ctx.state.config.docker,
        ctx.state.config.containerized,
    );
    if !availability.usable {
        ctx.log_info(&format!("Docker unavailable: {}", availability.reason));
        skip_open(stages, &availability.reason);
        return (DeployStatus::Success, 0);
    }

    match docker_build::execute(ctx, plan, stages).await {
        StageOutcome::Completed => (DeployStatus::Success, 0),
        StageOutcome::Failed(code) => (DeployStatus::Failed, code),
        StageOutcome::Cancelled => cancelled(ctx, stages),
    }
}

/// 阶段失败，其余阶段跳过
fn fail(
    ctx: &DeployContext,
    stages: &mut [DeployStage],
    index: usize,
    message: String,
    exit_code: i32,
) -> (DeployStatus, i32) {
    tracing::warn!(task_id = %ctx.task_id, stage = %stages[index].name, error = %message, "Deploy stage failed");
    ctx.log_stderr(&format!("Error: {}", message));
    stages[index].finish(false, Some(message));
    skip_open(stages, "Previous stage failed");
    (DeployStatus::Failed, exit_code)
}

fn cancelled(ctx: &DeployContext, stages: &mut [DeployStage]) -> (DeployStatus, i32) {
    tracing::warn!(task_id = %ctx.task_id, "Deploy cancelled");
    ctx.log_stderr("=== Deploy CANCELLED ===");
    skip_open(stages, "Cancelled");
    (DeployStatus::Failed, CANCELLED_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DockerConfig, GitHubConfig};
    use crate::domain::deploy::{DeployTask, StageStatus};
    use axum::{
        http::StatusCode,
        routing::get,
        Json, Router,
    };

    async fn spawn_github_stub(authorized: bool) -> String {
        let app = Router::new()
            .route(
                "/user",
                get(move || async move {
                    if authorized {
                        (StatusCode::OK, Json(serde_json::json!({ "login": "octo" })))
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            Json(serde_json::json!({ "message": "Bad credentials" })),
                        )
                    }
                }),
            )
            .route(
                "/repos/:owner/:name",
                get(|| async {
                    Json(serde_json::json!({
                        "name": "demo",
                        "full_name": "octo/demo",
                        "private": false,
                        "html_url": "https://github.com/octo/demo"
                    }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// 记录参数的假 docker：build 失败，其余成功
    #[cfg(unix)]
    fn fake_docker(dir: &std::path::Path) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let calls = dir.join("calls.log");
        let script = dir.join("docker");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" >> {}\nif [ \"$1\" = \"build\" ]; then echo 'build failed' >&2; exit 1; fi\nexit 0\n",
                calls.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, calls)
    }

    fn request(project_path: &std::path::Path) -> DeployRequest {
        DeployRequest {
            project_path: project_path.display().to_string(),
            project_name: "demo".to_string(),
            github_username: "octo".to_string(),
            github_token: "ghp_test".to_string(),
            selected_repository: "octo/demo".to_string(),
            version: Some("1.0.0".to_string()),
            ..Default::default()
        }
    }

    async fn run_deploy(config: EnvConfig, request: DeployRequest) -> DeployTask {
        let state = Arc::new(AppState::with_config(config).unwrap());
        let plan = DeployPlan::from_request(request, &state.config).unwrap();
        let task_id = uuid::Uuid::new_v4().to_string();

        state
            .task_store
            .create(DeployTask::new(
                task_id.clone(),
                plan.project_name.clone(),
                plan.repository.clone(),
            ))
            .await;
        state
            .register_running_deploy(&plan.repository, &task_id)
            .await
            .unwrap();

        execute(state.clone(), task_id.clone(), plan).await;

        assert!(state.running_repositories().await.is_empty());
        state.task_store.get_any(&task_id).await.unwrap()
    }

    fn stage<'a>(task: &'a DeployTask, name: &str) -> &'a DeployStage {
        task.stages.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn test_plan_validation() {
        let config = EnvConfig::default();
        let mut req = request(std::path::Path::new("/tmp"));
        req.github_token.clear();
        assert!(DeployPlan::from_request(req, &config)
            .unwrap_err()
            .contains("github_token"));

        let mut req = request(std::path::Path::new("/tmp"));
        req.selected_repository = "demo".to_string();
        assert!(DeployPlan::from_request(req, &config).is_err());

        let mut req = request(std::path::Path::new("/tmp"));
        req.selected_repository = "Octo/Demo".to_string();
        let plan = DeployPlan::from_request(req, &config).unwrap();
        assert_eq!(plan.versioned_image(), "ghcr.io/octo/demo:1.0.0");
        assert_eq!(plan.latest_image(), "ghcr.io/octo/demo:latest");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_build_skips_push() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let bin = tempfile::tempdir().unwrap();
        let (script, calls) = fake_docker(bin.path());

        let config = EnvConfig {
            containerized: false,
            docker: DockerConfig {
                program: script,
                ..DockerConfig::default()
            },
            github: GitHubConfig {
                api_url: spawn_github_stub(true).await,
                git_host: "127.0.0.1:9".to_string(),
            },
            ..EnvConfig::default()
        };

        let task = run_deploy(config, request(project.path())).await;

        assert_eq!(task.status, DeployStatus::Failed);
        assert_eq!(task.exit_code, Some(1));
        assert_eq!(stage(&task, "github_auth").status, StageStatus::Success);
        assert_eq!(stage(&task, "docker_build").status, StageStatus::Failed);
        assert_eq!(stage(&task, "registry_login").status, StageStatus::Skipped);
        assert_eq!(stage(&task, "docker_push").status, StageStatus::Skipped);
        assert_eq!(stage(&task, "docker_push_latest").status, StageStatus::Skipped);

        let log = std::fs::read_to_string(calls).unwrap();
        assert!(log.contains("build"));
        assert!(!log.contains("push"));
        assert!(task.image.is_none());
    }

    #[tokio::test]
    async fn test_no_dockerfile_skips_image_stages() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("app.py"), "print('hi')\n").unwrap();

        let config = EnvConfig {
            docker: DockerConfig {
                program: PathBuf::from("/nonexistent/docker-12345"),
                ..DockerConfig::default()
            },
            github: GitHubConfig {
                api_url: spawn_github_stub(true).await,
                git_host: "127.0.0.1:9".to_string(),
            },
            ..EnvConfig::default()
        };

        let task = run_deploy(config, request(project.path())).await;

        assert_eq!(task.status, DeployStatus::Success);
        assert_eq!(task.exit_code, Some(0));
        assert_eq!(stage(&task, "docker_build").status, StageStatus::Skipped);
        assert_eq!(
            stage(&task, "docker_build").message.as_deref(),
            Some("No Dockerfile")
        );
    }

    #[tokio::test]
    async fn test_invalid_token_fails_task() {
        let project = tempfile::tempdir().unwrap();

        let config = EnvConfig {
            github: GitHubConfig {
                api_url: spawn_github_stub(false).await,
                git_host: "127.0.0.1:9".to_string(),
            },
            ..EnvConfig::default()
        };

        let task = run_deploy(config, request(project.path())).await;

        assert_eq!(task.status, DeployStatus::Failed);
        assert_eq!(stage(&task, "github_auth").status, StageStatus::Failed);
        assert_eq!(stage(&task, "git_push").status, StageStatus::Skipped);
    }

    #[tokio::test]
    async fn test_missing_project_path_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let config = EnvConfig {
            github: GitHubConfig {
                api_url: "http://127.0.0.1:9".to_string(),
                git_host: "127.0.0.1:9".to_string(),
            },
            ..EnvConfig::default()
        };

        let task = run_deploy(config, request(&dir.path().join("missing"))).await;

        assert_eq!(task.status, DeployStatus::Failed);
        assert_eq!(stage(&task, "validate").status, StageStatus::Failed);
        assert_eq!(stage(&task, "github_auth").status, StageStatus::Skipped);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let project = tempfile::tempdir().unwrap();
        let state = Arc::new(
            AppState::with_config(EnvConfig {
                github: GitHubConfig {
                    api_url: spawn_github_stub(true).await,
                    git_host: "127.0.0.1:9".to_string(),
                },
                ..EnvConfig::default()
            })
            .unwrap(),
        );
        let plan = DeployPlan::from_request(request(project.path()), &state.config).unwrap();
        let task_id = "task-cancel".to_string();
        state
            .task_store
            .create(DeployTask::new(task_id.clone(), "demo".into(), "octo/demo".into()))
            .await;
        let token = state
            .register_running_deploy("octo/demo", &task_id)
            .await
            .unwrap();
        token.cancel();

        execute(state.clone(), task_id.clone(), plan).await;

        let task = state.task_store.get_any(&task_id).await.unwrap();
        assert_eq!(task.status, DeployStatus::Failed);
        assert_eq!(task.exit_code, Some(CANCELLED_EXIT_CODE));
        assert_eq!(stage(&task, "git_push").status, StageStatus::Skipped);
    }
}

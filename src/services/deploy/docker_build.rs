//! Docker image stages
//!
//! Build, registry login, versioned push and latest push

use crate::domain::deploy::DeployStage;
use crate::infra::command::CommandError;

use super::context::DeployContext;
use super::{
    skip_open, DeployPlan, StageOutcome, DOCKER_BUILD, DOCKER_PUSH, DOCKER_PUSH_LATEST,
    REGISTRY_LOGIN,
};

/// Run the docker stages in order
pub async fn execute(
    ctx: &DeployContext,
    plan: &DeployPlan,
    stages: &mut [DeployStage],
) -> StageOutcome {
    let docker = &ctx.state.docker;
    let registry = ctx.state.config.docker.registry.clone();
    let versioned = plan.versioned_image();
    let latest = plan.latest_image();

    // Stage: Docker Build
    stages[DOCKER_BUILD].start();
    ctx.update_stages(stages).await;
    ctx.log_info("Building Docker image...");
    ctx.log_info(&format!(
        ">>> docker build -t {} {}",
        versioned,
        plan.project_path.display()
    ));

    let build = docker
        .build(
            &plan.project_path,
            std::slice::from_ref(&versioned),
            ctx.log_tx.clone(),
            ctx.cancel_token.clone(),
        )
        .await;

    match build {
        Ok(result) if result.success() => {
            stages[DOCKER_BUILD].finish(true, None);
            ctx.log_info(&format!("✓ Image built: {}", versioned));
        }
        Ok(result) => {
            stages[DOCKER_BUILD].finish(false, Some("docker build failed".to_string()));
            ctx.log_stderr(&format!("docker build exited with code {}", result.code()));
            skip_open(stages, "Build failed");
            return StageOutcome::Failed(result.code());
        }
        Err(e) => return command_failure(ctx, stages, DOCKER_BUILD, e),
    }
    ctx.update_stages(stages).await;

    ctx.log_info(&format!(">>> docker tag {} {}", versioned, latest));
    match docker.tag(&versioned, &latest).await {
        Ok(output) if output.status.success() => {}
        Ok(output) => ctx.log_output("stderr", &output.stderr),
        Err(e) => ctx.log_stderr(&format!("Warning: docker tag failed: {}", e)),
    }

    if ctx.is_cancelled() {
        return StageOutcome::Cancelled;
    }

    // Stage: Registry Login
    stages[REGISTRY_LOGIN].start();
    ctx.update_stages(stages).await;
    ctx.log_info(&format!(
        ">>> docker login {} -u {} --password-stdin",
        registry, plan.username
    ));

    match docker.login(&registry, &plan.username, &plan.token).await {
        Ok(output) if output.status.success() => {
            ctx.log_output("stdout", &output.stdout);
            stages[REGISTRY_LOGIN].finish(true, None);
        }
        Ok(output) => {
            ctx.log_output("stderr", &output.stderr);
            let code = output.status.code().unwrap_or(-1);
            stages[REGISTRY_LOGIN].finish(false, Some("docker login failed".to_string()));
            skip_open(stages, "Registry login failed");
            return StageOutcome::Failed(code);
        }
        Err(e) => return command_failure(ctx, stages, REGISTRY_LOGIN, e),
    }
    ctx.update_stages(stages).await;

    if ctx.is_cancelled() {
        return StageOutcome::Cancelled;
    }

    // Stage: Docker Push
    stages[DOCKER_PUSH].start();
    ctx.update_stages(stages).await;
    ctx.log_info(&format!(">>> docker push {}", versioned));

    match docker
        .push(&versioned, ctx.log_tx.clone(), ctx.cancel_token.clone())
        .await
    {
        Ok(result) if result.success() => {
            stages[DOCKER_PUSH].finish(true, None);
            ctx.state.task_store.set_image(&ctx.task_id, &versioned).await;
            ctx.log_info(&format!("✓ Pushed: {}", versioned));
        }
        Ok(result) => {
            stages[DOCKER_PUSH].finish(false, Some("docker push failed".to_string()));
            skip_open(stages, "Push failed");
            return StageOutcome::Failed(result.code());
        }
        Err(e) => return command_failure(ctx, stages, DOCKER_PUSH, e),
    }
    ctx.update_stages(stages).await;

    if ctx.is_cancelled() {
        return StageOutcome::Cancelled;
    }

    // Stage: Push Latest (failure is only a warning)
    stages[DOCKER_PUSH_LATEST].start();
    ctx.update_stages(stages).await;
    ctx.log_info(&format!(">>> docker push {}", latest));

    match docker
        .push(&latest, ctx.log_tx.clone(), ctx.cancel_token.clone())
        .await
    {
        Ok(result) if result.success() => {
            stages[DOCKER_PUSH_LATEST].finish(true, None);
            ctx.log_info(&format!("✓ Pushed: {}", latest));
        }
        Ok(_) => {
            stages[DOCKER_PUSH_LATEST].finish(false, Some("push latest failed".to_string()));
            ctx.log_stderr("Warning: Failed to push latest tag");
        }
        Err(CommandError::Cancelled) => return StageOutcome::Cancelled,
        Err(e) => {
            stages[DOCKER_PUSH_LATEST].finish(false, Some(e.to_string()));
            ctx.log_stderr(&format!("Warning: Failed to push latest: {}", e));
        }
    }
    ctx.update_stages(stages).await;

    StageOutcome::Completed
}

/// Spawn failure, timeout or cancellation of a docker command
fn command_failure(
    ctx: &DeployContext,
    stages: &mut [DeployStage],
    index: usize,
    error: CommandError,
) -> StageOutcome {
    if matches!(error, CommandError::Cancelled) {
        return StageOutcome::Cancelled;
    }

    tracing::warn!(task_id = %ctx.task_id, stage = %stages[index].name, error = %error, "Docker command failed");
    ctx.log_stderr(&format!("Error: {}", error));
    stages[index].finish(false, Some(error.to_string()));
    skip_open(stages, "Previous stage failed");
    StageOutcome::Failed(-1)
}

//! GitHub API
//!
//! 包含 /verify-github-token, /get-repositories, /create-repository,
//! /check-docker-images 端点。token 由前端随请求传入，服务端不保存。

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::deploy::split_repository;
use crate::domain::{ContainerPackage, CreateRepository, LocalImage, LogLine, Repository};
use crate::error::{ApiError, ApiResult};
use crate::services::docker;
use crate::state::AppState;

/// 只携带 token 的请求
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub github_username: String,
    #[serde(default)]
    pub github_token: String,
}

impl TokenRequest {
    fn token(&self) -> ApiResult<&str> {
        require_token(&self.github_token)
    }
}

fn require_token(token: &str) -> ApiResult<&str> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::unauthorized("GitHub token is required"));
    }
    Ok(token)
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub status: &'static str,
    pub login: String,
    pub name: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RepositoriesResponse {
    pub status: &'static str,
    pub repositories: Vec<Repository>,
    pub total: usize,
}

/// 创建仓库请求
#[derive(Debug, Deserialize)]
pub struct CreateRepositoryRequest {
    #[serde(default)]
    pub github_token: String,
    #[serde(default)]
    pub repo_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateRepositoryResponse {
    pub status: &'static str,
    pub message: String,
    pub repository: Repository,
}

/// 镜像查询请求
#[derive(Debug, Deserialize)]
pub struct DockerImagesRequest {
    #[serde(default)]
    pub github_token: String,
    /// owner/name，为空时返回全部镜像
    #[serde(default)]
    pub repository: String,
}

#[derive(Debug, Serialize)]
pub struct RepositoryInfo {
    pub full_name: String,
    pub name: String,
    pub owner: String,
}

#[derive(Debug, Serialize)]
pub struct DockerImagesResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_info: Option<RepositoryInfo>,
    pub docker_images: Vec<ContainerPackage>,
    pub local_images: Vec<LocalImage>,
    pub total_images: usize,
    pub total_versions: usize,
    pub total_local_images: usize,
}

/// 创建 GitHub 路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/verify-github-token", post(verify_github_token))
        .route(
            "/get-repositories",
            get(get_repositories_query).post(get_repositories_body),
        )
        .route("/create-repository", post(create_repository))
        .route("/check-docker-images", post(check_docker_images))
}

/// 验证 token
///
/// POST /verify-github-token
async fn verify_github_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state.github.verify_token(request.token()?).await?;

    let username = request.github_username.trim();
    let message = if !username.is_empty() && !username.eq_ignore_ascii_case(&user.login) {
        warn!(expected = %username, actual = %user.login, "Token belongs to a different user");
        format!("Token verified, but it belongs to {} (not {})", user.login, username)
    } else {
        format!("Token verified for {}", user.login)
    };

    state.log_hub.emit(LogLine::info(&message)).await;

    Ok(Json(VerifyResponse {
        status: "success",
        login: user.login,
        name: user.name,
        message,
    }))
}

/// 列出仓库
///
/// GET /get-repositories?github_token=...
async fn get_repositories_query(
    State(state): State<Arc<AppState>>,
    Query(request): Query<TokenRequest>,
) -> ApiResult<impl IntoResponse> {
    list_repositories(&state, &request).await
}

/// 列出仓库
///
/// POST /get-repositories
async fn get_repositories_body(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<impl IntoResponse> {
    list_repositories(&state, &request).await
}

async fn list_repositories(
    state: &AppState,
    request: &TokenRequest,
) -> ApiResult<Json<RepositoriesResponse>> {
    let repositories = state.github.list_repositories(request.token()?).await?;
    info!(count = repositories.len(), "Repositories listed");

    Ok(Json(RepositoriesResponse {
        status: "success",
        total: repositories.len(),
        repositories,
    }))
}

/// 创建仓库（使用 README 初始化）
///
/// POST /create-repository
async fn create_repository(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRepositoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let token = require_token(&request.github_token)?;
    let name = request.repo_name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Repository name is required"));
    }

    let repository = state
        .github
        .create_repository(
            token,
            &CreateRepository {
                name: name.to_string(),
                description: request.description.clone(),
                private: request.private,
                auto_init: true,
            },
        )
        .await?;

    let message = format!("Repository created successfully: {}", repository.full_name);
    state.log_hub.emit(LogLine::info(&message)).await;

    Ok(Json(CreateRepositoryResponse {
        status: "success",
        message,
        repository,
    }))
}

/// GHCR 镜像和本地镜像
///
/// POST /check-docker-images
async fn check_docker_images(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DockerImagesRequest>,
) -> ApiResult<impl IntoResponse> {
    let token = require_token(&request.github_token)?;
    let repository = request.repository.trim();

    let repository_info = match split_repository(repository) {
        Some((owner, name)) => Some(RepositoryInfo {
            full_name: repository.to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
        }),
        _ if repository.is_empty() => None,
        _ => {
            return Err(ApiError::bad_request(format!(
                "Repository must be in owner/name form, got '{}'",
                repository
            )))
        }
    };

    let mut packages = state.github.list_container_packages(token).await?;
    if let Some(info) = &repository_info {
        packages.retain(|p| p.name.eq_ignore_ascii_case(&info.name));
    }

    let local_images = local_images(&state, repository_info.as_ref()).await;

    Ok(Json(DockerImagesResponse {
        status: "success",
        total_images: packages.len(),
        total_versions: packages.iter().map(|p| p.versions).sum(),
        total_local_images: local_images.len(),
        docker_images: packages,
        local_images,
        repository_info,
    }))
}

/// 本地镜像；Docker 不可用时返回空列表
async fn local_images(state: &AppState, repository: Option<&RepositoryInfo>) -> Vec<LocalImage> {
    let availability = docker::availability(&state.config.docker, state.config.containerized);
    if !availability.usable {
        return Vec::new();
    }

    let mut images = match state.docker.list_local_images().await {
        Ok(images) => images,
        Err(e) => {
            warn!(error = %e, "Failed to list local images");
            return Vec::new();
        }
    };

    if let Some(info) = repository {
        let prefix = docker::image_name(&state.config.docker.registry, &info.full_name);
        images.retain(|image| image.name.starts_with(&format!("{}:", prefix)));
    }
    images
}

#[cfg(test)]
mod tests {
    use crate::config::{DockerConfig, EnvConfig, GitHubConfig};
    use crate::state::AppState;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::get,
        Json, Router,
    };
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn spawn_github_stub() -> String {
        let app = Router::new()
            .route(
                "/user/repos",
                get(|headers: axum::http::HeaderMap| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if auth != "Bearer good" {
                        return (
                            StatusCode::UNAUTHORIZED,
                            Json(serde_json::json!({ "message": "Bad credentials" })),
                        );
                    }
                    (
                        StatusCode::OK,
                        Json(serde_json::json!([{
                            "name": "demo",
                            "full_name": "octo/demo",
                            "private": false,
                            "html_url": "https://github.com/octo/demo"
                        }])),
                    )
                })
                .post(|| async {
                    (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        Json(serde_json::json!({ "message": "name already exists on this account" })),
                    )
                }),
            )
            .route(
                "/user/packages",
                get(|| async {
                    Json(serde_json::json!([
                        { "id": 1, "name": "demo", "package_type": "container", "owner": { "login": "octo" } },
                        { "id": 2, "name": "other", "package_type": "container", "owner": { "login": "octo" } }
                    ]))
                }),
            )
            .route(
                "/user/packages/container/:name/versions",
                get(|| async {
                    Json(serde_json::json!([
                        { "id": 10, "name": "sha256:a", "updated_at": "2024-01-01T00:00:00Z" }
                    ]))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn app() -> Router {
        let config = EnvConfig {
            github: GitHubConfig {
                api_url: spawn_github_stub().await,
                git_host: "127.0.0.1:9".to_string(),
            },
            docker: DockerConfig {
                enabled: false,
                ..DockerConfig::default()
            },
            ..EnvConfig::default()
        };
        crate::api::router(Arc::new(AppState::with_config(config).unwrap()))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_token_on_list_is_401() {
        let (status, json) = send(
            app().await,
            post("/get-repositories", serde_json::json!({ "github_token": "bad" })),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_list_repositories_via_query() {
        let request = Request::builder()
            .uri("/get-repositories?github_username=octo&github_token=good")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(app().await, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 1);
        assert_eq!(json["repositories"][0]["full_name"], "octo/demo");
        assert_eq!(json["repositories"][0]["visibility"], "public");
    }

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let (status, _) = send(
            app().await,
            post("/verify-github-token", serde_json::json!({ "github_token": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_existing_repository_is_400() {
        let (status, json) = send(
            app().await,
            post(
                "/create-repository",
                serde_json::json!({ "github_token": "good", "repo_name": "demo" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn test_check_images_filters_by_repository() {
        let (status, json) = send(
            app().await,
            post(
                "/check-docker-images",
                serde_json::json!({ "github_token": "good", "repository": "octo/demo" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_images"], 1);
        assert_eq!(json["total_versions"], 1);
        assert_eq!(json["docker_images"][0]["full_name"], "octo/demo");
        assert_eq!(json["repository_info"]["owner"], "octo");
        assert_eq!(json["total_local_images"], 0);
    }

    #[tokio::test]
    async fn test_check_images_rejects_unsafe_repository() {
        let (status, json) = send(
            app().await,
            post(
                "/check-docker-images",
                serde_json::json!({ "github_token": "good", "repository": "octo/demo?x" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("owner/name"));
    }
}

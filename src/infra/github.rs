//! GitHub REST API Client
//!
//! 封装与 GitHub 的所有 HTTP 交互，复用连接池。
//! token 随每次调用传入，客户端本身不保存凭据。

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::env::constants::{GITHUB_TIMEOUT_SECS, VERSION};
use crate::domain::github::{
    ContainerPackage, CreateRepository, GitHubUser, PackageVersion, RawPackage,
    RawPackageVersion, RawRepository, Repository,
};

/// GitHub 调用错误
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    /// 401 / 403
    #[error("GitHub authentication failed")]
    Unauthorized,
    /// 404
    #[error("{0} not found on GitHub")]
    NotFound(String),
    /// 422（如仓库已存在）
    #[error("GitHub rejected the request: {0}")]
    Validation(String),
    /// 其它非 2xx 状态
    #[error("GitHub API error {status}: {message}")]
    Api { status: u16, message: String },
    /// 网络错误
    #[error("GitHub request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// GitHub 客户端
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    api_url: String,
}

impl GitHubClient {
    /// 创建新的 GitHub 客户端
    ///
    /// # Arguments
    /// * `api_url` - API 根地址，如 `https://api.github.com`
    pub fn new(api_url: impl Into<String>) -> Result<Self, GitHubError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GITHUB_TIMEOUT_SECS))
            .user_agent(format!("flex-deploy/{}", VERSION))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, token: &str, path: &str) -> RequestBuilder {
        self.authorized(self.client.get(format!("{}{}", self.api_url, path)), token)
    }

    fn post(&self, token: &str, path: &str) -> RequestBuilder {
        self.authorized(self.client.post(format!("{}{}", self.api_url, path)), token)
    }

    fn authorized(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// 验证 token，返回已认证用户
    ///
    /// GET /user
    pub async fn verify_token(&self, token: &str) -> Result<GitHubUser, GitHubError> {
        let user: GitHubUser = send_json(self.get(token, "/user"), "User").await?;
        info!(login = %user.login, "GitHub token verified");
        Ok(user)
    }

    /// 列出当前用户可访问的仓库（按更新时间排序）
    ///
    /// GET /user/repos
    pub async fn list_repositories(&self, token: &str) -> Result<Vec<Repository>, GitHubError> {
        let raw: Vec<RawRepository> = send_json(
            self.get(token, "/user/repos")
                .query(&[("per_page", "100"), ("sort", "updated")]),
            "Repositories",
        )
        .await?;

        debug!(count = raw.len(), "Fetched repositories");
        Ok(raw.into_iter().map(Repository::from).collect())
    }

    /// 获取单个仓库
    ///
    /// GET /repos/{owner}/{name}
    pub async fn get_repository(
        &self,
        token: &str,
        full_name: &str,
    ) -> Result<Repository, GitHubError> {
        let what = format!("Repository '{}'", full_name);
        let raw: RawRepository =
            send_json(self.get(token, &format!("/repos/{}", full_name)), &what).await?;
        Ok(Repository::from(raw))
    }

    /// 创建仓库
    ///
    /// POST /user/repos
    pub async fn create_repository(
        &self,
        token: &str,
        request: &CreateRepository,
    ) -> Result<Repository, GitHubError> {
        let raw: RawRepository =
            send_json(self.post(token, "/user/repos").json(request), "Repository owner").await?;
        info!(repository = %raw.full_name, private = raw.private, "Created GitHub repository");
        Ok(Repository::from(raw))
    }

    /// 列出 GHCR 容器镜像及其版本
    ///
    /// GET /user/packages?package_type=container
    /// GET /user/packages/container/{name}/versions
    pub async fn list_container_packages(
        &self,
        token: &str,
    ) -> Result<Vec<ContainerPackage>, GitHubError> {
        let packages: Vec<RawPackage> = send_json(
            self.get(token, "/user/packages")
                .query(&[("package_type", "container"), ("per_page", "100")]),
            "Packages",
        )
        .await?;

        let mut result = Vec::with_capacity(packages.len());
        for package in packages {
            if package.package_type.as_deref().is_some_and(|t| t != "container") {
                continue;
            }

            let path = format!("/user/packages/container/{}/versions", package.name);
            let versions = match send_json::<Vec<RawPackageVersion>>(
                self.get(token, &path).query(&[("per_page", "100")]),
                "Package versions",
            )
            .await
            {
                Ok(versions) => versions.into_iter().map(PackageVersion::from).collect(),
                Err(GitHubError::Unauthorized) => return Err(GitHubError::Unauthorized),
                Err(e) => {
                    warn!(package = %package.name, error = %e, "Failed to list package versions");
                    Vec::new()
                }
            };

            result.push(ContainerPackage::assemble(package, versions));
        }

        Ok(result)
    }
}

/// 发送请求并解析 JSON，非 2xx 映射为 `GitHubError`
async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    what: &str,
) -> Result<T, GitHubError> {
    let response = request.send().await?;
    let status = response.status();

    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = extract_message(&body);
    warn!(status = %status, message = %message, "GitHub API returned an error");

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GitHubError::Unauthorized,
        StatusCode::NOT_FOUND => GitHubError::NotFound(what.to_string()),
        StatusCode::UNPROCESSABLE_ENTITY => GitHubError::Validation(message),
        _ => GitHubError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

/// 从 GitHub 错误响应中提取 `message` 字段
fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

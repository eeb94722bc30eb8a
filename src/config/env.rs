//! 环境变量配置加载

use std::env;
use std::path::{Path, PathBuf};
use tracing::warn;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 监听地址
    pub host: String,
    /// 服务监听端口
    pub port: u16,
    /// 挂载的工作区根目录（容器内默认 /workspace）
    pub workspace_root: PathBuf,
    /// 是否运行在容器中
    pub containerized: bool,
    /// Docker 配置
    pub docker: DockerConfig,
    /// GitHub 配置
    pub github: GitHubConfig,
    /// 驱动器列表（文件夹浏览器），逗号分隔
    pub custom_drives: Option<Vec<String>>,
    /// 诊断时扫描的路径
    pub test_paths: Vec<PathBuf>,
}

/// Docker 配置
#[derive(Clone, Debug)]
pub struct DockerConfig {
    /// 是否允许执行 Docker 操作
    pub enabled: bool,
    /// Docker 控制 socket
    pub socket: PathBuf,
    /// docker 可执行文件
    pub program: PathBuf,
    /// 镜像 registry（如 ghcr.io）
    pub registry: String,
}

/// GitHub 配置
#[derive(Clone, Debug)]
pub struct GitHubConfig {
    /// REST API 地址
    pub api_url: String,
    /// git remote 使用的主机名
    pub git_host: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: constants::DEFAULT_PORT,
            workspace_root: PathBuf::from(constants::DEFAULT_WORKSPACE_ROOT),
            containerized: false,
            docker: DockerConfig::default(),
            github: GitHubConfig::default(),
            custom_drives: None,
            test_paths: default_test_paths(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket: PathBuf::from("/var/run/docker.sock"),
            program: PathBuf::from("docker"),
            registry: "ghcr.io".to_string(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            git_host: "github.com".to_string(),
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);

        let port = match env::var("PORT") {
            Ok(v) => v.parse().unwrap_or_else(|_| {
                warn!(value = %v, "Invalid PORT, falling back to default");
                defaults.port
            }),
            Err(_) => defaults.port,
        };

        let workspace_root = env::var("WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_root);

        let containerized = detect_container(Path::new("/.dockerenv"));

        let docker = DockerConfig {
            enabled: env::var("DOCKER_ENABLED")
                .map(|v| parse_bool(&v))
                .unwrap_or(true),
            socket: env::var("DOCKER_SOCKET")
                .map(PathBuf::from)
                .unwrap_or(defaults.docker.socket),
            program: env::var("DOCKER_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.docker.program),
            registry: env::var("REGISTRY").unwrap_or(defaults.docker.registry),
        };

        let github = GitHubConfig {
            api_url: env::var("GITHUB_API_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.github.api_url),
            git_host: env::var("GITHUB_GIT_HOST").unwrap_or(defaults.github.git_host),
        };

        let custom_drives = env::var("CUSTOM_DRIVES")
            .ok()
            .map(|v| split_list(&v))
            .filter(|v| !v.is_empty());

        let test_paths = env::var("TEST_PATHS")
            .map(|v| split_list(&v).into_iter().map(PathBuf::from).collect())
            .unwrap_or(defaults.test_paths);

        Self {
            host,
            port,
            workspace_root,
            containerized,
            docker,
            github,
            custom_drives,
            test_paths,
        }
    }

    /// 监听地址 host:port
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 检测是否运行在容器中：`DOCKER_CONTAINER=true` 或存在 `/.dockerenv`
pub fn detect_container(dockerenv: &Path) -> bool {
    let flag = env::var("DOCKER_CONTAINER")
        .map(|v| parse_bool(&v))
        .unwrap_or(false);
    flag || dockerenv.exists()
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn default_test_paths() -> Vec<PathBuf> {
    ["/workspace", "/app", "/home", "/mnt", "/opt"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

/// 常量
pub mod constants {
    /// 默认端口
    pub const DEFAULT_PORT: u16 = 9998;

    /// 默认工作区挂载点
    pub const DEFAULT_WORKSPACE_ROOT: &str = "/workspace";

    /// docker build / push 超时（秒）
    pub const DOCKER_TIMEOUT_SECS: u64 = 600; // 10 分钟

    /// docker login 超时（秒）
    pub const DOCKER_LOGIN_TIMEOUT_SECS: u64 = 60;

    /// git 命令超时（秒）
    pub const GIT_TIMEOUT_SECS: u64 = 120;

    /// GitHub API 请求超时（秒）
    pub const GITHUB_TIMEOUT_SECS: u64 = 60;

    /// 任务历史最大保存数量
    pub const MAX_TASK_HISTORY: usize = 100;

    /// 控制台待拉取日志的最大行数（GET /logs）
    pub const MAX_PENDING_LOG_LINES: usize = 2000;

    /// 清理任务间隔（秒）
    pub const JANITOR_INTERVAL_SECS: u64 = 600;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("/, /home ,,/mnt"), vec!["/", "/home", "/mnt"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn test_detect_container_with_dockerenv_file() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join(".dockerenv");
        std::fs::write(&marker, "").unwrap();
        assert!(detect_container(&marker));
    }

    #[test]
    fn test_defaults() {
        let config = EnvConfig::default();
        assert_eq!(config.port, 9998);
        assert_eq!(config.bind_addr(), "0.0.0.0:9998");
        assert_eq!(config.docker.registry, "ghcr.io");
        assert!(config.docker.enabled);
    }
}

//! Docker CLI invocation
//!
//! Every operation shells out to the docker binary. Success or failure is
//! decided from the exit status only.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::env::constants::{DOCKER_LOGIN_TIMEOUT_SECS, DOCKER_TIMEOUT_SECS};
use crate::config::DockerConfig;
use crate::domain::deploy::LogLine;
use crate::domain::environment::DockerAvailability;
use crate::domain::github::LocalImage;
use crate::infra::command::{CommandError, CommandResult, CommandRunner};

/// `docker images` row format, tab separated
const IMAGES_FORMAT: &str = "{{.Repository}}\t{{.Tag}}\t{{.ID}}\t{{.CreatedAt}}\t{{.Size}}";

/// Thin wrapper around the docker binary
#[derive(Clone, Debug)]
pub struct DockerCli {
    program: PathBuf,
}

impl DockerCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &DockerConfig) -> Self {
        Self::new(config.program.clone())
    }

    /// `docker build -t <tag>... .` inside `context`, streaming output
    pub async fn build(
        &self,
        context: &Path,
        tags: &[String],
        log_tx: broadcast::Sender<LogLine>,
        cancel: CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        let mut args: Vec<&str> = vec!["build", "--progress=plain"];
        for tag in tags {
            args.push("-t");
            args.push(tag);
        }
        args.push(".");

        info!(context = %context.display(), tags = ?tags, "Running docker build");
        CommandRunner::run_with_streaming(
            &self.program,
            &args,
            context,
            log_tx,
            cancel,
            Duration::from_secs(DOCKER_TIMEOUT_SECS),
        )
        .await
    }

    /// `docker login <registry> -u <user> --password-stdin`
    pub async fn login(
        &self,
        registry: &str,
        username: &str,
        token: &str,
    ) -> Result<std::process::Output, CommandError> {
        info!(registry = %registry, username = %username, "Running docker login");
        CommandRunner::run_with_stdin(
            &self.program,
            &["login", registry, "-u", username, "--password-stdin"],
            token,
            Duration::from_secs(DOCKER_LOGIN_TIMEOUT_SECS),
        )
        .await
    }

    /// `docker tag <source> <target>`
    pub async fn tag(&self, source: &str, target: &str) -> Result<std::process::Output, CommandError> {
        CommandRunner::run_simple(
            &self.program,
            &["tag", source, target],
            &std::env::temp_dir(),
            Duration::from_secs(DOCKER_LOGIN_TIMEOUT_SECS),
        )
        .await
    }

    /// `docker push <image>`, streaming output
    pub async fn push(
        &self,
        image: &str,
        log_tx: broadcast::Sender<LogLine>,
        cancel: CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        info!(image = %image, "Running docker push");
        CommandRunner::run_with_streaming(
            &self.program,
            &["push", image],
            &std::env::temp_dir(),
            log_tx,
            cancel,
            Duration::from_secs(DOCKER_TIMEOUT_SECS),
        )
        .await
    }

    /// `docker --version`, None when the CLI cannot be run
    pub async fn version(&self) -> Option<String> {
        let output = CommandRunner::run_simple(
            &self.program,
            &["--version"],
            &std::env::temp_dir(),
            Duration::from_secs(10),
        )
        .await
        .ok()?;

        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            None
        }
    }

    /// Local images, `<none>` entries skipped
    pub async fn list_local_images(&self) -> Result<Vec<LocalImage>, CommandError> {
        let output = CommandRunner::run_simple(
            &self.program,
            &["images", "--format", IMAGES_FORMAT],
            &std::env::temp_dir(),
            Duration::from_secs(30),
        )
        .await?;

        if !output.status.success() {
            warn!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "docker images failed"
            );
            return Ok(Vec::new());
        }

        let images = parse_image_rows(&String::from_utf8_lossy(&output.stdout));
        debug!(count = images.len(), "Listed local images");
        Ok(images)
    }
}

/// Parse `docker images --format` output
pub fn parse_image_rows(text: &str) -> Vec<LocalImage> {
    text.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').map(str::trim).collect();
            if cols.len() < 5 {
                return None;
            }
            let (repo, tag) = (cols[0], cols[1]);
            if repo == "<none>" || tag == "<none>" {
                return None;
            }
            Some(LocalImage {
                name: format!("{}:{}", repo, tag),
                id: cols[2].to_string(),
                created: cols[3].to_string(),
                size: cols[4].to_string(),
            })
        })
        .collect()
}

/// Whether docker operations can run in this environment
pub fn availability(config: &DockerConfig, containerized: bool) -> DockerAvailability {
    let socket_present = config.socket.exists();

    let (usable, reason) = if !config.enabled {
        (false, "Docker operations disabled by DOCKER_ENABLED".to_string())
    } else if containerized && !socket_present {
        (
            false,
            format!(
                "Running in a container without {} mounted",
                config.socket.display()
            ),
        )
    } else if containerized {
        (true, "Docker socket mounted into the container".to_string())
    } else {
        (true, "Using host Docker".to_string())
    };

    DockerAvailability {
        usable,
        containerized,
        enabled: config.enabled,
        socket: config.socket.display().to_string(),
        socket_present,
        reason,
    }
}

/// `{registry}/{owner/name}` lowercased
pub fn image_name(registry: &str, repository: &str) -> String {
    format!(
        "{}/{}",
        registry.trim_end_matches('/'),
        repository.trim().to_lowercase()
    )
}

/// Image tag: explicit version, then semantic version, then a UTC timestamp
pub fn version_tag(
    version: Option<&str>,
    semantic_version: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    [version, semantic_version]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| now.format("v%Y.%m.%d.%H%M").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_image_name_is_lowercased() {
        assert_eq!(
            image_name("ghcr.io", "Octo/My-App"),
            "ghcr.io/octo/my-app"
        );
        assert_eq!(image_name("ghcr.io/", "o/r"), "ghcr.io/o/r");
    }

    #[test]
    fn test_version_tag_precedence() {
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(version_tag(Some("1.2.3"), Some("2.0.0"), now), "1.2.3");
        assert_eq!(version_tag(Some("  "), Some("2.0.0"), now), "2.0.0");
        assert_eq!(version_tag(None, None, now), "v2024.05.06.0708");
    }

    #[test]
    fn test_parse_image_rows_skips_none() {
        let text = "ghcr.io/o/r\tv1\tabc123\t2024-01-01 10:00:00 +0000 UTC\t120MB\n\
                    <none>\t<none>\tdef456\t2024-01-01 09:00:00 +0000 UTC\t80MB\n\
                    garbage line\n";
        let images = parse_image_rows(text);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "ghcr.io/o/r:v1");
        assert_eq!(images[0].size, "120MB");
    }

    #[test]
    fn test_availability() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let mut config = DockerConfig {
            socket: socket.clone(),
            ..DockerConfig::default()
        };

        assert!(availability(&config, false).usable);
        assert!(!availability(&config, true).usable);

        std::fs::write(&socket, "").unwrap();
        assert!(availability(&config, true).usable);

        config.enabled = false;
        let report = availability(&config, false);
        assert!(!report.usable);
        assert!(!report.enabled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_version_of_missing_binary_is_none() {
        let docker = DockerCli::new("/nonexistent/docker-12345");
        assert!(docker.version().await.is_none());
    }
}

//! 运行环境诊断
//!
//! 容器检测、挂载路径探测和项目检测自检，全部为阻塞 IO

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::EnvConfig;
use crate::domain::environment::{
    DetectionProbe, DockerAvailability, EnvironmentReport, PathProbe, SystemSummary,
};
use crate::services::scanner;

/// 每个路径展示的样例条目数
const SAMPLE_ITEMS: usize = 5;

/// 诊断时额外检查的系统路径
const SYSTEM_PATHS: &[&str] = &["/root", "/tmp"];

/// 输出的环境变量需包含的关键字
const ENV_KEYWORDS: &[&str] = &["docker", "path", "home", "user", "pwd", "workspace"];

/// 探测单个路径
pub fn probe_path(path: &Path) -> PathProbe {
    if !path.exists() {
        return PathProbe {
            exists: false,
            is_dir: None,
            item_count: None,
            sample_items: Vec::new(),
            is_mounted: false,
            error: None,
        };
    }

    match std::fs::read_dir(path) {
        Ok(entries) => {
            let names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect();
            PathProbe {
                exists: true,
                is_dir: Some(true),
                item_count: Some(names.len()),
                is_mounted: !names.is_empty(),
                sample_items: names.into_iter().take(SAMPLE_ITEMS).collect(),
                error: None,
            }
        }
        Err(e) => PathProbe {
            exists: true,
            is_dir: Some(path.is_dir()),
            item_count: None,
            sample_items: Vec::new(),
            is_mounted: false,
            error: Some(e.to_string()),
        },
    }
}

fn env_or_unknown(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| "unknown".to_string())
}

/// 系统信息
pub fn system_summary(config: &EnvConfig) -> SystemSummary {
    SystemSummary {
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        hostname: hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string()),
        current_working_dir: std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        workspace_root: config.workspace_root.display().to_string(),
        user: env_or_unknown("USER"),
        home: env_or_unknown("HOME"),
    }
}

/// 需要检查的路径：工作区根目录 + TEST_PATHS + 系统路径，去重
fn paths_to_check(config: &EnvConfig) -> Vec<PathBuf> {
    let mut paths = vec![config.workspace_root.clone()];
    paths.extend(config.test_paths.iter().cloned());
    paths.extend(SYSTEM_PATHS.iter().map(PathBuf::from));

    let mut seen = std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
    paths
}

fn filtered_env_vars() -> BTreeMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| {
            let lower = key.to_lowercase();
            !lower.contains("token")
                && !lower.contains("secret")
                && ENV_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .collect()
}

/// 生成 GET /check-docker-environment 报告
pub fn build_report(
    config: &EnvConfig,
    docker: DockerAvailability,
    docker_cli_version: Option<String>,
) -> EnvironmentReport {
    let path_info: BTreeMap<String, PathProbe> = paths_to_check(config)
        .iter()
        .map(|p| (p.display().to_string(), probe_path(p)))
        .collect();

    let mounted_paths: Vec<String> = path_info
        .iter()
        .filter(|(_, probe)| probe.is_mounted)
        .map(|(path, _)| path.clone())
        .collect();

    let recommendation = recommend(config, &docker, &mounted_paths);

    EnvironmentReport {
        system_info: system_summary(config),
        docker,
        docker_cli_version,
        path_info,
        mounted_paths,
        recommendation,
        environment_vars: filtered_env_vars(),
    }
}

fn recommend(config: &EnvConfig, docker: &DockerAvailability, mounted: &[String]) -> String {
    let workspace = config.workspace_root.display();
    let mut hints = Vec::new();

    if config.containerized {
        if probe_path(&config.workspace_root).is_mounted {
            hints.push(format!("Projects are mounted at {}", workspace));
        } else if mounted.is_empty() {
            hints.push(format!(
                "No volumes mounted. Run with: docker run -p {}:{} -v <projects>:{} ...",
                config.port, config.port, workspace
            ));
        } else {
            hints.push(format!("Use one of these paths: {}", mounted.join(", ")));
        }
    } else {
        hints.push("Running on the host, paths are used as given".to_string());
    }

    if !docker.usable {
        hints.push(docker.reason.clone());
    }

    hints.join(". ")
}

/// 对每个路径执行项目检测（GET /test-project-detection）
pub fn test_detection(paths: &[PathBuf]) -> BTreeMap<String, DetectionProbe> {
    paths
        .iter()
        .map(|path| {
            let key = path.display().to_string();
            if !path.exists() {
                return (
                    key,
                    DetectionProbe {
                        exists: false,
                        item_count: 0,
                        projects_found: 0,
                        projects: Vec::new(),
                        error: None,
                    },
                );
            }

            let item_count = probe_path(path).item_count.unwrap_or(0);
            let probe = match scanner::detect_projects(path) {
                Ok(projects) => DetectionProbe {
                    exists: true,
                    item_count,
                    projects_found: projects.len(),
                    projects,
                    error: None,
                },
                Err(e) => DetectionProbe {
                    exists: true,
                    item_count,
                    projects_found: 0,
                    projects: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            (key, probe)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::docker::availability;

    #[test]
    fn test_probe_path() {
        let dir = tempfile::tempdir().unwrap();
        let empty = probe_path(dir.path());
        assert!(empty.exists);
        assert!(!empty.is_mounted);
        assert_eq!(empty.item_count, Some(0));

        std::fs::write(dir.path().join("a"), "").unwrap();
        let probe = probe_path(dir.path());
        assert!(probe.is_mounted);
        assert_eq!(probe.sample_items, vec!["a"]);

        let missing = probe_path(&dir.path().join("missing"));
        assert!(!missing.exists);
    }

    #[test]
    fn test_report_recommends_mount_when_workspace_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = EnvConfig {
            containerized: true,
            workspace_root: dir.path().to_path_buf(),
            test_paths: Vec::new(),
            ..EnvConfig::default()
        };
        let docker = availability(&config.docker, true);
        let report = build_report(&config, docker, None);

        assert!(report
            .path_info
            .contains_key(&dir.path().display().to_string()));
        assert!(!report.recommendation.is_empty());
        assert!(report.environment_vars.keys().all(|k| !k.to_lowercase().contains("token")));
    }

    #[test]
    fn test_detection_per_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        let missing = dir.path().join("missing");

        let results = test_detection(&[dir.path().to_path_buf(), missing.clone()]);
        let found = &results[&dir.path().display().to_string()];
        assert_eq!(found.projects_found, 1);
        assert!(!results[&missing.display().to_string()].exists);
    }
}

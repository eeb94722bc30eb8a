//! 项目扫描
//!
//! 按标记文件识别目录及其直接子目录中的项目。
//! 全部为阻塞 IO，调用方应放在 `spawn_blocking` 中执行。

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::domain::project::{FolderEntry, ProjectInfo, ProjectType};

/// 扫描时跳过的目录
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    ".vscode",
    ".idea",
    "target",
];

/// 依赖清单文件，按优先级排列
const MANIFEST_FILES: &[&str] = &[
    "requirements.txt",
    "package.json",
    "pom.xml",
    "build.gradle",
    "Cargo.toml",
    "go.mod",
];

/// 子项目的标记文件
const SUB_PROJECT_MARKERS: &[&str] = &["app.py", "package.json", "Dockerfile"];

/// 扫描错误
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Path does not exist: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn ensure_dir(path: &Path) -> Result<(), ScanError> {
    if !path.exists() {
        return Err(ScanError::NotFound(path.to_path_buf()));
    }
    if !path.is_dir() {
        return Err(ScanError::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}

/// 目录的直接子目录（已排除非项目目录），按名称排序
fn child_dirs(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded(e.file_name().to_str().unwrap_or_default()))
    {
        let entry = entry.map_err(|e| ScanError::Io {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        // 指向目录的符号链接也算
        if entry.path().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

fn is_excluded(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// 根据标记文件判断项目类型
pub fn classify(dir: &Path) -> ProjectType {
    let has = |name: &str| dir.join(name).exists();
    if has("app.py") {
        ProjectType::Flask
    } else if has("package.json") {
        ProjectType::Nodejs
    } else if has("pom.xml") || has("build.gradle") {
        ProjectType::Java
    } else if has("Cargo.toml") {
        ProjectType::Rust
    } else if has("go.mod") {
        ProjectType::Go
    } else if has("Dockerfile") {
        ProjectType::Docker
    } else {
        ProjectType::Generic
    }
}

/// 读取单个目录的标记文件
fn inspect(dir: &Path, parent: Option<String>) -> ProjectInfo {
    let manifest = MANIFEST_FILES
        .iter()
        .find(|name| dir.join(name).is_file())
        .map(|name| name.to_string());

    ProjectInfo {
        name: file_name(dir),
        path: dir.display().to_string(),
        project_type: classify(dir),
        has_git: dir.join(".git").exists(),
        has_manifest: manifest.is_some(),
        has_dockerfile: dir.join("Dockerfile").is_file(),
        has_app: dir.join("app.py").is_file(),
        has_requirements: dir.join("requirements.txt").is_file(),
        manifest,
        sub_projects: Vec::new(),
        parent,
    }
}

impl ProjectInfo {
    /// 是否存在任一标记文件（不含 .git）
    fn has_marker_file(&self) -> bool {
        self.has_app || self.has_manifest || self.has_dockerfile
    }
}

/// 检测目录中的项目
///
/// 根目录只有在包含标记文件时才算项目，单独的 `.git` 不算；
/// 直接子目录包含标记文件或 `.git` 即算项目。
pub fn detect_projects(root: &Path) -> Result<Vec<ProjectInfo>, ScanError> {
    ensure_dir(root)?;
    debug!(root = %root.display(), "Scanning directory");

    let mut projects = Vec::new();

    let root_info = inspect(root, None);
    if root_info.has_marker_file() {
        debug!(project = %root_info.name, kind = %root_info.project_type, "Root is a project");
        projects.push(root_info);
    }

    for dir in child_dirs(root)? {
        let mut info = inspect(&dir, None);
        if !info.has_marker_file() && !info.has_git {
            continue;
        }

        info.sub_projects = detect_sub_projects(&dir, &info.name)?;
        debug!(
            project = %info.name,
            kind = %info.project_type,
            sub_projects = info.sub_projects.len(),
            "Found project"
        );
        projects.push(info);
    }

    info!(root = %root.display(), count = projects.len(), "Project scan completed");
    Ok(projects)
}

fn detect_sub_projects(dir: &Path, parent: &str) -> Result<Vec<ProjectInfo>, ScanError> {
    let mut subs = Vec::new();
    for child in child_dirs(dir)? {
        if SUB_PROJECT_MARKERS.iter().any(|m| child.join(m).exists()) {
            subs.push(inspect(&child, Some(parent.to_string())));
        }
    }
    Ok(subs)
}

/// 按相关度排序：has_git、has_manifest、has_dockerfile 降序，再按名称
pub fn sort_by_relevance(projects: &mut [ProjectInfo]) {
    projects.sort_by(|a, b| {
        let key = |p: &ProjectInfo| (p.has_git, p.has_manifest, p.has_dockerfile);
        key(b).cmp(&key(a)).then_with(|| a.name.cmp(&b.name))
    });
}

/// 解析用户输入的扫描路径
///
/// 容器内时，把 Windows 盘符路径和相对路径映射到工作区根目录下。
pub fn resolve_scan_path(input: &str, containerized: bool, workspace_root: &Path) -> PathBuf {
    let input = input.trim();
    if input.is_empty() {
        return workspace_root.to_path_buf();
    }
    if !containerized {
        return PathBuf::from(input);
    }

    let as_given = Path::new(input);
    if as_given.exists() {
        return as_given.to_path_buf();
    }

    if let Some(rest) = strip_drive(input) {
        let rest = rest.replace('\\', "/");
        let rest = rest.trim_matches('/');
        let first = rest.split('/').next().unwrap_or_default();
        if rest.is_empty() || first.eq_ignore_ascii_case("users") {
            return workspace_root.to_path_buf();
        }
        return workspace_root.join(rest);
    }

    if !input.starts_with('/') {
        return workspace_root.join(input);
    }

    as_given.to_path_buf()
}

/// `C:\foo` / `d:/foo` / `E:` 去掉盘符后返回剩余部分
fn strip_drive(input: &str) -> Option<&str> {
    let bytes = input.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        match bytes.get(2) {
            None => Some(""),
            Some(b'\\') | Some(b'/') => Some(&input[3..]),
            Some(_) => None,
        }
    } else {
        None
    }
}

/// 列出目录内容（文件夹浏览器用），目录在前
pub fn list_entries(dir: &Path) -> Result<Vec<FolderEntry>, ScanError> {
    ensure_dir(dir)?;

    let io_err = |source: std::io::Error| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let metadata = match entry.metadata() {
            Ok(m) => m,
            // 断开的符号链接等
            Err(_) => continue,
        };
        let modified = metadata
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

        entries.push(FolderEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            path: entry.path().display().to_string(),
            is_dir: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified,
        });
    }

    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}

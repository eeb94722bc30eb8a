//! 项目检测领域模型

use serde::{Deserialize, Serialize};

/// 项目类型
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    Flask,
    Nodejs,
    Java,
    Rust,
    Go,
    Docker,
    Generic,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Flask => "flask",
            ProjectType::Nodejs => "nodejs",
            ProjectType::Java => "java",
            ProjectType::Rust => "rust",
            ProjectType::Go => "go",
            ProjectType::Docker => "docker",
            ProjectType::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 检测到的项目
#[derive(Clone, Debug, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub has_git: bool,
    /// 是否存在依赖清单（requirements.txt / package.json / pom.xml ...）
    pub has_manifest: bool,
    pub has_dockerfile: bool,
    pub has_app: bool,
    pub has_requirements: bool,
    /// 检测到的依赖清单文件名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    pub sub_projects: Vec<ProjectInfo>,
    /// 子项目所属的上级目录名
    pub parent: Option<String>,
}

/// 文件夹浏览条目
#[derive(Clone, Debug, Serialize)]
pub struct FolderEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// RFC3339
    pub modified: Option<String>,
}

/// 扫描结果
#[derive(Debug, Serialize)]
pub struct ProjectsResponse {
    pub projects: Vec<ProjectInfo>,
    /// 实际扫描的路径（容器内可能经过映射）
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scanned: Vec<String>,
}

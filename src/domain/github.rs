//! GitHub 相关领域模型
//!
//! `Raw*` 结构体对应 GitHub REST API 的响应，其余为返回给前端的行数据

use serde::{Deserialize, Serialize};

/// 已认证用户
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// GitHub 仓库响应（只取需要的字段）
#[derive(Clone, Debug, Deserialize)]
pub struct RawRepository {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub private: bool,
    pub html_url: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// 仓库行（前端展示用）
#[derive(Clone, Debug, Serialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub description: String,
    pub language: String,
    pub private: bool,
    pub visibility: &'static str,
    pub url: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl From<RawRepository> for Repository {
    fn from(raw: RawRepository) -> Self {
        Self {
            name: raw.name,
            full_name: raw.full_name,
            description: raw.description.unwrap_or_default(),
            language: raw.language.unwrap_or_else(|| "Unknown".to_string()),
            private: raw.private,
            visibility: if raw.private { "private" } else { "public" },
            url: raw.html_url,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        }
    }
}

/// 创建仓库请求体（发送给 GitHub）
#[derive(Clone, Debug, Serialize)]
pub struct CreateRepository {
    pub name: String,
    pub description: String,
    pub private: bool,
    /// 使用 README 初始化
    pub auto_init: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawPackageOwner {
    pub login: String,
}

/// GitHub package 响应
#[derive(Clone, Debug, Deserialize)]
pub struct RawPackage {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub package_type: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub owner: Option<RawPackageOwner>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawPackageVersion {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<RawVersionMetadata>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawVersionMetadata {
    #[serde(default)]
    pub container: Option<RawContainerMetadata>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawContainerMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 容器镜像版本
#[derive(Clone, Debug, Serialize)]
pub struct PackageVersion {
    pub id: u64,
    /// digest
    pub name: String,
    pub tags: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub url: Option<String>,
}

impl From<RawPackageVersion> for PackageVersion {
    fn from(raw: RawPackageVersion) -> Self {
        let tags = raw
            .metadata
            .and_then(|m| m.container)
            .map(|c| c.tags)
            .unwrap_or_default();
        Self {
            id: raw.id,
            name: raw.name,
            tags,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            url: raw.html_url,
        }
    }
}

/// GHCR 容器镜像
#[derive(Clone, Debug, Serialize)]
pub struct ContainerPackage {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub visibility: String,
    pub url: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub versions: usize,
    pub version_details: Vec<PackageVersion>,
}

impl ContainerPackage {
    /// 由 package 和其版本组装，版本按 updated_at 倒序
    pub fn assemble(raw: RawPackage, mut versions: Vec<PackageVersion>) -> Self {
        versions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let full_name = match &raw.owner {
            Some(owner) => format!("{}/{}", owner.login, raw.name),
            None => raw.name.clone(),
        };
        Self {
            id: raw.id,
            name: raw.name,
            full_name,
            visibility: raw.visibility.unwrap_or_else(|| "unknown".to_string()),
            url: raw.html_url,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            versions: versions.len(),
            version_details: versions,
        }
    }
}

/// 本地 Docker 镜像（`docker images` 输出的一行）
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LocalImage {
    /// repository:tag
    pub name: String,
    pub id: String,
    pub created: String,
    pub size: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_from_raw() {
        let raw: RawRepository = serde_json::from_value(serde_json::json!({
            "name": "demo",
            "full_name": "octo/demo",
            "description": null,
            "language": null,
            "private": true,
            "html_url": "https://github.com/octo/demo",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-02-01T00:00:00Z",
            "stargazers_count": 3
        }))
        .unwrap();

        let repo = Repository::from(raw);
        assert_eq!(repo.full_name, "octo/demo");
        assert_eq!(repo.description, "");
        assert_eq!(repo.language, "Unknown");
        assert_eq!(repo.visibility, "private");
    }

    #[test]
    fn test_container_package_sorts_versions_newest_first() {
        let raw: RawPackage = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "demo",
            "package_type": "container",
            "owner": { "login": "octo" }
        }))
        .unwrap();

        let versions = vec![
            PackageVersion {
                id: 1,
                name: "sha256:old".into(),
                tags: vec!["v1".into()],
                created_at: None,
                updated_at: Some("2024-01-01T00:00:00Z".into()),
                url: None,
            },
            PackageVersion {
                id: 2,
                name: "sha256:new".into(),
                tags: vec!["latest".into()],
                created_at: None,
                updated_at: Some("2024-03-01T00:00:00Z".into()),
                url: None,
            },
        ];

        let package = ContainerPackage::assemble(raw, versions);
        assert_eq!(package.full_name, "octo/demo");
        assert_eq!(package.versions, 2);
        assert_eq!(package.version_details[0].id, 2);
        assert_eq!(package.visibility, "unknown");
    }

    #[test]
    fn test_package_version_tags_from_metadata() {
        let raw: RawPackageVersion = serde_json::from_value(serde_json::json!({
            "id": 9,
            "name": "sha256:abc",
            "metadata": { "package_type": "container", "container": { "tags": ["v1", "latest"] } }
        }))
        .unwrap();
        let version = PackageVersion::from(raw);
        assert_eq!(version.tags, vec!["v1", "latest"]);
    }
}

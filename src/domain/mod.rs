//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod deploy;
pub mod environment;
pub mod github;
pub mod project;

// Re-exports for convenience
pub use deploy::{DeployRequest, DeployStage, DeployStatus, DeployTask, LogLine, StageStatus};
pub use environment::{DetectionProbe, DockerAvailability, EnvironmentReport, PathProbe};
pub use github::{ContainerPackage, CreateRepository, GitHubUser, LocalImage, Repository};
pub use project::{FolderEntry, ProjectInfo, ProjectType};

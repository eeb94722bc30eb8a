//! 基础设施模块
//!
//! 封装外部依赖（GitHub HTTP client、命令执行）

pub mod command;
pub mod github;

pub use command::{CommandError, CommandResult, CommandRunner};
pub use github::{GitHubClient, GitHubError};

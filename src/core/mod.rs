//! Ambient building blocks shared by every command: configuration, the
//! explicit invocation context and the error taxonomy.

mod config;
mod context;
mod error;

pub use config::{
    AgentConfig, Config, GeneralConfig, GitConfig, GitHubConfig, PlanningConfig, ProjectConfig,
    RequirementsConfig, StateBackend, StateConfig,
};
pub use context::{parse_remote_url, parse_repository, CommandContext};
pub use error::{ContentError, WorkflowError, WorkflowResult};

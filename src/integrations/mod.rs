//! External integrations module.
//!
//! Provides the GitHub client backing comments, state storage, permission
//! checks and project iterations, and the launcher for the planning agent.

pub mod agent;
pub mod github;

pub use agent::{clean_output, AgentOutput, AgentRunner};
pub use github::{
    permission_allows, GitHubClient, GitHubError, GitHubResult, IssueComment, User,
};

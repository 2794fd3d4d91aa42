//! Invocation context.
//!
//! Every run describes where it came from with one explicit value that the
//! caller threads into each component. Nothing reads ambient request state.

use serde::{Deserialize, Serialize};

/// The issue a command was issued on, and who issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContext {
    /// Repository owner (user or organization)
    pub owner: String,

    /// Repository name
    pub repo: String,

    /// Issue or pull request the command comment was posted on
    pub issue_number: u64,

    /// Login of the commenter, when known
    pub sender: Option<String>,
}

impl CommandContext {
    /// Create a context without a sender.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, issue_number: u64) -> Self {
        Self { owner: owner.into(), repo: repo.into(), issue_number, sender: None }
    }

    /// Attach the commenter's login.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// `owner/repo` form.
    pub fn repo_slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Split an `owner/repo` string as found in `GITHUB_REPOSITORY`.
pub fn parse_repository(value: &str) -> Option<(String, String)> {
    let (owner, repo) = value.trim().split_once('/')?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// Extract `owner/repo` from a GitHub remote URL.
///
/// Accepts `git@github.com:owner/repo.git`, `ssh://git@github.com/owner/repo`
/// and `https://github.com/owner/repo(.git)`.
pub fn parse_remote_url(url: &str) -> Option<(String, String)> {
    let url = url.trim().trim_end_matches('/');
    let path = if let Some(rest) = url.strip_prefix("git@") {
        rest.split_once(':')?.1
    } else {
        let without_scheme = url.split_once("://")?.1;
        without_scheme.split_once('/')?.1
    };
    parse_repository(path)
}

//! Boundaries to the outside world.
//!
//! The workflow only talks to GitHub and git through these traits; the
//! production implementations live in `integrations` and `git`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An issue comment as the workflow sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment id; ids grow monotonically per repository
    pub id: u64,
    /// Author login
    pub author: String,
    /// Author account type (`User`, `Bot`, ...)
    pub author_type: String,
    /// Markdown body
    pub body: String,
    /// Creation timestamp as reported by the API
    pub created_at: String,
}

/// Reads the full comment history of an issue.
#[async_trait]
pub trait CommentStream: Send + Sync {
    /// Every comment on the issue. Pagination is the implementation's job.
    async fn list_comments(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
    ) -> anyhow::Result<Vec<Comment>>;
}

/// Posts markdown comments.
#[async_trait]
pub trait CommentPoster: Send + Sync {
    /// Post a comment on an issue.
    async fn post_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> anyhow::Result<()>;
}

/// Local checkout operations needed to commit planning documents.
///
/// Paths are relative to the worktree root.
pub trait Worktree {
    /// Whether the branch exists locally or on the remote.
    fn branch_exists(&self, name: &str) -> anyhow::Result<bool>;

    /// Create a branch at `start_point` (HEAD when `None`) and check it out.
    fn create_and_switch(&self, name: &str, start_point: Option<&str>) -> anyhow::Result<()>;

    /// Check out an existing branch.
    fn switch(&self, name: &str) -> anyhow::Result<()>;

    /// Write a file, creating parent directories.
    fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()>;

    /// Add a file to the index.
    fn stage_file(&self, path: &str) -> anyhow::Result<()>;

    /// Commit the index; returns the commit id.
    fn commit(&self, message: &str) -> anyhow::Result<String>;

    /// Publish the branch to the remote.
    fn push(&self, branch: &str) -> anyhow::Result<()>;
}

/// A GitHub Projects iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    pub id: String,
    pub title: String,
    pub start_date: Option<String>,
    pub duration: Option<u32>,
}

/// Advisory lookup of project iterations.
#[async_trait]
pub trait IterationLookup: Send + Sync {
    /// Find an iteration by title in a project; `None` when absent.
    async fn find_iteration(
        &self,
        owner: &str,
        project_number: u64,
        title: &str,
    ) -> anyhow::Result<Option<Iteration>>;
}

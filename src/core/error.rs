//! Error types for the milestone workflow.

use thiserror::Error;

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised by a content store.
#[derive(Debug, Error)]
pub enum ContentError {
    /// The revision handle supplied on write no longer matches the stored blob.
    #[error("Revision conflict on {path}: the artifact was modified concurrently")]
    Conflict { path: String },

    /// The backing service rejected or failed the request.
    #[error("Content backend error: {0}")]
    Backend(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a workflow invocation.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed human command. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Loading or saving the backing state artifact failed.
    #[error("State store error: {0}")]
    Store(#[from] ContentError),

    /// A git collaborator call failed.
    #[error("Git {operation} failed: {message}")]
    Git { operation: &'static str, message: String },

    /// Listing or posting issue comments failed.
    #[error("Comment {operation} failed: {message}")]
    Comments { operation: &'static str, message: String },

    /// The run could not be prepared (configuration, checkout, permissions).
    #[error("Setup failed: {0}")]
    Setup(String),
}

impl WorkflowError {
    /// Wrap a failure from the worktree collaborator.
    pub fn git(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Git { operation, message: format!("{err:#}") }
    }

    /// Wrap a failure from the comment collaborators.
    pub fn comments(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Comments { operation, message: format!("{err:#}") }
    }

    /// Wrap a failure raised before the workflow starts.
    pub fn setup(err: &anyhow::Error) -> Self {
        Self::Setup(format!("{err:#}"))
    }

    /// Whether the error came from the human command rather than a collaborator.
    pub const fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

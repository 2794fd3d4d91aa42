//! State persistence.
//!
//! [`StateStore`] loads and saves STATE.md through a [`ContentStore`], a
//! blob-by-path API with revision handles. Writes carry the revision read
//! just before writing, so a concurrent write made in between is rejected
//! with [`ContentError::Conflict`] rather than silently overwritten. Nothing
//! stops a write landing between that re-read and the put; the check is
//! optimistic only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::codec;
use super::documents::MilestonePaths;
use super::state::{MilestoneState, Phase};
use crate::core::{ContentError, WorkflowResult};

/// A stored blob and its revision handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    pub content: String,
    pub revision: String,
}

/// Blob storage keyed by repository and path.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read a blob. `Ok(None)` when nothing is stored at `path`.
    async fn get(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<StoredContent>, ContentError>;

    /// Write a blob. `revision` must be the current handle, or `None` to
    /// create. Returns the new handle.
    async fn put(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        revision: Option<&str>,
        message: &str,
    ) -> Result<String, ContentError>;
}

/// Revision handle used by the local and in-memory stores.
pub fn content_revision(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

fn check_revision(
    path: &str,
    current: Option<&str>,
    expected: Option<&str>,
) -> Result<(), ContentError> {
    if current == expected {
        Ok(())
    } else {
        Err(ContentError::Conflict { path: path.to_string() })
    }
}

/// Content store held in memory.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: Mutex<HashMap<String, String>>,
    writes: Mutex<usize>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(owner: &str, repo: &str, path: &str) -> String {
        format!("{owner}/{repo}:{path}")
    }

    /// Seed a blob without going through revision checks.
    pub fn insert(&self, owner: &str, repo: &str, path: &str, content: impl Into<String>) {
        self.blobs.lock().insert(Self::key(owner, repo, path), content.into());
    }

    /// Current content at `path`, if any.
    pub fn content(&self, owner: &str, repo: &str, path: &str) -> Option<String> {
        self.blobs.lock().get(&Self::key(owner, repo, path)).cloned()
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<StoredContent>, ContentError> {
        Ok(self.content(owner, repo, path).map(|content| StoredContent {
            revision: content_revision(&content),
            content,
        }))
    }

    async fn put(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        revision: Option<&str>,
        _message: &str,
    ) -> Result<String, ContentError> {
        let mut blobs = self.blobs.lock();
        let key = Self::key(owner, repo, path);
        let current = blobs.get(&key).map(|c| content_revision(c));
        check_revision(path, current.as_deref(), revision)?;
        blobs.insert(key, content.to_string());
        *self.writes.lock() += 1;
        Ok(content_revision(content))
    }
}

/// Content store backed by a directory, usually the checkout itself.
///
/// `owner` and `repo` are ignored: the directory is the repository.
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory blobs are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ContentError> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                std::path::Component::ParentDir
                    | std::path::Component::RootDir
                    | std::path::Component::Prefix(_)
            )
        });
        if escapes {
            return Err(ContentError::Backend(format!("Path escapes the store root: {path}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn get(
        &self,
        _owner: &str,
        _repo: &str,
        path: &str,
    ) -> Result<Option<StoredContent>, ContentError> {
        let file = self.resolve(path)?;
        match tokio::fs::read_to_string(&file).await {
            Ok(content) => {
                Ok(Some(StoredContent { revision: content_revision(&content), content }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        revision: Option<&str>,
        _message: &str,
    ) -> Result<String, ContentError> {
        let current = self.get(owner, repo, path).await?.map(|c| c.revision);
        check_revision(path, current.as_deref(), revision)?;

        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file, content).await?;
        Ok(content_revision(content))
    }
}

/// Loads and saves [`MilestoneState`] as STATE.md.
#[derive(Clone)]
pub struct StateStore {
    content: Arc<dyn ContentStore>,
    paths: MilestonePaths,
}

impl StateStore {
    pub fn new(content: Arc<dyn ContentStore>, paths: MilestonePaths) -> Self {
        Self { content, paths }
    }

    /// Document layout used for the backing artifact.
    pub fn paths(&self) -> &MilestonePaths {
        &self.paths
    }

    /// Load a milestone's state. A missing artifact yields fresh state.
    pub async fn load(
        &self,
        owner: &str,
        repo: &str,
        milestone: u64,
    ) -> WorkflowResult<MilestoneState> {
        let path = self.paths.state(milestone);
        let Some(stored) = self.content.get(owner, repo, &path).await? else {
            tracing::debug!(milestone, path = %path, "No state artifact yet, starting fresh");
            return Ok(MilestoneState::new(milestone, Utc::now()));
        };

        let mut state = codec::decode(&stored.content);
        if state.milestone_number != milestone {
            if state.milestone_number != 0 {
                tracing::warn!(
                    milestone,
                    recorded = state.milestone_number,
                    "State artifact names another milestone, keeping the path's number"
                );
            }
            state.milestone_number = milestone;
        }
        tracing::debug!(
            milestone,
            status = %state.status,
            runs = state.workflow.run_count,
            "Loaded state"
        );
        Ok(state)
    }

    /// Encode and write state, guarded by the artifact's current revision.
    pub async fn save(
        &self,
        owner: &str,
        repo: &str,
        milestone: u64,
        state: &MilestoneState,
        phases: &[Phase],
    ) -> WorkflowResult<()> {
        let path = self.paths.state(milestone);
        let content = codec::encode(state, phases);

        let revision = self.content.get(owner, repo, &path).await?.map(|c| c.revision);
        let message = if revision.is_some() {
            format!("chore(milestone-{milestone}): update state")
        } else {
            format!("chore(milestone-{milestone}): initialize state")
        };
        self.content.put(owner, repo, &path, &content, revision.as_deref(), &message).await?;
        tracing::debug!(milestone, path = %path, "Saved state");
        Ok(())
    }
}

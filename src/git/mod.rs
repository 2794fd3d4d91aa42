//! Git integration module.
//!
//! [`GitWorktree`] is the `git2`-backed [`Worktree`]: it creates and checks
//! out milestone branches, writes and stages planning documents, commits
//! them and pushes the branch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Cred, Direction, ErrorCode, FetchOptions, IndexAddOption, PushOptions,
    RemoteCallbacks, Repository, Signature,
};

use crate::core::GitConfig;
use crate::workflow::Worktree;

/// A local checkout the bot commits into.
pub struct GitWorktree {
    repo: Repository,
    author_name: String,
    author_email: String,
    remote: String,
    token: Option<String>,
}

impl GitWorktree {
    /// Open a Git repository from the given path.
    ///
    /// This will search up the directory tree to find a Git repository.
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = Repository::discover(path)
            .with_context(|| format!("No git repository at {}", path.display()))?;
        Ok(Self::from_repository(repo))
    }

    /// Open a Git repository at the exact path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path)
            .with_context(|| format!("Failed to open git repository at {}", path.display()))?;
        Ok(Self::from_repository(repo))
    }

    fn from_repository(repo: Repository) -> Self {
        let defaults = GitConfig::default();
        Self {
            repo,
            author_name: defaults.author_name,
            author_email: defaults.author_email,
            remote: defaults.remote,
            token: None,
        }
    }

    /// Apply author and remote settings.
    #[must_use]
    pub fn with_config(mut self, config: &GitConfig) -> Self {
        self.author_name = config.author_name.clone();
        self.author_email = config.author_email.clone();
        self.remote = config.remote.clone();
        self
    }

    /// Token used for HTTPS pushes.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Get the repository root path.
    #[must_use]
    pub fn root(&self) -> Option<PathBuf> {
        self.repo.workdir().map(Path::to_path_buf)
    }

    /// Get the current branch name.
    #[must_use]
    pub fn current_branch(&self) -> Option<String> {
        match self.repo.head() {
            Ok(head) if head.is_branch() => head.shorthand().ok().map(String::from),
            Ok(_) => None,
            // Unborn branch: HEAD names a branch with no commits yet
            Err(_) => self
                .repo
                .find_reference("HEAD")
                .ok()
                .and_then(|r| r.symbolic_target().ok().flatten().map(String::from))
                .map(|target| target.trim_start_matches("refs/heads/").to_string()),
        }
    }

    /// Get the URL of the configured remote.
    #[must_use]
    pub fn remote_url(&self) -> Option<String> {
        self.repo.find_remote(&self.remote).ok().and_then(|r| r.url().ok().map(String::from))
    }

    /// Get all local branch names.
    #[must_use]
    pub fn branches(&self) -> Vec<String> {
        self.repo
            .branches(Some(BranchType::Local))
            .ok()
            .map(|branches| {
                branches
                    .filter_map(std::result::Result::ok)
                    .filter_map(|(branch, _)| branch.name().ok().flatten().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn workdir(&self) -> Result<&Path> {
        self.repo.workdir().context("Repository has no working directory")
    }

    fn remote_branch(&self, name: &str) -> Option<git2::Branch<'_>> {
        self.repo.find_branch(&format!("{}/{name}", self.remote), BranchType::Remote).ok()
    }

    fn callbacks(&self) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        let token = self.token.clone();
        callbacks.credentials(move |_url, username, _allowed| match &token {
            Some(token) => Cred::userpass_plaintext("x-access-token", token),
            None => Cred::default().or_else(|_| Cred::username(username.unwrap_or("git"))),
        });
        callbacks
    }

    /// Fetch `name` from the remote into its remote-tracking ref.
    ///
    /// Shallow or single-branch checkouts only know the default branch, so
    /// the remote is asked directly. Returns whether the remote has it.
    fn fetch_remote_branch(&self, name: &str) -> Result<bool> {
        let Ok(mut remote) = self.repo.find_remote(&self.remote) else {
            tracing::debug!(remote = %self.remote, "No remote configured");
            return Ok(false);
        };

        let refname = format!("refs/heads/{name}");
        let advertised = {
            let connection = remote
                .connect_auth(Direction::Fetch, Some(self.callbacks()), None)
                .with_context(|| format!("Failed to connect to {}", self.remote))?;
            let found = connection.list()?.iter().any(|head| head.name() == refname);
            found
        };
        if !advertised {
            return Ok(false);
        }

        let refspec = format!("+{refname}:refs/remotes/{}/{name}", self.remote);
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks());
        remote
            .fetch(&[refspec.as_str()], Some(&mut options), None)
            .with_context(|| format!("Failed to fetch {name} from {}", self.remote))?;
        tracing::debug!(branch = %name, remote = %self.remote, "Fetched remote branch");
        Ok(true)
    }

    fn head_is_unborn(&self) -> bool {
        matches!(self.repo.head(), Err(e) if e.code() == ErrorCode::UnbornBranch)
    }

    fn checkout_branch(&self, name: &str) -> Result<()> {
        let refname = format!("refs/heads/{name}");
        let object = self
            .repo
            .revparse_single(&refname)
            .with_context(|| format!("Branch {name} not found"))?;
        self.repo
            .checkout_tree(&object, Some(CheckoutBuilder::new().safe()))
            .with_context(|| format!("Failed to check out {name}"))?;
        self.repo.set_head(&refname)?;
        Ok(())
    }
}

impl Worktree for GitWorktree {
    fn branch_exists(&self, name: &str) -> Result<bool> {
        if self.repo.find_branch(name, BranchType::Local).is_ok() {
            return Ok(true);
        }
        if self.fetch_remote_branch(name)? {
            return Ok(true);
        }
        Ok(self.remote_branch(name).is_some())
    }

    fn create_and_switch(&self, name: &str, start_point: Option<&str>) -> Result<()> {
        if start_point.is_none() && self.head_is_unborn() {
            // Nothing to branch from yet; the first commit creates the branch.
            self.repo.set_head(&format!("refs/heads/{name}"))?;
            return Ok(());
        }

        let commit = match start_point {
            Some(rev) => self
                .repo
                .revparse_single(rev)
                .and_then(|o| o.peel_to_commit())
                .with_context(|| format!("Unknown start point {rev}"))?,
            None => self.repo.head()?.peel_to_commit()?,
        };
        self.repo
            .branch(name, &commit, false)
            .with_context(|| format!("Failed to create branch {name}"))?;
        self.checkout_branch(name)?;
        tracing::info!(branch = %name, "Created branch");
        Ok(())
    }

    fn switch(&self, name: &str) -> Result<()> {
        if self.repo.find_branch(name, BranchType::Local).is_err() {
            // Only on the remote: start a local branch from it.
            let remote = self
                .remote_branch(name)
                .with_context(|| format!("Branch {name} does not exist"))?;
            let commit = remote.get().peel_to_commit()?;
            let mut local = self.repo.branch(name, &commit, false)?;
            // Single-branch fetch refspecs do not map this ref, so tracking can fail.
            if let Err(e) = local.set_upstream(Some(&format!("{}/{name}", self.remote))) {
                tracing::debug!(branch = %name, error = %e, "Could not set upstream");
            }
        }
        if self.current_branch().as_deref() == Some(name) {
            return Ok(());
        }
        self.checkout_branch(name)?;
        tracing::debug!(branch = %name, "Switched branch");
        Ok(())
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let file = self.workdir()?.join(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&file, content).with_context(|| format!("Failed to write {path}"))?;
        Ok(())
    }

    fn stage_file(&self, path: &str) -> Result<()> {
        let mut index = self.repo.index()?;
        index
            .add_all([path], IndexAddOption::FORCE, None)
            .with_context(|| format!("Failed to stage {path}"))?;
        index.write()?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let parent =
            if self.head_is_unborn() { None } else { Some(self.repo.head()?.peel_to_commit()?) };
        if let Some(parent) = &parent {
            if parent.tree_id() == tree_id {
                tracing::debug!("Index matches HEAD, nothing to commit");
                return Ok(parent.id().to_string());
            }
        }

        let signature = Signature::now(&self.author_name, &self.author_email)?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .context("Failed to create commit")?;
        tracing::info!(commit = %oid, "Committed");
        Ok(oid.to_string())
    }

    fn push(&self, branch: &str) -> Result<()> {
        let mut remote = self
            .repo
            .find_remote(&self.remote)
            .with_context(|| format!("Remote {} not configured", self.remote))?;

        let mut callbacks = self.callbacks();
        callbacks.push_update_reference(|refname, status| match status {
            Some(message) => Err(git2::Error::from_str(&format!("{refname} rejected: {message}"))),
            None => Ok(()),
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        remote
            .push(&[refspec.as_str()], Some(&mut options))
            .with_context(|| format!("Failed to push {branch} to {}", self.remote))?;
        tracing::info!(branch = %branch, remote = %self.remote, "Pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() -> (tempfile::TempDir, GitWorktree) {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let worktree = GitWorktree::open(dir.path()).unwrap();
        (dir, worktree)
    }

    #[test]
    fn test_unborn_head_branch() {
        let (_dir, worktree) = init();
        assert!(!worktree.branch_exists("gsd/1").unwrap());
        worktree.create_and_switch("gsd/1", None).unwrap();
        assert_eq!(worktree.current_branch().as_deref(), Some("gsd/1"));

        worktree.write_file("a/b.md", "hello").unwrap();
        worktree.stage_file("a/b.md").unwrap();
        let first = worktree.commit("first").unwrap();
        assert!(worktree.branch_exists("gsd/1").unwrap());
        assert_eq!(worktree.branches(), vec!["gsd/1".to_string()]);

        // Same tree again: no new commit.
        assert_eq!(worktree.commit("again").unwrap(), first);
    }

    #[test]
    fn test_discover_from_subdirectory() {
        let (dir, _worktree) = init();
        let nested = dir.path().join("nested/deeper");
        std::fs::create_dir_all(&nested).unwrap();
        let found = GitWorktree::discover(&nested).unwrap();
        let root = found.root().unwrap();
        assert_eq!(root.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_open_missing_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitWorktree::open(dir.path()).is_err());
    }
}

//! Git Worktree Integration Tests
//!
//! Runs the milestone flow against real repositories in temp directories,
//! pushing to a bare repository standing in for the remote.

#![cfg(feature = "git")]

use std::sync::Arc;

use async_trait::async_trait;
use git2::build::CheckoutBuilder;
use git2::Repository;
use parking_lot::Mutex;

use gsdbot::core::CommandContext;
use gsdbot::workflow::{
    decode, CommentPoster, LocalContentStore, MilestoneOrchestrator, MilestoneOutcome,
    MilestonePaths, MilestoneReport, OrchestratorSettings, StateStore, Worktree,
};
use gsdbot::GitWorktree;

#[derive(Default)]
struct RecordingPoster {
    posts: Mutex<Vec<String>>,
}

#[async_trait]
impl CommentPoster for RecordingPoster {
    async fn post_comment(
        &self,
        _owner: &str,
        _repo: &str,
        _issue_number: u64,
        body: &str,
    ) -> anyhow::Result<()> {
        self.posts.lock().push(body.to_string());
        Ok(())
    }
}

/// A fresh repository with a bare `origin`.
fn repo_with_remote() -> (tempfile::TempDir, tempfile::TempDir, GitWorktree) {
    let work = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    Repository::init_bare(remote.path()).unwrap();
    let repo = Repository::init(work.path()).unwrap();
    repo.remote("origin", remote.path().to_str().unwrap()).unwrap();
    let worktree = GitWorktree::open(work.path()).unwrap();
    (work, remote, worktree)
}

/// A bare remote whose `main` holds a README, plus the checkout that seeded it.
fn seeded_remote() -> (tempfile::TempDir, tempfile::TempDir, GitWorktree) {
    let (seed, remote, worktree) = repo_with_remote();
    worktree.create_and_switch("main", None).unwrap();
    worktree.write_file("README.md", "# widgets\n").unwrap();
    worktree.stage_file("README.md").unwrap();
    worktree.commit("init").unwrap();
    worktree.push("main").unwrap();
    (seed, remote, worktree)
}

/// A CI-style checkout that fetched only `main` from `remote`.
fn single_branch_checkout(remote: &std::path::Path) -> (tempfile::TempDir, GitWorktree) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let refspec = "+refs/heads/main:refs/remotes/origin/main";
    {
        let mut origin =
            repo.remote_with_fetch("origin", remote.to_str().unwrap(), refspec).unwrap();
        origin.fetch(&[refspec], None, None).unwrap();
        let commit =
            repo.find_reference("refs/remotes/origin/main").unwrap().peel_to_commit().unwrap();
        repo.branch("main", &commit, false).unwrap();
    }
    repo.set_head("refs/heads/main").unwrap();
    repo.checkout_head(Some(CheckoutBuilder::new().force())).unwrap();
    assert!(repo.find_reference("refs/remotes/origin/gsd/7").is_err());

    let worktree = GitWorktree::open(dir.path()).unwrap();
    (dir, worktree)
}

fn head_message(path: &std::path::Path) -> String {
    let repo = Repository::open(path).unwrap();
    let commit = repo.head().unwrap().peel_to_commit().unwrap();
    commit.message().unwrap_or_default().to_string()
}

// ============================================================================
// Worktree Operations
// ============================================================================

#[test]
fn test_commit_on_unborn_branch_then_branch_off() {
    let (work, _remote, worktree) = repo_with_remote();

    worktree.create_and_switch("gsd/1", None).unwrap();
    worktree.write_file("docs/notes.md", "hello\n").unwrap();
    worktree.stage_file("docs/notes.md").unwrap();
    let first = worktree.commit("docs: add notes").unwrap();
    assert_eq!(worktree.current_branch().as_deref(), Some("gsd/1"));
    assert!(worktree.branch_exists("gsd/1").unwrap());

    // Nothing changed: no new commit
    worktree.stage_file("docs/notes.md").unwrap();
    assert_eq!(worktree.commit("docs: again").unwrap(), first);

    worktree.create_and_switch("gsd/2", None).unwrap();
    assert_eq!(worktree.current_branch().as_deref(), Some("gsd/2"));
    worktree.write_file("docs/notes.md", "changed\n").unwrap();
    worktree.stage_file("docs/notes.md").unwrap();
    let second = worktree.commit("docs: change notes").unwrap();
    assert_ne!(first, second);

    worktree.switch("gsd/1").unwrap();
    let content = std::fs::read_to_string(work.path().join("docs/notes.md")).unwrap();
    assert_eq!(content, "hello\n");

    let mut branches = worktree.branches();
    branches.sort();
    assert_eq!(branches, vec!["gsd/1", "gsd/2"]);
}

#[test]
fn test_switch_to_missing_branch_fails() {
    let (_work, _remote, worktree) = repo_with_remote();
    worktree.create_and_switch("main", None).unwrap();
    worktree.write_file("README.md", "x").unwrap();
    worktree.stage_file("README.md").unwrap();
    worktree.commit("init").unwrap();

    assert!(!worktree.branch_exists("gsd/9").unwrap());
    assert!(worktree.switch("gsd/9").is_err());
}

#[test]
fn test_push_to_bare_remote() {
    let (_work, remote, worktree) = repo_with_remote();
    worktree.create_and_switch("gsd/3", None).unwrap();
    worktree.write_file("a.md", "a").unwrap();
    worktree.stage_file("a.md").unwrap();
    let commit = worktree.commit("add a").unwrap();

    worktree.push("gsd/3").unwrap();

    let bare = Repository::open_bare(remote.path()).unwrap();
    let pushed = bare.find_reference("refs/heads/gsd/3").unwrap();
    assert_eq!(pushed.target().unwrap().to_string(), commit);
}

#[test]
fn test_branch_only_on_remote_is_found_and_tracked() {
    let (_seed, remote, seed) = seeded_remote();
    seed.create_and_switch("gsd/7", None).unwrap();
    seed.write_file(".planning/milestones/7/STATE.md", "# Milestone 7 State\n").unwrap();
    seed.stage_file(".planning/milestones/7/STATE.md").unwrap();
    let pushed = seed.commit("docs(milestone-7): state").unwrap();
    seed.push("gsd/7").unwrap();

    let (ci, worktree) = single_branch_checkout(remote.path());
    assert!(worktree.branch_exists("gsd/7").unwrap());
    assert!(!worktree.branch_exists("gsd/8").unwrap());

    worktree.switch("gsd/7").unwrap();
    assert_eq!(worktree.current_branch().as_deref(), Some("gsd/7"));
    let repo = Repository::open(ci.path()).unwrap();
    assert_eq!(repo.head().unwrap().target().unwrap().to_string(), pushed);
    assert!(ci.path().join(".planning/milestones/7/STATE.md").is_file());
}

// ============================================================================
// Milestone Flow
// ============================================================================

async fn run_milestone(checkout: &std::path::Path, worktree: &GitWorktree) -> MilestoneReport {
    let store = StateStore::new(
        Arc::new(LocalContentStore::new(checkout)),
        MilestonePaths::default(),
    );
    let poster = RecordingPoster::default();
    let settings = OrchestratorSettings { push: true, ..OrchestratorSettings::default() };
    let orchestrator = MilestoneOrchestrator::new(&store, &poster, worktree, settings);
    let ctx = CommandContext::new("octo", "widgets", 42);

    match orchestrator.run(&ctx, "7 Add OAuth2 login").await.unwrap() {
        MilestoneOutcome::MilestoneCreated(report) => report,
        other => panic!("expected milestone-created, got {}", other.phase()),
    }
}

#[tokio::test]
async fn test_fresh_checkouts_resume_committed_state() {
    let (_seed, remote, _) = seeded_remote();

    let (first_dir, first) = single_branch_checkout(remote.path());
    let report = run_milestone(first_dir.path(), &first).await;
    assert!(report.branch_created);
    assert_eq!(report.run_count, 1);

    // A new job starts from a checkout of main that has never seen gsd/7
    let (second_dir, second) = single_branch_checkout(remote.path());
    let report = run_milestone(second_dir.path(), &second).await;
    assert!(!report.branch_created);
    assert_eq!(report.run_count, 2);

    let bare = Repository::open_bare(remote.path()).unwrap();
    let tip = bare.find_reference("refs/heads/gsd/7").unwrap();
    assert_eq!(tip.target().unwrap().to_string(), report.commit);

    // The same checkout moved back to main also resumes
    second.switch("main").unwrap();
    assert!(!second_dir.path().join(".planning/milestones/7/STATE.md").exists());
    let report = run_milestone(second_dir.path(), &second).await;
    assert_eq!(report.run_count, 3);

    let raw =
        std::fs::read_to_string(second_dir.path().join(".planning/milestones/7/STATE.md")).unwrap();
    assert_eq!(decode(&raw).workflow.run_count, 3);
}

#[tokio::test]
async fn test_milestone_flow_commits_and_pushes() {
    let (work, remote, worktree) = repo_with_remote();
    let store = StateStore::new(
        Arc::new(LocalContentStore::new(work.path())),
        MilestonePaths::default(),
    );
    let poster = RecordingPoster::default();
    let settings = OrchestratorSettings { push: true, ..OrchestratorSettings::default() };
    let orchestrator = MilestoneOrchestrator::new(&store, &poster, &worktree, settings);
    let ctx = CommandContext::new("octo", "widgets", 42);

    let outcome = orchestrator.run(&ctx, "7 Add OAuth2 login").await.unwrap();
    let MilestoneOutcome::MilestoneCreated(first) = outcome else {
        panic!("expected milestone-created");
    };
    assert!(first.branch_created);
    assert!(first.pushed);
    assert!(head_message(work.path()).starts_with("docs(milestone-7): update PROJECT.md"));

    let bare = Repository::open_bare(remote.path()).unwrap();
    let pushed = bare.find_reference("refs/heads/gsd/7").unwrap();
    assert_eq!(pushed.target().unwrap().to_string(), first.commit);

    let planning = work.path().join(".planning/milestones/7");
    for name in ["PROJECT.md", "STATE.md", "ROADMAP.md"] {
        assert!(planning.join(name).is_file(), "{name} missing");
    }

    // Second run reuses the branch and records another run
    let outcome = orchestrator.run(&ctx, "7 Add OAuth2 login").await.unwrap();
    let MilestoneOutcome::MilestoneCreated(second) = outcome else {
        panic!("expected milestone-created");
    };
    assert!(!second.branch_created);
    assert_ne!(first.commit, second.commit);

    let state = decode(&std::fs::read_to_string(planning.join("STATE.md")).unwrap());
    assert_eq!(state.workflow.run_count, 2);
    assert_eq!(poster.posts.lock().len(), 2);

    // The saved state matches what was committed, so the tree is clean
    let repo = Repository::open(work.path()).unwrap();
    let statuses = repo.statuses(None).unwrap();
    assert!(statuses.iter().all(|s| s.status().is_empty() || s.status().is_ignored()));
}

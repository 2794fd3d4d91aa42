//! Milestone workflow orchestration.
//!
//! One invocation of the milestone command:
//!
//! ```text
//! entry ─┬─ delegated ──────────────────────────────────────────▶ gsd-managed
//!        └─ traditional ─▶ branch ─▶ load ─▶ requirements ─▶ documents
//!                           ─▶ commit ─▶ save ─▶ iteration check ─▶ summary
//!                           ─▶ milestone-created
//! ```
//!
//! The milestone branch is checked out before state is loaded, so a store
//! backed by the working tree reads the STATE.md committed by earlier runs.
//! The delegated branch returns before any collaborator is touched. Every
//! fatal error on the traditional branch is logged, reported on the issue as
//! a best-effort comment and returned to the caller.

use chrono::Utc;
use serde::Serialize;

use super::collaborators::{CommentPoster, IterationLookup, Worktree};
use super::documents::{self, GeneratedDocument, MilestoneData};
use super::entry::Entry;
use super::requirements::{default_questions, Question};
use super::state::MilestoneStatus;
use super::store::StateStore;
use super::summary;
use crate::core::{CommandContext, Config, WorkflowError, WorkflowResult};

/// Knobs the orchestrator takes from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Branch name prefix; the milestone number is appended
    pub branch_prefix: String,

    /// Project board checked for a matching iteration; `None` skips the check
    pub project_number: Option<u64>,

    /// Iteration title template, `{n}` is the milestone number
    pub iteration_title: String,

    /// Push the milestone branch after committing
    pub push: bool,

    /// Question set used to compute pending requirements
    pub questions: Vec<Question>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            branch_prefix: "gsd/".to_string(),
            project_number: None,
            iteration_title: "Milestone {n}".to_string(),
            push: false,
            questions: default_questions(),
        }
    }
}

impl OrchestratorSettings {
    /// Settings from loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            branch_prefix: config.git.branch_prefix.clone(),
            project_number: config.project.number,
            iteration_title: config.project.iteration_title.clone(),
            push: config.git.push,
            questions: config.requirements.questions.clone(),
        }
    }

    /// Branch holding a milestone's documents.
    pub fn branch_name(&self, milestone: u64) -> String {
        format!("{}{milestone}", self.branch_prefix)
    }

    /// Iteration title expected on the project board.
    pub fn iteration_title(&self, milestone: u64) -> String {
        self.iteration_title.replace("{n}", &milestone.to_string())
    }
}

/// Result of the advisory project-iteration check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum IterationCheck {
    /// The board has a matching iteration
    Found { id: String, title: String },
    /// The board has no iteration with the expected title
    Missing { title: String },
    /// No project is configured or no lookup is available
    Skipped,
    /// The lookup itself failed
    Failed { message: String },
}

impl IterationCheck {
    /// Warning to surface in next steps, if the check did not pass.
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::Missing { title } => Some(format!(
                "⚠️ No project iteration named \"{title}\" was found. Create it so the milestone \
                 shows up on the board."
            )),
            Self::Failed { message } => {
                Some(format!("⚠️ Could not verify the project iteration: {message}"))
            }
            Self::Found { .. } | Self::Skipped => None,
        }
    }
}

/// What the traditional flow produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneReport {
    pub milestone_number: u64,
    pub title: String,
    pub description: String,
    pub branch: String,
    /// False when the branch already existed and was switched to
    pub branch_created: bool,
    pub commit: String,
    pub pushed: bool,
    /// Repository paths of the generated documents
    pub files: Vec<String>,
    pub status: MilestoneStatus,
    pub run_count: u32,
    pub iteration: IterationCheck,
    pub next_steps: Vec<String>,
}

/// Terminal outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "kebab-case")]
pub enum MilestoneOutcome {
    /// No milestone number; the agent takes over
    GsdManaged { description: String },
    /// Documents generated, committed and summarized
    MilestoneCreated(MilestoneReport),
}

impl MilestoneOutcome {
    /// Phase name as reported to callers.
    pub const fn phase(&self) -> &'static str {
        match self {
            Self::GsdManaged { .. } => "gsd-managed",
            Self::MilestoneCreated(_) => "milestone-created",
        }
    }

    /// Both outcomes finish the invocation.
    pub const fn is_complete(&self) -> bool {
        true
    }

    /// JSON result object, `{"complete": true, "phase": ..., ...}`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not serialize outcome");
            serde_json::json!({ "phase": self.phase() })
        });
        if let Some(object) = value.as_object_mut() {
            object.insert("complete".to_string(), serde_json::Value::Bool(self.is_complete()));
        }
        value
    }
}

/// Drives one milestone command against its collaborators.
pub struct MilestoneOrchestrator<'a> {
    store: &'a StateStore,
    poster: &'a dyn CommentPoster,
    worktree: &'a dyn Worktree,
    iterations: Option<&'a dyn IterationLookup>,
    settings: OrchestratorSettings,
}

impl<'a> MilestoneOrchestrator<'a> {
    pub fn new(
        store: &'a StateStore,
        poster: &'a dyn CommentPoster,
        worktree: &'a dyn Worktree,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { store, poster, worktree, iterations: None, settings }
    }

    /// Enable the advisory project-iteration check.
    pub fn with_iteration_lookup(mut self, lookup: &'a dyn IterationLookup) -> Self {
        self.iterations = Some(lookup);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run the milestone command for `args`.
    ///
    /// On failure an error comment is posted on the issue (best effort) and
    /// the original error is returned.
    pub async fn run(&self, ctx: &CommandContext, args: &str) -> WorkflowResult<MilestoneOutcome> {
        match self.run_inner(ctx, args).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!(
                    repo = %ctx.repo_slug(),
                    issue = ctx.issue_number,
                    error = %err,
                    "Milestone command failed"
                );
                let body = summary::format_error_comment(&err, "milestone");
                if let Err(post_err) =
                    self.poster.post_comment(&ctx.owner, &ctx.repo, ctx.issue_number, &body).await
                {
                    tracing::warn!(error = %post_err, "Could not post error comment");
                }
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        ctx: &CommandContext,
        args: &str,
    ) -> WorkflowResult<MilestoneOutcome> {
        match Entry::parse(args)? {
            Entry::Delegated { description } => {
                tracing::info!(issue = ctx.issue_number, "No milestone number, delegating");
                Ok(MilestoneOutcome::GsdManaged { description })
            }
            Entry::Traditional { number, description } => {
                let report = self.create_milestone(ctx, number, &description).await?;
                Ok(MilestoneOutcome::MilestoneCreated(report))
            }
        }
    }

    async fn create_milestone(
        &self,
        ctx: &CommandContext,
        number: u64,
        description: &str,
    ) -> WorkflowResult<MilestoneReport> {
        let now = Utc::now();
        tracing::info!(milestone = number, repo = %ctx.repo_slug(), "Creating milestone");

        let branch = self.settings.branch_name(number);
        let branch_created = self.checkout_branch(&branch)?;

        let mut state = self.store.load(&ctx.owner, &ctx.repo, number).await?;
        state.record_run(now);

        // This flow takes the description as the whole answer set.
        state.record_answer("scope", description);
        state.record_answer("features", description);
        state.mark_requirements_complete();
        state.refresh_pending(&self.settings.questions);

        let data = MilestoneData::from_state(ctx, &state, description, now);
        let docs = documents::generate_all(&data, self.store.paths());

        let commit = self.commit_documents(number, &docs)?;
        let pushed = if self.settings.push {
            self.worktree.push(&branch).map_err(|e| WorkflowError::git("push", &e))?;
            tracing::info!(branch = %branch, "Pushed milestone branch");
            true
        } else {
            false
        };

        self.store.save(&ctx.owner, &ctx.repo, number, &state, &data.phases).await?;

        let iteration = self.check_iteration(&ctx.owner, number).await;
        let mut next_steps = vec![
            format!("Review the planning documents on branch `{branch}`."),
            format!(
                "Break the milestone into phases in `{}`.",
                self.store.paths().file(number, documents::ROADMAP_FILE)
            ),
            "Open a pull request when the plan is ready for review.".to_string(),
        ];
        next_steps.extend(iteration.warning());

        let report = MilestoneReport {
            milestone_number: number,
            title: data.title.clone(),
            description: description.to_string(),
            branch,
            branch_created,
            commit,
            pushed,
            files: docs.iter().map(|d| d.path.clone()).collect(),
            status: state.status,
            run_count: state.workflow.run_count,
            iteration,
            next_steps,
        };

        let body = summary::format_milestone_summary(&report);
        self.poster
            .post_comment(&ctx.owner, &ctx.repo, ctx.issue_number, &body)
            .await
            .map_err(|e| WorkflowError::comments("post", &e))?;

        tracing::info!(milestone = number, branch = %report.branch, "Milestone created");
        Ok(report)
    }

    /// Switch to the milestone branch, creating it first if needed.
    /// Returns whether it was created.
    fn checkout_branch(&self, branch: &str) -> WorkflowResult<bool> {
        let exists = self
            .worktree
            .branch_exists(branch)
            .map_err(|e| WorkflowError::git("branch lookup", &e))?;
        if exists {
            tracing::debug!(branch = %branch, "Switching to existing branch");
            self.worktree.switch(branch).map_err(|e| WorkflowError::git("switch", &e))?;
            Ok(false)
        } else {
            tracing::debug!(branch = %branch, "Creating branch");
            self.worktree
                .create_and_switch(branch, None)
                .map_err(|e| WorkflowError::git("branch creation", &e))?;
            Ok(true)
        }
    }

    fn commit_documents(&self, number: u64, docs: &[GeneratedDocument]) -> WorkflowResult<String> {
        for doc in docs {
            self.worktree
                .write_file(&doc.path, &doc.content)
                .map_err(|e| WorkflowError::git("write", &e))?;
            self.worktree.stage_file(&doc.path).map_err(|e| WorkflowError::git("stage", &e))?;
        }
        let message = commit_message(number, docs);
        let commit = self.worktree.commit(&message).map_err(|e| WorkflowError::git("commit", &e))?;
        tracing::debug!(commit = %commit, "Committed planning documents");
        Ok(commit)
    }

    async fn check_iteration(&self, owner: &str, number: u64) -> IterationCheck {
        let (Some(lookup), Some(project)) = (self.iterations, self.settings.project_number) else {
            return IterationCheck::Skipped;
        };
        let title = self.settings.iteration_title(number);
        match lookup.find_iteration(owner, project, &title).await {
            Ok(Some(iteration)) => {
                IterationCheck::Found { id: iteration.id, title: iteration.title }
            }
            Ok(None) => {
                tracing::warn!(project, title = %title, "Project iteration not found");
                IterationCheck::Missing { title }
            }
            Err(e) => {
                tracing::warn!(project, error = %e, "Project iteration lookup failed");
                IterationCheck::Failed { message: format!("{e:#}") }
            }
        }
    }
}

/// Conventional commit message naming every generated file.
pub fn commit_message(number: u64, docs: &[GeneratedDocument]) -> String {
    let names: Vec<&str> = docs.iter().map(|d| d.name).collect();
    let mut message = format!("docs(milestone-{number}): update {}\n\n", names.join(", "));
    message.push_str("Planning documents:\n");
    for doc in docs {
        message.push_str(&format!("- {}\n", doc.path));
    }
    message
}

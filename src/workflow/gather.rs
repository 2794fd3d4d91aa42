//! Multi-turn requirements session.
//!
//! Each run reads the comments that arrived since the last run, folds them
//! into the answer set and either asks the remaining questions again or
//! announces that requirements are complete. The milestone command does not
//! use this path; it is driven separately (`gsdbot answer`).

use chrono::Utc;
use serde::Serialize;

use super::collaborators::{CommentPoster, CommentStream};
use super::requirements::{format_questions, is_complete, new_comments, parse_answers, Question};
use super::state::MilestoneStatus;
use super::store::StateStore;
use super::summary;
use crate::core::{CommandContext, WorkflowError, WorkflowResult};

/// Outcome of one session run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherReport {
    pub milestone_number: u64,
    /// Comments folded into the answers on this run
    pub consumed_comments: usize,
    pub answered: Vec<String>,
    pub pending: Vec<String>,
    pub complete: bool,
    pub status: MilestoneStatus,
}

/// Requirements Q&A over issue comments.
pub struct RequirementsSession<'a> {
    store: &'a StateStore,
    comments: &'a dyn CommentStream,
    poster: &'a dyn CommentPoster,
    questions: Vec<Question>,
    bot_login: Option<String>,
}

impl<'a> RequirementsSession<'a> {
    pub fn new(
        store: &'a StateStore,
        comments: &'a dyn CommentStream,
        poster: &'a dyn CommentPoster,
        questions: Vec<Question>,
    ) -> Self {
        Self { store, comments, poster, questions, bot_login: None }
    }

    /// Also treat comments from this login as the bot's own.
    pub fn with_bot_login(mut self, login: impl Into<String>) -> Self {
        self.bot_login = Some(login.into());
        self
    }

    /// Process new comments for `milestone`, persist state and reply.
    pub async fn run(&self, ctx: &CommandContext, milestone: u64) -> WorkflowResult<GatherReport> {
        match self.run_inner(ctx, milestone).await {
            Ok(report) => Ok(report),
            Err(err) => {
                tracing::error!(milestone, error = %err, "Requirements session failed");
                let body = summary::format_error_comment(&err, "answer");
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
        milestone: u64,
    ) -> WorkflowResult<GatherReport> {
        let mut state = self.store.load(&ctx.owner, &ctx.repo, milestone).await?;
        state.record_run(Utc::now());

        let all = self
            .comments
            .list_comments(&ctx.owner, &ctx.repo, ctx.issue_number)
            .await
            .map_err(|e| WorkflowError::comments("list", &e))?;
        let fresh = new_comments(&all, state.workflow.last_comment_id, self.bot_login.as_deref());
        tracing::debug!(milestone, total = all.len(), new = fresh.len(), "Reading answers");

        for comment in &fresh {
            state.requirements.answered =
                parse_answers(&comment.body, &self.questions, &state.requirements.answered);
            state.observe_comment(comment.id);
        }
        state.refresh_pending(&self.questions);

        let body = if is_complete(&state, &self.questions) {
            state.mark_requirements_complete();
            tracing::info!(milestone, "Requirements complete");
            summary::format_requirements_complete(milestone, &state.requirements.answered)
        } else {
            format_questions(&self.questions, &state.requirements.answered)
        };

        let phases = state.phases.clone();
        self.store.save(&ctx.owner, &ctx.repo, milestone, &state, &phases).await?;
        self.poster
            .post_comment(&ctx.owner, &ctx.repo, ctx.issue_number, &body)
            .await
            .map_err(|e| WorkflowError::comments("post", &e))?;

        Ok(GatherReport {
            milestone_number: milestone,
            consumed_comments: fresh.len(),
            answered: state.requirements.answered.keys().cloned().collect(),
            pending: state.requirements.pending.clone(),
            complete: state.requirements.complete,
            status: state.status,
        })
    }
}

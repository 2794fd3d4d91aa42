//! Milestone state model.
//!
//! One [`MilestoneState`] exists per milestone number. It is rebuilt from the
//! backing artifact on every invocation, mutated in memory, then written back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::requirements::Question;

/// Lifecycle of a milestone. Ordered: a milestone only ever moves forward.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum MilestoneStatus {
    /// Collecting answers to the requirements questions
    RequirementsGathering,
    /// Requirements are settled; planning documents exist
    #[default]
    Planning,
    /// Archived by the complete-milestone flow
    Complete,
}

impl MilestoneStatus {
    /// Wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequirementsGathering => "requirements-gathering",
            Self::Planning => "planning",
            Self::Complete => "complete",
        }
    }

    /// Parse a wire name, tolerating case and underscores.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "requirements-gathering" | "requirements" | "gathering" => {
                Some(Self::RequirementsGathering)
            }
            "planning" => Some(Self::Planning),
            "complete" | "completed" | "done" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Blocked,
}

impl PhaseStatus {
    /// Wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Complete => "complete",
            Self::Blocked => "blocked",
        }
    }

    /// Parse leniently; unknown values are pending.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "in-progress" | "in progress" | "active" => Self::InProgress,
            "complete" | "completed" | "done" => Self::Complete,
            "blocked" => Self::Blocked,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase in a milestone's roadmap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Phase {
    /// Phase name
    pub name: String,

    /// What the phase delivers
    pub goal: String,

    /// Status
    pub status: PhaseStatus,

    /// Names or numbers of phases this one waits on
    pub dependencies: Vec<String>,
}

impl Phase {
    /// Create a pending phase.
    pub fn new(name: impl Into<String>, goal: impl Into<String>) -> Self {
        Self { name: name.into(), goal: goal.into(), ..Self::default() }
    }

    /// Add a dependency.
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }
}

/// Requirements progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    /// Set once every required question is answered, or forced by an operator
    pub complete: bool,

    /// Question id to answer text
    pub answered: BTreeMap<String, String>,

    /// Unanswered question ids, in question order
    pub pending: Vec<String>,
}

/// Cross-invocation bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkflowMeta {
    pub started_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: u32,
    /// Highest comment id already consumed
    pub last_comment_id: u64,
}

/// Persisted progress of one milestone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MilestoneState {
    pub milestone_number: u64,
    pub status: MilestoneStatus,
    pub requirements: Requirements,
    pub workflow: WorkflowMeta,
    pub phases: Vec<Phase>,
    pub created_at: DateTime<Utc>,
}

impl MilestoneState {
    /// Fresh state for a milestone seen for the first time.
    pub fn new(milestone_number: u64, now: DateTime<Utc>) -> Self {
        Self {
            milestone_number,
            status: MilestoneStatus::RequirementsGathering,
            requirements: Requirements::default(),
            workflow: WorkflowMeta {
                started_at: now,
                last_run_at: None,
                run_count: 0,
                last_comment_id: 0,
            },
            phases: Vec::new(),
            created_at: now,
        }
    }

    /// Move the status forward. Returns false (and changes nothing) on a regression.
    pub fn advance_status(&mut self, to: MilestoneStatus) -> bool {
        if to < self.status {
            tracing::debug!(
                milestone = self.milestone_number,
                from = %self.status,
                to = %to,
                "Ignoring status regression"
            );
            return false;
        }
        self.status = to;
        true
    }

    /// Count one invocation.
    pub fn record_run(&mut self, now: DateTime<Utc>) {
        self.workflow.run_count = self.workflow.run_count.saturating_add(1);
        self.workflow.last_run_at = Some(now);
    }

    /// Store an answer and drop the id from `pending`.
    pub fn record_answer(&mut self, id: impl Into<String>, answer: impl Into<String>) {
        let id = id.into();
        self.requirements.pending.retain(|p| p != &id);
        self.requirements.answered.insert(id, answer.into());
    }

    /// Recompute `pending` from the question set.
    ///
    /// Blank answers are dropped so no id is both answered and pending.
    pub fn refresh_pending(&mut self, questions: &[Question]) {
        self.requirements.answered.retain(|_, a| !a.trim().is_empty());
        let answered = &self.requirements.answered;
        self.requirements.pending = questions
            .iter()
            .filter(|q| !answered.contains_key(&q.id))
            .map(|q| q.id.clone())
            .collect();
    }

    /// Force requirements complete and enter planning.
    pub fn mark_requirements_complete(&mut self) {
        self.requirements.complete = true;
        self.advance_status(MilestoneStatus::Planning);
    }

    /// Raise the comment high-water mark.
    pub fn observe_comment(&mut self, comment_id: u64) {
        self.workflow.last_comment_id = self.workflow.last_comment_id.max(comment_id);
    }
}

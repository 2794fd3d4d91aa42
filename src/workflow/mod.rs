//! Milestone workflow.
//!
//! Milestone planning driven from issue comments, with state kept in a
//! markdown artifact next to the planning documents.
//!
//! ## Documents
//!
//! - `PROJECT.md` - goal, scope, features, requirement answers
//! - `STATE.md` - status page and backing state
//! - `ROADMAP.md` - phases and execution order
//!
//! ## Flow
//!
//! - [`Entry`] - decides between the delegated and the traditional flow
//! - [`MilestoneOrchestrator`] - runs the traditional flow end to end
//! - [`RequirementsSession`] - multi-turn requirements Q&A
//! - [`StateStore`] - load and save through a [`ContentStore`]

mod codec;
mod collaborators;
mod documents;
mod entry;
mod gather;
mod orchestrator;
mod requirements;
mod state;
mod store;
mod summary;

pub use codec::{decode, encode, encode_at, STATE_BLOCK_TAG};
pub use collaborators::{
    Comment, CommentPoster, CommentStream, Iteration, IterationLookup, Worktree,
};
pub use documents::{
    execution_order, generate_all, generate_project, generate_roadmap, generate_state,
    milestone_title, GeneratedDocument, MilestoneData, MilestonePaths, PROJECT_FILE,
    ROADMAP_FILE, STATE_FILE,
};
pub use entry::Entry;
pub use gather::{GatherReport, RequirementsSession};
pub use orchestrator::{
    commit_message, IterationCheck, MilestoneOrchestrator, MilestoneOutcome, MilestoneReport,
    OrchestratorSettings,
};
pub use requirements::{
    default_questions, format_questions, is_bot_comment, is_complete, new_comments,
    parse_answers, Question,
};
pub use state::{
    MilestoneState, MilestoneStatus, Phase, PhaseStatus, Requirements, WorkflowMeta,
};
pub use store::{
    content_revision, ContentStore, LocalContentStore, MemoryContentStore, StateStore,
    StoredContent,
};
pub use summary::{
    format_agent_output, format_delegated_ack, format_error_comment, format_milestone_summary,
    format_requirements_complete, format_unauthorized,
};

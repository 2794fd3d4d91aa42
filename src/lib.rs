#![allow(clippy::format_push_string)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::manual_strip)]

//! # gsdbot
//!
//! Milestone planning bot driven by issue comments.
//!
//! A comment such as `/gsd new-milestone 7 Add OAuth2 login` becomes a set of
//! planning documents committed to a per-milestone branch, with progress kept
//! in a human-readable `STATE.md` that the bot reads back on the next run.
//!
//! ## Features
//!
//! - **Milestone flow**: requirements, `PROJECT.md`/`STATE.md`/`ROADMAP.md`, branch and commit
//! - **Delegated flow**: commands without a number go to an external planning agent
//! - **Requirements Q&A**: multi-turn question and answer over issue comments
//! - **State backends**: GitHub contents API or the local checkout
//!
//! ## Quick Start
//!
//! ```bash
//! # In a GitHub Actions job triggered by issue_comment
//! gsdbot milestone --issue 42 --sender octocat -- 7 Add OAuth2 login
//!
//! # Inspect how a command would be read
//! gsdbot parse -- --milestone 5 Build authentication system
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::redundant_else)]
#![allow(clippy::if_not_else)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::redundant_clone)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::use_self)]

pub mod core;
pub mod workflow;

#[cfg(feature = "github")]
pub mod integrations;

#[cfg(feature = "github")]
pub use integrations::{AgentRunner, GitHubClient, GitHubError};

#[cfg(feature = "git")]
pub mod git;

#[cfg(feature = "git")]
pub use git::GitWorktree;

// Re-export commonly used types
pub use core::{CommandContext, Config, ContentError, WorkflowError, WorkflowResult};
pub use workflow::{
    Entry, MilestoneOrchestrator, MilestoneOutcome, MilestoneState, MilestoneStatus,
    RequirementsSession, StateStore,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "gsdbot";

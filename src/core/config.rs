//! Configuration management for gsdbot.
//!
//! Handles loading configuration from TOML files.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::workflow::{default_questions, Question};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Where planning documents live in the repository
    pub planning: PlanningConfig,

    /// Git settings for milestone branches
    pub git: GitConfig,

    /// GitHub API settings
    pub github: GitHubConfig,

    /// Backing store for milestone state
    pub state: StateConfig,

    /// GitHub Projects settings for the iteration check
    pub project: ProjectConfig,

    /// External agent used by the delegated flow
    pub agent: AgentConfig,

    /// Requirements questions
    pub requirements: RequirementsConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Login the bot posts as; its comments are never parsed as answers
    pub bot_login: Option<String>,

    /// Minimum permission a sender needs (read, triage, write, maintain, admin)
    pub required_permission: String,
}

/// Planning document layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Root directory; documents land in `{root}/milestones/{n}/`
    pub root: String,
}

/// Git settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Milestone branches are named `{branch_prefix}{n}`
    pub branch_prefix: String,

    /// Commit author name
    pub author_name: String,

    /// Commit author email
    pub author_email: String,

    /// Remote to push milestone branches to
    pub remote: String,

    /// Whether to push after committing
    pub push: bool,
}

/// GitHub API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// REST API base URL
    pub api_url: String,

    /// Branch the state artifact is read from and written to (default branch when unset)
    pub state_ref: Option<String>,
}

/// Where the milestone state artifact is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Repository contents API
    GitHub,
    /// Files in the local checkout
    Local,
}

/// State store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Backend kind
    pub backend: StateBackend,
}

/// GitHub Projects settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project number; the iteration check is skipped when unset
    pub number: Option<u64>,

    /// Iteration title template, `{n}` is replaced with the milestone number
    pub iteration_title: String,
}

/// External agent settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Executable to launch for delegated milestones
    pub command: Option<String>,

    /// Arguments placed before the description
    pub args: Vec<String>,

    /// Kill the agent after this many seconds
    pub timeout_secs: Option<u64>,
}

/// Requirements question set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementsConfig {
    /// Questions asked during requirements gathering
    pub questions: Vec<Question>,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.gsdbot.toml` in current directory
    /// 2. `~/.config/gsdbot/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let local_config = PathBuf::from(".gsdbot.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(global_config) = Self::global_config_path() {
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.requirements.questions.is_empty() {
            anyhow::bail!("requirements.questions must not be empty");
        }
        Ok(config)
    }

    /// Path of the per-user configuration file.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("gsdbot").join("config.toml"))
    }

    /// Iteration title for a milestone.
    pub fn iteration_title(&self, milestone: u64) -> String {
        self.project.iteration_title.replace("{n}", &milestone.to_string())
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { bot_login: None, required_permission: "write".to_string() }
    }
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self { root: ".planning".to_string() }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "gsd/".to_string(),
            author_name: "gsdbot".to_string(),
            author_email: "gsdbot@users.noreply.github.com".to_string(),
            remote: "origin".to_string(),
            push: true,
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self { api_url: "https://api.github.com".to_string(), state_ref: None }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { backend: StateBackend::GitHub }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { number: None, iteration_title: "Milestone {n}".to_string() }
    }
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        Self { questions: default_questions() }
    }
}

//! External planning agent launcher.
//!
//! When a milestone command carries no number, the description is handed to
//! an agent CLI configured under `[agent]`. The description is passed as the
//! final argument and the cleaned-up output is posted back on the issue.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

use crate::core::AgentConfig;

const DEFAULT_TIMEOUT_SECS: u64 = 600;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").expect("ansi pattern is valid")
});

/// What the agent printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    /// Cleaned stdout, followed by stderr when the run failed
    pub output: String,
    pub success: bool,
    pub exit_code: Option<i32>,
}

/// Runs the configured agent CLI.
#[derive(Debug, Clone)]
pub struct AgentRunner {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl AgentRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self { command: command.into(), args, timeout, working_dir: None }
    }

    /// Runner for the configured agent, if one is configured.
    pub fn from_config(config: &AgentConfig) -> Option<Self> {
        let command = config.command.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
        let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        Some(Self::new(command, config.args.clone(), timeout))
    }

    /// Run the agent from this directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Run the agent with `description` as its last argument.
    pub async fn run(&self, description: &str) -> anyhow::Result<AgentOutput> {
        let mut command = Command::new(&self.command);
        command.args(&self.args).arg(description).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        tracing::info!(
            agent = %self.command,
            timeout_secs = self.timeout.as_secs(),
            "Starting agent"
        );
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => {
                result.with_context(|| format!("Failed to start agent `{}`", self.command))?
            }
            Err(_) => anyhow::bail!(
                "Agent `{}` timed out after {}s",
                self.command,
                self.timeout.as_secs()
            ),
        };

        let success = output.status.success();
        let stdout = clean_output(&String::from_utf8_lossy(&output.stdout));
        let stderr = clean_output(&String::from_utf8_lossy(&output.stderr));
        let combined = if success || stderr.is_empty() {
            stdout
        } else if stdout.is_empty() {
            stderr
        } else {
            format!("{stdout}\n\n{stderr}")
        };

        if !success {
            tracing::warn!(
                agent = %self.command,
                code = ?output.status.code(),
                "Agent exited with failure"
            );
        }
        Ok(AgentOutput { output: combined, success, exit_code: output.status.code() })
    }
}

/// Strip terminal escapes, carriage-return redraws and surrounding blank lines.
pub fn clean_output(raw: &str) -> String {
    let plain = ANSI_ESCAPE.replace_all(raw, "");
    let lines: Vec<&str> = plain
        .lines()
        .map(|line| line.rsplit('\r').next().unwrap_or(line).trim_end())
        .collect();
    lines.join("\n").trim_matches('\n').to_string()
}

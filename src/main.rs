//! gsdbot - milestone planning from issue comments.
//!
//! Meant to run as a CI job on `issue_comment` events: the job passes the
//! issue number, the commenter and the text after the bot command.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gsdbot::core::{
    parse_remote_url, parse_repository, CommandContext, Config, StateBackend, WorkflowError,
};
use gsdbot::integrations::{permission_allows, AgentRunner, GitHubClient};
use gsdbot::workflow::{
    format_agent_output, format_delegated_ack, format_error_comment, format_unauthorized,
    CommentPoster, ContentStore, Entry, LocalContentStore, MilestoneOrchestrator,
    MilestoneOutcome, MilestonePaths, OrchestratorSettings, RequirementsSession, StateStore,
    Worktree,
};
use gsdbot::GitWorktree;

/// Milestone planning bot for GitHub issues
#[derive(Parser)]
#[command(name = "gsdbot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository as owner/repo (defaults to GITHUB_REPOSITORY, then the origin remote)
    #[arg(long, global = true)]
    repo: Option<String>,

    /// Configuration file (defaults to .gsdbot.toml, then the user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the milestone command for an issue comment
    Milestone {
        /// Issue the command was posted on
        #[arg(long)]
        issue: u64,

        /// Login of the commenter; checked for write access
        #[arg(long)]
        sender: String,

        /// Command text, e.g. `7 Add OAuth2 login` or `--milestone 7 ...`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Read new answers to the requirements questions
    Answer {
        /// Issue holding the conversation
        #[arg(long)]
        issue: u64,

        /// Milestone the answers belong to
        #[arg(short, long)]
        milestone: u64,

        /// Login of the commenter; checked for write access
        #[arg(long)]
        sender: String,
    },

    /// Show how command text is parsed, without side effects
    Parse {
        /// Command text
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show current configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ignore a missing .env file
    let _ = dotenvy::dotenv();

    // Setup logging; stdout carries the JSON result
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Milestone { issue, sender, args } => {
            cmd_milestone(cli.repo.as_deref(), cli.config.as_deref(), issue, &sender, &args)?;
        }
        Commands::Answer { issue, milestone, sender } => {
            cmd_answer(cli.repo.as_deref(), cli.config.as_deref(), issue, milestone, &sender)?;
        }
        Commands::Parse { args } => {
            cmd_parse(&args)?;
        }
        Commands::Config { path } => {
            cmd_config(cli.config.as_deref(), path)?;
        }
        Commands::Completions { shell } => {
            cmd_completions(shell);
        }
    }

    Ok(())
}

/// Everything a GitHub-facing command needs.
struct Session {
    config: Config,
    ctx: CommandContext,
    github: GitHubClient,
    worktree: GitWorktree,
    store: StateStore,
}

impl Session {
    fn open(
        repo: Option<&str>,
        config_path: Option<&Path>,
        issue: u64,
        sender: &str,
    ) -> Result<Self> {
        let token = github_token().context(
            "No GitHub token found. Set GITHUB_TOKEN or GH_TOKEN to run against GitHub.",
        )?;
        let config = load_config(config_path)?;

        let worktree = GitWorktree::discover(".")?
            .with_config(&config.git)
            .with_token(Some(token.clone()));
        let (owner, name) = resolve_repository(repo, worktree.remote_url().as_deref())?;
        let ctx = CommandContext::new(owner, name, issue).with_sender(sender.trim());

        let github = GitHubClient::new(token)
            .with_api_url(config.github.api_url.clone())
            .with_state_ref(config.github.state_ref.clone());

        let content: Arc<dyn ContentStore> = match config.state.backend {
            StateBackend::GitHub => Arc::new(github.clone()),
            StateBackend::Local => {
                let root = worktree.root().context("Repository has no working directory")?;
                Arc::new(LocalContentStore::new(root))
            }
        };
        let store = StateStore::new(content, MilestonePaths::new(config.planning.root.clone()));

        tracing::debug!(
            repo = %ctx.repo_slug(),
            issue,
            backend = ?config.state.backend,
            "Session ready"
        );
        Ok(Self { config, ctx, github, worktree, store })
    }

    /// Refuse senders without the configured permission.
    async fn authorize(&self, command: &str) -> Result<()> {
        let Some(sender) = &self.ctx.sender else {
            anyhow::bail!("No sender to authorize");
        };
        let required = &self.config.general.required_permission;
        let permission = match self
            .github
            .collaborator_permission(&self.ctx.owner, &self.ctx.repo, sender)
            .await
        {
            Ok(permission) => permission,
            Err(e) => {
                let err = anyhow::Error::new(e).context("Failed to check collaborator permission");
                self.report(&err, command).await;
                return Err(err);
            }
        };
        if permission_allows(&permission, required) {
            return Ok(());
        }

        tracing::warn!(sender = %sender, permission = %permission, "Unauthorized sender");
        let body = format_unauthorized(sender, &permission, required);
        if let Err(e) = self.post(&body).await {
            tracing::warn!(error = %e, "Could not post refusal");
        }
        anyhow::bail!("{sender} has `{permission}` access; `{required}` is required")
    }

    async fn post(&self, body: &str) -> Result<()> {
        self.github.post_comment(&self.ctx.owner, &self.ctx.repo, self.ctx.issue_number, body).await
    }

    async fn report(&self, err: &anyhow::Error, command: &str) {
        report_failure(&self.github, &self.ctx, command, err).await;
    }
}

/// Post a failure that happened outside the workflow on the issue, best effort.
async fn report_failure(
    poster: &dyn CommentPoster,
    ctx: &CommandContext,
    command: &str,
    err: &anyhow::Error,
) {
    let body = format_error_comment(&WorkflowError::setup(err), command);
    if let Err(e) = poster.post_comment(&ctx.owner, &ctx.repo, ctx.issue_number, &body).await {
        tracing::warn!(error = %e, "Could not post error comment");
    }
}

/// Open a session, reporting a failure on the issue when a token is available.
async fn open_session(
    repo: Option<&str>,
    config_path: Option<&Path>,
    issue: u64,
    sender: &str,
    command: &str,
) -> Result<Session> {
    if sender.trim().is_empty() {
        anyhow::bail!("--sender must name the commenter");
    }
    let err = match Session::open(repo, config_path, issue, sender) {
        Ok(session) => return Ok(session),
        Err(err) => err,
    };
    tracing::error!(issue, error = %format!("{err:#}"), "Could not start {command}");

    let Some(token) = github_token() else {
        return Err(err);
    };
    let remote_url = GitWorktree::discover(".").ok().and_then(|w| w.remote_url());
    let Ok((owner, name)) = resolve_repository(repo, remote_url.as_deref()) else {
        tracing::warn!("Repository unknown, not reporting the failure on the issue");
        return Err(err);
    };
    let api_url = load_config(config_path).unwrap_or_default().github.api_url;
    let client = GitHubClient::new(token).with_api_url(api_url);
    report_failure(&client, &CommandContext::new(owner, name, issue), command, &err).await;
    Err(err)
}

/// Run the milestone command.
fn cmd_milestone(
    repo: Option<&str>,
    config_path: Option<&Path>,
    issue: u64,
    sender: &str,
    args: &[String],
) -> Result<()> {
    let args = args.join(" ");

    // Create tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let session = open_session(repo, config_path, issue, sender, "milestone").await?;
        session.authorize("milestone").await?;

        let orchestrator = MilestoneOrchestrator::new(
            &session.store,
            &session.github,
            &session.worktree,
            OrchestratorSettings::from_config(&session.config),
        )
        .with_iteration_lookup(&session.github);

        let outcome = orchestrator.run(&session.ctx, &args).await?;
        if let MilestoneOutcome::GsdManaged { description } = &outcome {
            run_agent(&session, description).await;
        }

        println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
        Ok(())
    })
}

/// Hand a description to the configured agent and report back on the issue.
async fn run_agent(session: &Session, description: &str) {
    let body = match AgentRunner::from_config(&session.config.agent) {
        None => {
            tracing::info!("No agent configured, acknowledging only");
            format_delegated_ack(description)
        }
        Some(runner) => {
            let runner = match session.worktree.root() {
                Some(root) => runner.with_working_dir(root),
                None => runner,
            };
            match runner.run(description).await {
                Ok(out) => format_agent_output(description, &out.output, out.success),
                Err(e) => {
                    tracing::warn!(error = %e, "Agent run failed");
                    format_agent_output(description, &format!("{e:#}"), false)
                }
            }
        }
    };

    if let Err(e) = session.post(&body).await {
        tracing::warn!(error = %e, "Could not post agent result");
    }
}

/// Fold new comments into the requirements answers.
fn cmd_answer(
    repo: Option<&str>,
    config_path: Option<&Path>,
    issue: u64,
    milestone: u64,
    sender: &str,
) -> Result<()> {
    if milestone == 0 {
        anyhow::bail!("Milestone numbers start at 1");
    }

    // Create tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let session = open_session(repo, config_path, issue, sender, "answer").await?;
        session.authorize("answer").await?;

        // A working-tree store reads the state committed on the milestone branch
        if session.config.state.backend == StateBackend::Local {
            let branch = OrchestratorSettings::from_config(&session.config).branch_name(milestone);
            if session.worktree.branch_exists(&branch)? {
                session.worktree.switch(&branch)?;
            }
        }

        let mut requirements = RequirementsSession::new(
            &session.store,
            &session.github,
            &session.github,
            session.config.requirements.questions.clone(),
        );
        if let Some(login) = &session.config.general.bot_login {
            requirements = requirements.with_bot_login(login.clone());
        }

        let report = requirements.run(&session.ctx, milestone).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    })
}

/// Print how command text parses.
fn cmd_parse(args: &[String]) -> Result<()> {
    let entry = Entry::parse(&args.join(" "))?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

/// Show configuration.
fn cmd_config(config_path: Option<&Path>, show_path: bool) -> Result<()> {
    if show_path {
        let path = config_path.map(Path::to_path_buf).or_else(Config::global_config_path);
        if let Some(path) = path {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let config = load_config(config_path)?;
    let toml = toml::to_string_pretty(&config)?;
    println!("{toml}");

    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "gsdbot", &mut io::stdout());
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_file(path),
        None => Config::load(),
    }
}

fn github_token() -> Option<String> {
    std::env::var("GITHUB_TOKEN")
        .or_else(|_| std::env::var("GH_TOKEN"))
        .ok()
        .filter(|t| !t.trim().is_empty())
}

/// Repository from `--repo`, then GITHUB_REPOSITORY, then the remote URL.
fn resolve_repository(flag: Option<&str>, remote_url: Option<&str>) -> Result<(String, String)> {
    if let Some(value) = flag {
        return parse_repository(value)
            .with_context(|| format!("Invalid --repo `{value}`, expected owner/repo"));
    }

    let from_env = std::env::var("GITHUB_REPOSITORY").ok();
    if let Some(found) = from_env.as_deref().and_then(parse_repository) {
        return Ok(found);
    }

    remote_url.and_then(parse_remote_url).context(
        "Could not determine the repository. Pass --repo owner/repo or set GITHUB_REPOSITORY.",
    )
}

//! Markdown comments posted back on the issue.

use std::collections::BTreeMap;

use super::orchestrator::{IterationCheck, MilestoneReport};
use crate::core::WorkflowError;

const USAGE: &str = "`<number> <description>`, `--milestone <number> <description>` or \
                     `-m <number> <description>`";
const OUTPUT_LIMIT: usize = 60_000;

/// Summary posted after the traditional flow succeeds.
pub fn format_milestone_summary(report: &MilestoneReport) -> String {
    let mut md = format!("## 🎯 {}\n\n", report.title);

    let branch_note = if report.branch_created { "created" } else { "updated" };
    md.push_str(&format!("**Branch:** `{}` ({branch_note})\n", report.branch));
    md.push_str(&format!("**Status:** {}\n", report.status));
    md.push_str(&format!("**Commit:** `{}`\n", short_id(&report.commit)));
    if report.run_count > 1 {
        md.push_str(&format!("**Runs:** {}\n", report.run_count));
    }

    md.push_str("\n### 📄 Planning Documents\n\n");
    for file in &report.files {
        md.push_str(&format!("- `{file}`\n"));
    }

    md.push_str("\n### 🗓️ Project Iteration\n\n");
    md.push_str(&match &report.iteration {
        IterationCheck::Found { title, .. } => format!("✅ Found iteration \"{title}\".\n"),
        IterationCheck::Missing { title } => format!("⚠️ Iteration \"{title}\" not found.\n"),
        IterationCheck::Skipped => "Skipped (no project configured).\n".to_string(),
        IterationCheck::Failed { .. } => "⚠️ Lookup failed.\n".to_string(),
    });

    md.push_str("\n### ➡️ Next Steps\n\n");
    for (i, step) in report.next_steps.iter().enumerate() {
        md.push_str(&format!("{}. {step}\n", i + 1));
    }
    if !report.pushed {
        md.push_str("\n_The branch was committed locally and has not been pushed._\n");
    }
    md
}

/// Error comment for a failed command.
pub fn format_error_comment(err: &WorkflowError, command: &str) -> String {
    let mut md = format!("## ❌ `{command}` failed\n\n");
    md.push_str(&format!("**{err}**\n\n"));

    if err.is_input_error() {
        md.push_str(&format!("Usage: {USAGE}\n\n"));
        md.push_str("A command without a number is handed to the planning agent instead.\n");
        return md;
    }

    md.push_str("Re-running the command is safe: existing branches and state are reused.\n\n");
    md.push_str("<details>\n<summary>Details</summary>\n\n```text\n");
    md.push_str(&format!("{err:#?}"));
    md.push_str("\n```\n\n</details>\n");
    md
}

/// Acknowledgement when the agent takes over and runs elsewhere.
pub fn format_delegated_ack(description: &str) -> String {
    format!(
        "## 🤖 Handed to the planning agent\n\nNo milestone number was given, so the agent will \
         pick one and plan:\n\n{}\n",
        quote(description)
    )
}

/// Agent output for the delegated flow.
pub fn format_agent_output(description: &str, output: &str, success: bool) -> String {
    let heading =
        if success { "## 🤖 Planning agent finished" } else { "## ⚠️ Planning agent failed" };
    let mut md = format!("{heading}\n\n{}\n\n", quote(description));
    let output = output.trim();
    if output.is_empty() {
        md.push_str("_The agent produced no output._\n");
        return md;
    }
    md.push_str("<details>\n<summary>Output</summary>\n\n```text\n");
    md.push_str(truncate(output, OUTPUT_LIMIT));
    md.push_str("\n```\n\n</details>\n");
    md
}

/// Notice posted once the requirements session has every required answer.
pub fn format_requirements_complete(milestone: u64, answers: &BTreeMap<String, String>) -> String {
    let mut md = format!("## ✅ Requirements complete for milestone {milestone}\n\n");
    for (id, answer) in answers {
        let first = answer.lines().next().unwrap_or("").trim();
        md.push_str(&format!("- **{id}**: {first}\n"));
    }
    md.push_str(&format!(
        "\nRun the milestone command with `{milestone} <description>` to generate the plan.\n"
    ));
    md
}

/// Refusal for a sender without the needed permission.
pub fn format_unauthorized(user: &str, current: &str, required: &str) -> String {
    format!(
        "@{user} you need `{required}` access to this repository to run this command \
         (current permission: `{current}`)."
    )
}

fn quote(text: &str) -> String {
    text.trim().lines().map(|l| format!("> {l}")).collect::<Vec<_>>().join("\n")
}

fn short_id(id: &str) -> &str {
    id.get(..7).unwrap_or(id)
}

fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

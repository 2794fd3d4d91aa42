//! Planning document generation.
//!
//! Renders the three per-milestone documents from one [`MilestoneData`]:
//!
//! - `PROJECT.md` - goal, scope, features, requirement answers
//! - `STATE.md` - the backing state artifact (see [`super::codec`])
//! - `ROADMAP.md` - phases and execution order
//!
//! Every generator is total. Missing values render as a fixed placeholder so
//! each section is always present and diffs stay stable between runs.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec;
use super::state::{MilestoneState, MilestoneStatus, Phase};
use crate::core::CommandContext;

/// File name of the project document.
pub const PROJECT_FILE: &str = "PROJECT.md";
/// File name of the state document.
pub const STATE_FILE: &str = "STATE.md";
/// File name of the roadmap document.
pub const ROADMAP_FILE: &str = "ROADMAP.md";

const TO_BE_DEFINED: &str = "_To be defined._";
const TITLE_LIMIT: usize = 72;

/// Repository layout of milestone documents.
///
/// The path is the primary key: `{root}/milestones/{n}/{FILE}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestonePaths {
    root: String,
}

impl MilestonePaths {
    /// Layout rooted at `root` (for example `.planning`).
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self { root: root.trim_end_matches('/').to_string() }
    }

    /// Directory holding one milestone's documents.
    pub fn dir(&self, milestone: u64) -> String {
        if self.root.is_empty() {
            format!("milestones/{milestone}")
        } else {
            format!("{}/milestones/{milestone}", self.root)
        }
    }

    /// Path of a document inside the milestone directory.
    pub fn file(&self, milestone: u64, name: &str) -> String {
        format!("{}/{name}", self.dir(milestone))
    }

    /// Path of the backing state artifact.
    pub fn state(&self, milestone: u64) -> String {
        self.file(milestone, STATE_FILE)
    }
}

impl Default for MilestonePaths {
    fn default() -> Self {
        Self::new(".planning")
    }
}

/// Everything the generators need, derived from state for one run.
#[derive(Debug, Clone)]
pub struct MilestoneData {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub goal: Option<String>,
    pub scope: Option<String>,
    pub features: Vec<String>,
    pub phases: Vec<Phase>,
    pub status: MilestoneStatus,
    pub answers: BTreeMap<String, String>,
    pub answered_count: usize,
    pub pending_count: usize,
    pub run_count: u32,
    pub generated_at: DateTime<Utc>,
    state: MilestoneState,
}

impl MilestoneData {
    /// Assemble document data from state and the command description.
    pub fn from_state(
        ctx: &CommandContext,
        state: &MilestoneState,
        description: &str,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let answers = state.requirements.answered.clone();
        let description = description.trim();
        let non_blank =
            |v: Option<&String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        Self {
            owner: ctx.owner.clone(),
            repo: ctx.repo.clone(),
            number: state.milestone_number,
            title: milestone_title(state.milestone_number, description),
            goal: (!description.is_empty()).then(|| description.to_string()),
            scope: non_blank(answers.get("scope")),
            features: answers.get("features").map(|f| split_features(f)).unwrap_or_default(),
            phases: state.phases.clone(),
            status: state.status,
            answered_count: answers.len(),
            pending_count: state.requirements.pending.len(),
            run_count: state.workflow.run_count,
            answers,
            generated_at,
            state: state.clone(),
        }
    }
}

/// One rendered document and where it goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedDocument {
    pub name: &'static str,
    pub path: String,
    pub content: String,
}

/// `Milestone N: <first line of description>`, shortened at a word boundary.
pub fn milestone_title(number: u64, description: &str) -> String {
    let first = description.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if first.is_empty() {
        return format!("Milestone {number}");
    }
    if first.chars().count() <= TITLE_LIMIT {
        return format!("Milestone {number}: {first}");
    }
    let mut short = String::new();
    for word in first.split_whitespace() {
        if short.chars().count() + word.chars().count() + 1 > TITLE_LIMIT {
            break;
        }
        if !short.is_empty() {
            short.push(' ');
        }
        short.push_str(word);
    }
    if short.is_empty() {
        short = first.chars().take(TITLE_LIMIT).collect();
    }
    format!("Milestone {number}: {short}…")
}

/// Turn a free-form features answer into bullet items.
pub fn split_features(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            let line = line.trim();
            let line = line
                .strip_prefix("- [ ] ")
                .or_else(|| line.strip_prefix("- [x] "))
                .or_else(|| line.strip_prefix("- "))
                .or_else(|| line.strip_prefix("* "))
                .unwrap_or(line);
            let item = match line.split_once(". ") {
                Some((n, rest)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => rest,
                _ => line,
            };
            item.trim().to_string()
        })
        .filter(|l| !l.is_empty())
        .collect()
}

/// Render PROJECT.md.
pub fn generate_project(data: &MilestoneData) -> String {
    let mut md = format!("# {}\n\n", data.title);
    md.push_str(&format!("**Repository:** {}/{}\n", data.owner, data.repo));
    md.push_str(&format!("**Milestone:** {}\n", data.number));
    md.push_str(&format!("**Status:** {}\n\n", data.status));

    md.push_str("## Goal\n\n");
    md.push_str(data.goal.as_deref().unwrap_or(TO_BE_DEFINED));
    md.push_str("\n\n## Scope\n\n");
    md.push_str(data.scope.as_deref().unwrap_or(TO_BE_DEFINED));
    md.push_str("\n\n## Features\n\n");
    if data.features.is_empty() {
        md.push_str(&format!("- {TO_BE_DEFINED}\n"));
    }
    for feature in &data.features {
        md.push_str(&format!("- {feature}\n"));
    }

    md.push_str("\n## Requirements\n\n");
    md.push_str("| Question | Answer |\n");
    md.push_str("|----------|--------|\n");
    if data.answers.is_empty() {
        md.push_str("| - | _No answers recorded yet._ |\n");
    }
    for (id, answer) in &data.answers {
        md.push_str(&format!("| {id} | {} |\n", table_cell(answer)));
    }
    md
}

/// Render STATE.md. Same bytes the state store persists for this run.
pub fn generate_state(data: &MilestoneData) -> String {
    codec::encode_at(&data.state, &data.phases, data.generated_at)
}

/// Render ROADMAP.md.
pub fn generate_roadmap(data: &MilestoneData) -> String {
    let mut md = format!("# Milestone {} Roadmap\n\n", data.number);
    md.push_str(&format!("{}\n\n", data.title));

    md.push_str("## Phases\n\n");
    if data.phases.is_empty() {
        md.push_str("_No phases defined yet. Phases are added once planning begins._\n");
    }
    for (i, phase) in data.phases.iter().enumerate() {
        md.push_str(&format!("### Phase {:02}: {}\n\n", i + 1, phase.name));
        let goal = if phase.goal.trim().is_empty() { TO_BE_DEFINED } else { phase.goal.trim() };
        md.push_str(&format!("**Goal:** {goal}\n"));
        let deps = if phase.dependencies.is_empty() {
            "None".to_string()
        } else {
            phase.dependencies.join(", ")
        };
        md.push_str(&format!("**Depends on:** {deps}\n"));
        md.push_str(&format!("**Status:** {}\n\n", phase.status));
    }

    md.push_str("\n## Execution Order\n\n");
    md.push_str(&render_execution_order(&data.phases));
    md
}

/// Render all three documents with their repository paths.
pub fn generate_all(data: &MilestoneData, paths: &MilestonePaths) -> Vec<GeneratedDocument> {
    [
        (PROJECT_FILE, generate_project(data)),
        (STATE_FILE, generate_state(data)),
        (ROADMAP_FILE, generate_roadmap(data)),
    ]
    .into_iter()
    .map(|(name, content)| GeneratedDocument { name, path: paths.file(data.number, name), content })
    .collect()
}

/// Numbered list of phases in an order that respects dependencies.
pub fn render_execution_order(phases: &[Phase]) -> String {
    if phases.is_empty() {
        return "_Execution order is available once phases are defined._\n".to_string();
    }
    execution_order(phases)
        .into_iter()
        .enumerate()
        .map(|(step, i)| format!("{}. Phase {:02}: {}\n", step + 1, i + 1, phases[i].name))
        .collect()
}

/// Indices of `phases` ordered so each phase follows its dependencies.
///
/// Ties keep declaration order. Dependencies may name a phase or its number
/// (`2`, `02`, `Phase 2`); unknown references are ignored. Phases caught in a
/// cycle are appended in declaration order.
pub fn execution_order(phases: &[Phase]) -> Vec<usize> {
    let mut lookup: HashMap<String, usize> = HashMap::new();
    for (i, phase) in phases.iter().enumerate() {
        lookup.insert(phase.name.trim().to_lowercase(), i);
        lookup.insert((i + 1).to_string(), i);
    }
    let resolve = |dep: &str| -> Option<usize> {
        let key = dep.trim().to_lowercase();
        if let Some(&i) = lookup.get(&key) {
            return Some(i);
        }
        let number = key.strip_prefix("phase").map_or(key.as_str(), str::trim);
        lookup.get(number).or_else(|| lookup.get(number.trim_start_matches('0'))).copied()
    };

    let mut indegree = vec![0usize; phases.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); phases.len()];
    for (i, phase) in phases.iter().enumerate() {
        for dep in phase.dependencies.iter().filter_map(|d| resolve(d)) {
            if dep != i && !dependents[dep].contains(&i) {
                dependents[dep].push(i);
                indegree[i] += 1;
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..phases.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(phases.len());
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &next in &dependents[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                let at = ready.iter().position(|&r| r > next).unwrap_or(ready.len());
                ready.insert(at, next);
            }
        }
    }

    if order.len() < phases.len() {
        tracing::warn!("Phase dependencies contain a cycle; keeping declared order for the rest");
        order.extend((0..phases.len()).filter(|i| !order.contains(i)).collect::<Vec<_>>());
    }
    order
}

fn table_cell(text: &str) -> String {
    text.trim().replace('|', "\\|").replace("\r\n", "<br>").replace('\n', "<br>")
}

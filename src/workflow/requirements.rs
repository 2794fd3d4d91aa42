//! Requirements gathering over issue comments.
//!
//! The bot asks with [`format_questions`]; the next human comment is read back
//! with [`parse_answers`]. Both sides are pure so the protocol can be tested
//! without GitHub.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::collaborators::Comment;
use super::state::MilestoneState;

/// A requirements question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Stable key, also accepted as an answer prefix (`scope: ...`)
    pub id: String,

    /// Text shown to the user
    pub question: String,

    /// Whether planning waits for this answer
    #[serde(default)]
    pub required: bool,
}

impl Question {
    /// Create a question.
    pub fn new(id: impl Into<String>, question: impl Into<String>, required: bool) -> Self {
        Self { id: id.into(), question: question.into(), required }
    }
}

/// The default question set: two required, two optional.
pub fn default_questions() -> Vec<Question> {
    vec![
        Question::new(
            "scope",
            "What is the scope of this milestone? What is included and what is explicitly out?",
            true,
        ),
        Question::new("features", "What are the key features or deliverables?", true),
        Question::new("constraints", "Are there technical constraints or dependencies?", false),
        Question::new("timeline", "Is there a target timeline or deadline?", false),
    ]
}

/// Whether requirements are settled.
///
/// True when the flag is already set, or when every required question has a
/// non-blank answer.
pub fn is_complete(state: &MilestoneState, questions: &[Question]) -> bool {
    state.requirements.complete
        || questions
            .iter()
            .filter(|q| q.required)
            .all(|q| has_answer(&state.requirements.answered, &q.id))
}

fn has_answer(answers: &BTreeMap<String, String>, id: &str) -> bool {
    answers.get(id).is_some_and(|a| !a.trim().is_empty())
}

#[derive(Debug)]
enum Segment {
    Prefixed { id: String, text: String },
    Plain(String),
}

fn prefix_pattern(id: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?is)^\**{}\**[:\s]\**\s*(.*)$", regex::escape(id))).ok()
}

fn is_heading(line: &str) -> bool {
    line.starts_with('#')
}

fn is_list_marker(line: &str) -> bool {
    line.starts_with("- ")
        || line.starts_with("* ")
        || line.starts_with("+ ")
        || line.starts_with("- [")
        || line == "-"
        || line
            .split_once(". ")
            .is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Split a comment into answer segments, one per non-blank line.
///
/// A line starting with a question id is a prefixed segment; any other line
/// is positional. Headings, quotes and list or checkbox lines are skipped.
fn segment(body: &str, patterns: &[(String, Regex)]) -> Vec<Segment> {
    body.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !is_heading(line) && !line.starts_with('>') && !is_list_marker(line)
        })
        .map(|line| {
            patterns
                .iter()
                .find_map(|(id, re)| {
                    re.captures(line).map(|caps| Segment::Prefixed {
                        id: id.clone(),
                        text: caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
                    })
                })
                .unwrap_or_else(|| Segment::Plain(line.to_string()))
        })
        .collect()
}

/// Read answers out of a comment body.
///
/// Returns `existing` updated with what the comment answers. Prefixed
/// segments (`scope: ...`, case-insensitive) win. Remaining plain lines fill
/// the still-unanswered questions in question order; extras are dropped.
pub fn parse_answers(
    body: &str,
    questions: &[Question],
    existing: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let patterns: Vec<(String, Regex)> = questions
        .iter()
        .filter_map(|q| prefix_pattern(&q.id).map(|re| (q.id.clone(), re)))
        .collect();

    let mut answers = existing.clone();
    let mut positional = Vec::new();

    for seg in segment(body, &patterns) {
        match seg {
            Segment::Prefixed { id, text } if !text.is_empty() => {
                answers.insert(id, text);
            }
            Segment::Prefixed { .. } => {}
            Segment::Plain(text) => positional.push(text),
        }
    }

    let unanswered: Vec<String> =
        questions.iter().filter(|q| !has_answer(&answers, &q.id)).map(|q| q.id.clone()).collect();
    let mut open = unanswered.into_iter();

    for text in positional {
        let Some(id) = open.next() else {
            tracing::debug!("Dropping answer line with no unanswered question left");
            break;
        };
        answers.insert(id, text);
    }

    answers
}

/// Render the question block posted on the issue.
pub fn format_questions(questions: &[Question], existing: &BTreeMap<String, String>) -> String {
    let mut md = String::from("### 📋 Milestone Requirements\n\n");
    md.push_str("A few questions before planning starts:\n\n");

    for (i, q) in questions.iter().enumerate() {
        let answered = has_answer(existing, &q.id);
        let glyph = if answered { "✅" } else { "⬜" };
        let tag = if q.required { "required" } else { "optional" };
        md.push_str(&format!("{glyph} **{}. {}** (`{}`, {tag})\n", i + 1, q.question, q.id));
        if let Some(answer) = existing.get(&q.id).filter(|a| !a.trim().is_empty()) {
            for line in answer.lines() {
                md.push_str(&format!("> {line}\n"));
            }
        }
        md.push('\n');
    }

    let remaining = questions.iter().filter(|q| !has_answer(existing, &q.id)).count();
    md.push_str("---\n\n");
    if remaining == 0 {
        md.push_str("All questions are answered. Reply with `id: new answer` to change one.\n");
    } else {
        md.push_str(&format!(
            "**{remaining} question(s) open.** Reply to this issue with your answers, either \
             prefixed with the question id (`scope: ...`) or one line per question in order.\n"
        ));
    }
    md
}

/// Whether a comment was written by a bot account.
pub fn is_bot_comment(comment: &Comment, bot_login: Option<&str>) -> bool {
    comment.author_type.eq_ignore_ascii_case("bot")
        || comment.author.ends_with("[bot]")
        || bot_login.is_some_and(|login| comment.author.eq_ignore_ascii_case(login))
}

/// Human comments newer than `last_comment_id`, oldest first.
pub fn new_comments<'a>(
    comments: &'a [Comment],
    last_comment_id: u64,
    bot_login: Option<&str>,
) -> Vec<&'a Comment> {
    let mut fresh: Vec<&Comment> = comments
        .iter()
        .filter(|c| c.id > last_comment_id && !is_bot_comment(c, bot_login))
        .collect();
    fresh.sort_by_key(|c| c.id);
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn answers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    fn comment(id: u64, author: &str, author_type: &str) -> Comment {
        Comment {
            id,
            author: author.into(),
            author_type: author_type.into(),
            body: format!("comment {id}"),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_default_questions() {
        let questions = default_questions();
        let required: Vec<_> =
            questions.iter().filter(|q| q.required).map(|q| q.id.as_str()).collect();
        assert_eq!(questions.len(), 4);
        assert_eq!(required, vec!["scope", "features"]);
    }

    #[test]
    fn test_is_complete_with_required_answers() {
        let mut state = MilestoneState::new(1, Utc::now());
        let questions = default_questions();
        assert!(!is_complete(&state, &questions));

        state.requirements.answered = answers(&[("scope", "Auth"), ("features", "Login")]);
        assert!(is_complete(&state, &questions));
    }

    #[test]
    fn test_is_complete_forced() {
        let mut state = MilestoneState::new(1, Utc::now());
        state.requirements.complete = true;
        assert!(is_complete(&state, &default_questions()));
    }

    #[test]
    fn test_is_complete_ignores_blank_answers() {
        let mut state = MilestoneState::new(1, Utc::now());
        state.requirements.answered = answers(&[("scope", "Auth"), ("features", "   ")]);
        assert!(!is_complete(&state, &default_questions()));
    }

    #[test]
    fn test_prefix_answer() {
        let questions = vec![Question::new("scope", "Scope?", true)];
        let parsed = parse_answers("scope: Build auth", &questions, &BTreeMap::new());
        assert_eq!(parsed, answers(&[("scope", "Build auth")]));
    }

    #[test]
    fn test_prefix_is_case_insensitive_and_allows_whitespace() {
        let parsed = parse_answers(
            "SCOPE: Only the API\nFeatures Token refresh",
            &default_questions(),
            &BTreeMap::new(),
        );
        assert_eq!(parsed["scope"], "Only the API");
        assert_eq!(parsed["features"], "Token refresh");
    }

    #[test]
    fn test_positional_answers_in_order() {
        let questions = vec![
            Question::new("scope", "Scope?", true),
            Question::new("features", "Features?", true),
        ];
        let parsed = parse_answers(
            "The whole login flow\n\nPassword reset and MFA",
            &questions,
            &BTreeMap::new(),
        );
        assert_eq!(parsed["scope"], "The whole login flow");
        assert_eq!(parsed["features"], "Password reset and MFA");
    }

    #[test]
    fn test_positional_skips_existing_answers() {
        let existing = answers(&[("scope", "Already known")]);
        let parsed = parse_answers("Search\n\nNo new infra", &default_questions(), &existing);
        assert_eq!(parsed["scope"], "Already known");
        assert_eq!(parsed["features"], "Search");
        assert_eq!(parsed["constraints"], "No new infra");
        assert!(!parsed.contains_key("timeline"));
    }

    #[test]
    fn test_prefix_takes_precedence_over_position() {
        let parsed = parse_answers(
            "Ship by March\n\nscope: Billing only",
            &default_questions(),
            &BTreeMap::new(),
        );
        assert_eq!(parsed["scope"], "Billing only");
        assert_eq!(parsed["features"], "Ship by March");
    }

    #[test]
    fn test_excess_paragraphs_dropped() {
        let questions = vec![Question::new("scope", "Scope?", true)];
        let parsed = parse_answers("one\n\ntwo\n\nthree", &questions, &BTreeMap::new());
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["scope"], "one");
    }

    #[test]
    fn test_headings_lists_and_quotes_not_positional() {
        let questions = vec![Question::new("scope", "Scope?", true)];
        let body = "### My answers\n- [ ] a checkbox\n> quoted bot text\n\nReal answer";
        let parsed = parse_answers(body, &questions, &BTreeMap::new());
        assert_eq!(parsed["scope"], "Real answer");
    }

    #[test]
    fn test_each_line_is_its_own_answer() {
        let questions = vec![
            Question::new("scope", "Scope?", true),
            Question::new("features", "Features?", true),
        ];
        let parsed = parse_answers(
            "The whole login flow\nPassword reset and MFA",
            &questions,
            &BTreeMap::new(),
        );
        assert_eq!(parsed["scope"], "The whole login flow");
        assert_eq!(parsed["features"], "Password reset and MFA");
    }

    #[test]
    fn test_line_after_prefixed_answer_is_positional() {
        let parsed = parse_answers(
            "scope: Build auth\nPassword reset and MFA",
            &default_questions(),
            &BTreeMap::new(),
        );
        assert_eq!(parsed["scope"], "Build auth");
        assert_eq!(parsed["features"], "Password reset and MFA");
    }

    #[test]
    fn test_list_lines_are_skipped() {
        let body = "features:\n- Login\n1. Logout\nscope: Web only";
        let parsed = parse_answers(body, &default_questions(), &BTreeMap::new());
        assert_eq!(parsed, answers(&[("scope", "Web only")]));
    }

    #[test]
    fn test_empty_body_changes_nothing() {
        let existing = answers(&[("scope", "x")]);
        assert_eq!(parse_answers("   \n\n", &default_questions(), &existing), existing);
    }

    #[test]
    fn test_format_questions_marks_answered() {
        let existing = answers(&[("scope", "Auth only")]);
        let md = format_questions(&default_questions(), &existing);
        assert!(md.contains("✅ **1."));
        assert!(md.contains("> Auth only"));
        assert!(md.contains("⬜ **2."));
        assert!(md.contains("3 question(s) open"));
    }

    #[test]
    fn test_format_questions_all_answered() {
        let existing =
            answers(&[("scope", "a"), ("features", "b"), ("constraints", "c"), ("timeline", "d")]);
        let md = format_questions(&default_questions(), &existing);
        assert!(md.contains("All questions are answered"));
        assert!(!md.contains("⬜"));
    }

    #[test]
    fn test_new_comments_filters_and_sorts() {
        let comments = vec![
            comment(30, "mona", "User"),
            comment(10, "mona", "User"),
            comment(25, "github-actions[bot]", "Bot"),
            comment(20, "hubot", "User"),
            comment(5, "mona", "User"),
        ];
        let fresh = new_comments(&comments, 5, Some("hubot"));
        let ids: Vec<u64> = fresh.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![10, 30]);
    }
}

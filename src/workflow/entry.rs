//! Command entry parsing.
//!
//! The free text after the bot's command either names a milestone number
//! (the traditional flow) or does not (the flow is handed to the agent).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{WorkflowError, WorkflowResult};

static LONG_FLAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)--milestone(?:\s+|=)(\d+)\b").expect("long flag pattern is valid")
});

static SHORT_FLAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)-m(?:\s+|=)(\d+)\b").expect("short flag pattern is valid")
});

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)(?:\s+|$)").expect("leading number pattern is valid"));

/// How an invocation proceeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Entry {
    /// No milestone number: the work is delegated to the agent.
    Delegated { description: String },
    /// A numbered milestone driven through requirements and planning.
    Traditional { number: u64, description: String },
}

impl Entry {
    /// Parse command arguments.
    ///
    /// Recognized forms, first match wins: `--milestone N`, `-m N` (either
    /// with `=`), and a leading bare number. The rest of the text, trimmed,
    /// is the description and must not be empty. Text without a number is
    /// delegated as-is.
    pub fn parse(args: &str) -> WorkflowResult<Self> {
        for pattern in [&*LONG_FLAG, &*SHORT_FLAG, &*LEADING_NUMBER] {
            let Some(caps) = pattern.captures(args) else {
                continue;
            };
            let Ok(number) = caps[1].parse::<u64>() else {
                tracing::debug!(value = &caps[1], "Milestone number out of range, ignoring");
                continue;
            };
            if number == 0 {
                return Err(WorkflowError::InvalidInput(
                    "Milestone numbers start at 1".to_string(),
                ));
            }

            let Some(whole) = caps.get(0) else {
                continue;
            };
            let description = [args[..whole.start()].trim(), args[whole.end()..].trim()]
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if description.is_empty() {
                return Err(WorkflowError::InvalidInput(format!(
                    "Milestone description is required (e.g. `{number} Add OAuth2 login`)"
                )));
            }
            return Ok(Self::Traditional { number, description });
        }

        let description = args.trim();
        if description.is_empty() {
            return Err(WorkflowError::InvalidInput(
                "Milestone description is required".to_string(),
            ));
        }
        Ok(Self::Delegated { description: description.to_string() })
    }

    /// The description in either variant.
    pub fn description(&self) -> &str {
        match self {
            Self::Delegated { description } | Self::Traditional { description, .. } => description,
        }
    }

    /// The milestone number, when there is one.
    pub const fn milestone(&self) -> Option<u64> {
        match self {
            Self::Delegated { .. } => None,
            Self::Traditional { number, .. } => Some(*number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traditional(number: u64, description: &str) -> Entry {
        Entry::Traditional { number, description: description.to_string() }
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(Entry::parse("7 Add OAuth2 login").unwrap(), traditional(7, "Add OAuth2 login"));
        assert_eq!(Entry::parse("  12\nMulti\nline").unwrap(), traditional(12, "Multi\nline"));
    }

    #[test]
    fn test_flags() {
        assert_eq!(Entry::parse("--milestone 4 Search").unwrap(), traditional(4, "Search"));
        assert_eq!(Entry::parse("Search --milestone=4").unwrap(), traditional(4, "Search"));
        assert_eq!(Entry::parse("-m 2 Billing page").unwrap(), traditional(2, "Billing page"));
        assert_eq!(Entry::parse("Billing -m=2 page").unwrap(), traditional(2, "Billing page"));
    }

    #[test]
    fn test_long_flag_wins_over_leading_number() {
        assert_eq!(Entry::parse("3 things --milestone 9").unwrap(), traditional(9, "3 things"));
    }

    #[test]
    fn test_number_without_description_is_input_error() {
        let err = Entry::parse("3").unwrap_err();
        assert!(err.is_input_error());
        assert!(err.to_string().contains("description is required"));
        assert!(Entry::parse("--milestone 3   ").unwrap_err().is_input_error());
    }

    #[test]
    fn test_empty_args_rejected() {
        let err = Entry::parse("   ").unwrap_err();
        assert!(err.to_string().contains("description is required"));
    }

    #[test]
    fn test_zero_rejected() {
        assert!(Entry::parse("0 Nothing").unwrap_err().is_input_error());
    }

    #[test]
    fn test_delegated() {
        let entry = Entry::parse("Build a login system").unwrap();
        assert_eq!(entry, Entry::Delegated { description: "Build a login system".into() });
        assert_eq!(entry.milestone(), None);
        // A number that is not the first word is just text.
        assert!(matches!(Entry::parse("Ship v2 in 3 weeks").unwrap(), Entry::Delegated { .. }));
        assert!(matches!(Entry::parse("2fa support").unwrap(), Entry::Delegated { .. }));
    }

    #[test]
    fn test_out_of_range_number_is_text() {
        let entry = Entry::parse("99999999999999999999999 huge").unwrap();
        assert!(matches!(entry, Entry::Delegated { .. }));
    }

    #[test]
    fn test_serializes_tagged() {
        let json = serde_json::to_value(traditional(7, "x")).unwrap();
        assert_eq!(json["mode"], "traditional");
        assert_eq!(json["number"], 7);
    }
}

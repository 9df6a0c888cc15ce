//! Advisory classification of engine error messages.
//!
//! Used to shape the text shown to the user or handed back to the AI agent.
//! Never used for control flow.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static MISSING_SAMPLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:sound|sample)s?\b.*\bnot (?:found|loaded)\b"#).expect("valid regex")
});

static SAMPLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:sound|sample)s?\s+["'`]?([^"'`\s!]+)["'`]?"#).expect("valid regex")
});

static INVALID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bundefined\b|not a pattern|no pattern").expect("valid regex")
});

static SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)syntax|parse error|failed to parse|unexpected (?:token|identifier|end of input)|unterminated")
        .expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSample,
    InvalidPattern,
    SyntaxError,
    RuntimeError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSample => "invalid_sample",
            Self::InvalidPattern => "invalid_pattern",
            Self::SyntaxError => "syntax_error",
            Self::RuntimeError => "runtime_error",
        }
    }

    /// Short explanation suitable for an AI tool result.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::InvalidSample => {
                "A sound or sample name is not available. Use a loaded sample bank name."
            }
            Self::InvalidPattern => {
                "The code ran but did not return a pattern. Make sure the last expression is a pattern."
            }
            Self::SyntaxError => "The code could not be parsed. Check brackets, quotes and commas.",
            Self::RuntimeError => "The pattern failed while running.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies an engine error message.
pub fn classify_error(message: &str) -> ErrorKind {
    if MISSING_SAMPLE.is_match(message) {
        ErrorKind::InvalidSample
    } else if INVALID_PATTERN.is_match(message) {
        ErrorKind::InvalidPattern
    } else if SYNTAX.is_match(message) {
        ErrorKind::SyntaxError
    } else {
        ErrorKind::RuntimeError
    }
}

/// Extracts the sample name from a missing-sample message, if it is one.
pub fn missing_sample_name(message: &str) -> Option<String> {
    if !MISSING_SAMPLE.is_match(message) {
        return None;
    }
    SAMPLE_NAME
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Formats an error for the AI agent: kind, hint and the raw message.
pub fn describe_error(message: &str) -> String {
    let kind = classify_error(message);
    format!("[{}] {} ({})", kind, message, kind.hint())
}

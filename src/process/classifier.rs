//! Output classification for live command processes
//!
//! All functions are pure and take the full text accumulated so far for a
//! stream, so a prompt split across read chunks is still recognised.

use once_cell::sync::Lazy;
use regex::Regex;

/// Result of checking output for an input prompt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WaitingForInput {
    /// Whether the process appears to be blocked on stdin
    pub is_waiting: bool,
    /// Prompt text as printed by the process
    pub prompt: Option<String>,
}

impl WaitingForInput {
    fn waiting(prompt: impl Into<String>) -> Self {
        Self {
            is_waiting: true,
            prompt: Some(prompt.into()),
        }
    }
}

/// How a pattern turns a match into prompt text
#[derive(Debug, Clone, Copy)]
enum Extract {
    /// The whole inspected line, as printed
    Line,
    /// The first capture group
    Capture,
}

/// One waiting-for-input pattern
#[derive(Debug)]
struct PromptPattern {
    name: &'static str,
    pattern: Regex,
    extract: Extract,
    /// Also inspect the last non-empty line when the final line is empty
    allow_completed_line: bool,
}

fn prompt_pattern(
    name: &'static str,
    pattern: &str,
    extract: Extract,
    allow_completed_line: bool,
) -> PromptPattern {
    PromptPattern {
        name,
        pattern: Regex::new(pattern).expect("Invalid prompt regex"),
        extract,
        allow_completed_line,
    }
}

/// Patterns evaluated in order; the first match wins
static PROMPT_PATTERNS: Lazy<Vec<PromptPattern>> = Lazy::new(|| {
    vec![
        // Inquirer-style question: "? Project name? (my-app)"
        prompt_pattern(
            "interactive-question",
            r"^\s*(\?\s+[^\n]*\?[^\n]*)$",
            Extract::Capture,
            true,
        ),
        prompt_pattern(
            "yes-no",
            r"(?i)(\(y/n\)|\[y/n\]|\(yes/no\)|\[yes/no\])\s*:?\s*$",
            Extract::Line,
            false,
        ),
        prompt_pattern("password", r"(?i)password[^\n]*:\s*$", Extract::Line, false),
        // Generic trailing label: "Enter name: "
        prompt_pattern("label", r"^[^\n]*\S[^\n]*[:?>]\s*$", Extract::Line, false),
    ]
});

/// Readiness keywords, matched case-insensitively on word boundaries
static SERVER_READY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(listening|ready|compiled successfully|waiting for file changes|server running|started server|development server)\b",
    )
    .expect("Invalid readiness regex")
});

/// Markers that mean the process failed, matched case-sensitively
const ERROR_MARKERS: &[&str] = &[
    "EADDRINUSE",
    "Error:",
    "Cannot find module",
    "app crashed",
    "npm ERR!",
    "command not found",
    "Segmentation fault",
];

/// Marker that is discounted when the process reports it is watching files
const CRASH_MARKER: &str = "app crashed";

/// Text printed by file-watching dev servers after recovering from a crash
const FILE_WATCH_MARKER: &str = "waiting for file changes";

/// Check accumulated output for a prompt waiting on stdin
///
/// Patterns inspect the final line (text after the last newline). A process
/// that has just finished a line is not considered blocked, except for
/// inquirer-style questions, which are often printed with a trailing newline.
pub fn detect_waiting_for_input(text: &str) -> WaitingForInput {
    let last_line = text.rsplit('\n').next().unwrap_or_default();
    let last_non_empty = text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default();

    for pattern in PROMPT_PATTERNS.iter() {
        let candidate = if last_line.trim().is_empty() {
            if !pattern.allow_completed_line {
                continue;
            }
            last_non_empty
        } else {
            last_line
        };

        let Some(caps) = pattern.pattern.captures(candidate) else {
            continue;
        };

        let prompt = match pattern.extract {
            Extract::Line => candidate.to_string(),
            Extract::Capture => caps
                .get(1)
                .map_or(candidate, |m| m.as_str())
                .trim()
                .to_string(),
        };
        tracing::trace!(pattern = pattern.name, prompt = %prompt, "Detected input prompt");
        return WaitingForInput::waiting(prompt);
    }

    WaitingForInput::default()
}

/// Check whether output announces a ready server or file watcher
pub fn detect_server_ready(text: &str) -> bool {
    SERVER_READY.is_match(text)
}

/// Check stdout and stderr for error markers
///
/// A crash report is discounted when the same output says the process is
/// waiting for file changes (a dev server that recovered).
pub fn detect_error(stdout: &str, stderr: &str) -> bool {
    let watching = contains_ignore_case(stdout, FILE_WATCH_MARKER)
        || contains_ignore_case(stderr, FILE_WATCH_MARKER);

    ERROR_MARKERS
        .iter()
        .filter(|marker| !(watching && **marker == CRASH_MARKER))
        .any(|marker| stdout.contains(marker) || stderr.contains(marker))
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

//! Command allow-list matching
//!
//! A pattern is a space separated template `command [arg|*]*`. The command
//! token must match exactly. When the pattern carries a `*` token anywhere
//! in its argument list, every argument sequence for that command is
//! authorized (wildcard-anywhere). Otherwise the argument lists must have
//! the same length and match position by position.
//!
//! Wildcard authorization never extends to shell chaining: a command line
//! that contains a shell operator is only accepted by an exact pattern.

use crate::types::CommandPatternConfig;

/// Token granting flexible argument matching
const WILDCARD: &str = "*";

/// Shell operators that chain or substitute commands
///
/// Commands are executed through `<shell> -ic`, so any of these would let a
/// wildcard-authorized command smuggle in a second one.
const SHELL_OPERATORS: &[&str] = &["&&", "||", ";", "|", "$(", "`", "\n", ">", "<"];

/// Check if a command string contains shell operators
///
/// # Examples
///
/// ```
/// use toolhost::settings::contains_shell_operator;
///
/// assert!(contains_shell_operator("ls && rm -rf /"));
/// assert!(contains_shell_operator("cat file | grep secret"));
/// assert!(!contains_shell_operator("gh pr view 42"));
/// ```
pub fn contains_shell_operator(command: &str) -> bool {
    SHELL_OPERATORS.iter().any(|op| command.contains(op))
}

/// A parsed allow-list pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPattern {
    /// The command token (e.g. "gh", "npm")
    pub command: String,
    /// Argument tokens, `*` included verbatim
    pub args: Vec<String>,
}

impl ParsedPattern {
    /// Parse a pattern string like "npm install" or "gh pr *"
    pub fn parse(pattern: &str) -> Self {
        let (command, args) = split_command_line(pattern);
        Self {
            command: command.to_string(),
            args: args.into_iter().map(str::to_string).collect(),
        }
    }

    /// Whether any argument position is the wildcard token
    pub fn has_wildcard(&self) -> bool {
        self.args.iter().any(|a| a == WILDCARD)
    }

    /// Check if this pattern authorizes a command line
    pub fn matches(&self, command_line: &str) -> bool {
        let (command, args) = split_command_line(command_line);
        if command.is_empty() || self.command != command {
            return false;
        }

        if self.has_wildcard() {
            return !contains_shell_operator(command_line);
        }

        self.args.len() == args.len()
            && self
                .args
                .iter()
                .zip(&args)
                .all(|(expected, actual)| expected == actual)
    }
}

/// Check a command line against an allow-list
///
/// Returns `false` for an empty allow-list (default deny).
pub fn is_command_allowed(command_line: &str, patterns: &[CommandPatternConfig]) -> bool {
    let allowed = patterns
        .iter()
        .find(|p| ParsedPattern::parse(&p.pattern).matches(command_line));

    match allowed {
        Some(p) => {
            tracing::debug!(command = %command_line, pattern = %p.pattern, "Command allowed");
            true
        }
        None => {
            tracing::debug!(command = %command_line, "Command not on allow-list");
            false
        }
    }
}

/// Split on single spaces into `(command, args)`
fn split_command_line(line: &str) -> (&str, Vec<&str>) {
    let mut tokens = line.trim().split(' ');
    let command = tokens.next().unwrap_or_default();
    (command, tokens.collect())
}

use regex::Regex;

use crate::error::{AppError, Result};
use crate::workflow::task::FileEdit;

/// Result of checking a change set against the protected path patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    /// The whole change set is refused; carries every offending path in
    /// normalised form.
    Reject(Vec<String>),
}

/// Refuses change sets that touch protected paths (CI and workflow configuration).
///
/// Patterns are globs rooted at the repository: `*` matches within one path
/// segment, `**` matches across segments, `?` matches a single character. A
/// pattern without wildcards protects the path itself and everything below it.
#[derive(Debug, Clone)]
pub struct RestrictionEnforcer {
    patterns: Vec<(String, Regex)>,
}

impl RestrictionEnforcer {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let regex = Regex::new(&glob_to_regex(p)).map_err(|e| {
                    AppError::Config(format!("Invalid protected path pattern {p:?}: {e}"))
                })?;
                Ok((p.clone(), regex))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(p, _)| p.as_str())
    }

    pub fn is_protected(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        self.patterns.iter().any(|(_, re)| re.is_match(&normalized))
    }

    /// All-or-nothing: one protected entry rejects every entry.
    pub fn check(&self, change_set: &[FileEdit]) -> PolicyDecision {
        let mut violations: Vec<String> = Vec::new();
        for edit in change_set {
            let normalized = normalize_path(&edit.path);
            if self.patterns.iter().any(|(_, re)| re.is_match(&normalized))
                && !violations.contains(&normalized)
            {
                violations.push(normalized);
            }
        }

        if violations.is_empty() {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Reject(violations)
        }
    }
}

/// Canonical repository-rooted form: forward slashes, `.` and `..` resolved,
/// a single leading `/`.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

fn glob_to_regex(pattern: &str) -> String {
    let normalized = normalize_path(pattern.trim());
    let has_wildcard = normalized.contains(|c| c == '*' || c == '?');

    let mut out = String::from("^");
    let chars: Vec<char> = normalized.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    if !has_wildcard {
        out.push_str("(?:/.*)?");
    }
    out.push('$');
    out
}

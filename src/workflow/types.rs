use serde::{Deserialize, Serialize};

use crate::platform::types::{CheckState, CiStatus};

/// Reference to a pull request opened or reviewed by a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
    pub head_branch: String,
}

/// Reference to a commit pushed by a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub sha: String,
    pub branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Warnings and errors block approval; info never does.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Severity::Warning | Severity::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    pub path: String,
    pub line: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: Severity,
    pub description: String,
    pub location: Option<FileLocation>,
    pub suggestion: Option<String>,
}

/// Outcome of reviewing a pull request.
///
/// `requirements_met` is independent of `approved`: a PR can satisfy the
/// linked issue and still be rejected for a blocking bug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub approved: bool,
    pub requirements_met: bool,
    pub summary: String,
    pub issues: Vec<ReviewIssue>,
}

impl ReviewResult {
    pub fn blocking_issues(&self) -> impl Iterator<Item = &ReviewIssue> {
        self.issues.iter().filter(|i| i.severity.is_blocking())
    }

    /// Markdown body used when publishing the review.
    pub fn render(&self, ci: Option<&CiAnalysis>) -> String {
        let mut parts = vec![format!("**Assessment**: {}", self.summary)];

        if self.requirements_met {
            parts.push("- Requirements met".to_string());
        } else {
            parts.push("- Requirements not fully met".to_string());
        }

        if let Some(ci) = ci {
            if ci.has_failures() {
                parts.push(format!("- CI failed ({} check(s))", ci.failures.len()));
            } else if ci.is_pending() {
                parts.push(format!(
                    "- CI still running ({}); not approving until it finishes",
                    ci.pending.join(", ")
                ));
            } else {
                parts.push("- CI passed".to_string());
            }
        }

        let errors = self
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count();
        let warnings = self
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count();
        if errors > 0 {
            parts.push(format!("- {errors} error(s) found"));
        }
        if warnings > 0 {
            parts.push(format!("- {warnings} warning(s) found"));
        }

        for issue in &self.issues {
            let location = match &issue.location {
                Some(FileLocation {
                    path,
                    line: Some(line),
                }) => format!(" (`{path}:{line}`)"),
                Some(FileLocation { path, line: None }) => format!(" (`{path}`)"),
                None => String::new(),
            };
            parts.push(format!(
                "  - [{:?}]{location} {}",
                issue.severity, issue.description
            ));
        }

        let ci_pending = ci.is_some_and(|ci| !ci.has_failures() && ci.is_pending());
        if self.approved && ci_pending {
            parts.push("\n**Approval withheld until CI finishes**".to_string());
        } else if self.approved && ci.map_or(true, |ci| ci.passed) {
            parts.push("\n**Approved for merge**".to_string());
        } else {
            parts.push("\n**Changes requested**".to_string());
        }

        parts.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CiFailure {
    pub check: String,
    pub excerpt: String,
}

/// CI state of a pull request reduced to what the fix cycle needs.
///
/// `passed` holds only when no relevant check failed and none is still
/// running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CiAnalysis {
    pub passed: bool,
    pub failures: Vec<CiFailure>,
    /// Names of checks that have not finished.
    pub pending: Vec<String>,
}

/// Longest failure excerpt carried into prompts.
const MAX_EXCERPT_CHARS: usize = 2000;

/// Whether `name` is one of patcher's own checks. Matching is a
/// case-insensitive substring test.
pub fn is_own_check(name: &str, own_check_patterns: &[String]) -> bool {
    let name = name.to_lowercase();
    own_check_patterns
        .iter()
        .any(|p| !p.is_empty() && name.contains(&p.to_lowercase()))
}

impl CiAnalysis {
    /// Skipped checks never count; patcher's own checks are left out
    /// entirely. CI with no relevant checks passes.
    pub fn from_status(status: &CiStatus, own_check_patterns: &[String]) -> Self {
        let relevant: Vec<_> = status
            .checks
            .iter()
            .filter(|c| !is_own_check(&c.name, own_check_patterns))
            .collect();

        let failures: Vec<CiFailure> = relevant
            .iter()
            .filter(|c| matches!(c.state, CheckState::Failure | CheckState::Error))
            .map(|c| CiFailure {
                check: c.name.clone(),
                excerpt: c
                    .output
                    .as_deref()
                    .unwrap_or("Failed")
                    .chars()
                    .take(MAX_EXCERPT_CHARS)
                    .collect(),
            })
            .collect();
        let pending: Vec<String> = relevant
            .iter()
            .filter(|c| c.state == CheckState::Pending)
            .map(|c| c.name.clone())
            .collect();

        Self {
            passed: failures.is_empty() && pending.is_empty(),
            failures,
            pending,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Short label recorded in the PR state block.
    pub fn verdict(&self) -> &'static str {
        if self.has_failures() {
            "failed"
        } else if self.is_pending() {
            "pending"
        } else {
            "passed"
        }
    }

    pub fn describe_failures(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("**{}**:\n```\n{}\n```", f.check, f.excerpt))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

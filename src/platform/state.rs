//! Workflow state persisted in a hidden block of the pull request description.
//!
//! Fix iterations recorded here survive across events, so a later review task
//! on the same PR starts from the iteration count of the previous one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

const STATE_MARKER_START: &str = "<!-- PATCHER_STATE_START";
const STATE_MARKER_END: &str = "PATCHER_STATE_END -->";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Pending,
    InProgress,
    AwaitingReview,
    NeedsChanges,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 0 for the initial generation, then one per fix cycle.
    pub number: u32,
    pub status: IterationStatus,
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub review_feedback: Option<String>,
    #[serde(default)]
    pub ci_status: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrState {
    pub issue_number: u64,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub iterations: Vec<IterationRecord>,
    #[serde(default)]
    pub requirements_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrState {
    pub fn new(issue_number: u64, branch_name: &str, requirements_hash: String) -> Self {
        let now = Utc::now();
        Self {
            issue_number,
            pr_number: None,
            branch_name: branch_name.to_string(),
            iterations: Vec::new(),
            requirements_hash,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record(
        &mut self,
        number: u32,
        status: IterationStatus,
        changes: Vec<String>,
        review_feedback: Option<String>,
        ci_status: Option<String>,
        commit_sha: Option<String>,
    ) {
        let now = Utc::now();
        self.iterations.push(IterationRecord {
            number,
            status,
            changes,
            review_feedback,
            ci_status,
            commit_sha,
            timestamp: now,
        });
        self.updated_at = now;
    }

    /// Highest fix cycle recorded so far.
    pub fn fix_iterations(&self) -> u32 {
        self.iterations.iter().map(|i| i.number).max().unwrap_or(0)
    }

    /// Read the state block from a PR body. Missing or corrupt blocks yield `None`.
    pub fn extract(body: &str) -> Option<Self> {
        let (start, end) = block_bounds(body)?;
        let inner = &body[start + STATE_MARKER_START.len()..end - STATE_MARKER_END.len()];
        match serde_json::from_str(inner.trim()) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable PR state block");
                None
            }
        }
    }

    pub fn render(&self) -> Result<String> {
        let json = serde_json::to_string_pretty(self)?;
        Ok(format!("{STATE_MARKER_START}\n{json}\n{STATE_MARKER_END}"))
    }

    /// Replace the block in `body`, or append one if there is none.
    pub fn embed(&self, body: &str) -> Result<String> {
        let block = self.render()?;
        Ok(match block_bounds(body) {
            Some((start, end)) => format!("{}{}{}", &body[..start], block, &body[end..]),
            None if body.trim().is_empty() => block,
            None => format!("{}\n\n{}", body.trim_end(), block),
        })
    }
}

/// PR body with the state block removed.
pub fn visible_body(body: &str) -> String {
    match block_bounds(body) {
        Some((start, end)) => format!("{}{}", body[..start].trim_end(), &body[end..])
            .trim()
            .to_string(),
        None => body.trim().to_string(),
    }
}

/// Short fingerprint of an issue body, used to notice requirement changes.
pub fn requirements_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn block_bounds(body: &str) -> Option<(usize, usize)> {
    let start = body.find(STATE_MARKER_START)?;
    let end = body[start..].find(STATE_MARKER_END)? + start + STATE_MARKER_END.len();
    Some((start, end))
}

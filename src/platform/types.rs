use serde::{Deserialize, Serialize};

/// Repository coordinates carried by every inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
    /// GitHub App installation that grants access to the repository.
    pub installation_id: u64,
}

impl RepoRef {
    /// Splits `owner/name`.
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((owner, name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub comments: Vec<Comment>,
}

impl Issue {
    /// Comments rendered for inclusion in a prompt, oldest first.
    pub fn format_comments(&self) -> String {
        self.comments
            .iter()
            .map(|c| format!("**@{}:** {}", c.author, c.body))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub head_branch: String,
    pub head_sha: String,
    pub base_branch: String,
}

#[derive(Debug, Clone)]
pub struct CreatePullRequest {
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
}

/// GitHub review verdicts that patcher submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    Approve,
    RequestChanges,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineComment {
    pub path: String,
    pub line: u64,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct ReviewSubmission {
    pub event: ReviewEvent,
    pub body: String,
    pub comments: Vec<InlineComment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Pending,
    Success,
    Failure,
    Error,
    Skipped,
}

impl CheckState {
    /// Maps a check run's `status` and `conclusion` onto a single state.
    pub fn from_check_run(status: &str, conclusion: Option<&str>) -> Self {
        if status != "completed" {
            return CheckState::Pending;
        }
        match conclusion {
            Some("success") | Some("neutral") => CheckState::Success,
            Some("skipped") => CheckState::Skipped,
            Some("failure") | Some("timed_out") | Some("cancelled") | Some("action_required") => {
                CheckState::Failure
            }
            Some(_) => CheckState::Error,
            None => CheckState::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiCheck {
    pub name: String,
    pub state: CheckState,
    pub output: Option<String>,
}

/// Raw CI state of one commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CiStatus {
    pub checks: Vec<CiCheck>,
}

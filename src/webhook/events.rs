use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::platform::types::RepoRef;

/// Top-level webhook event parsed from the payload based on X-GitHub-Event header.
#[derive(Debug)]
pub enum WebhookEvent {
    Issues(IssuesEvent),
    IssueComment(IssueCommentEvent),
    PullRequest(PullRequestEvent),
    PullRequestReview(PullRequestReviewEvent),
    PullRequestReviewComment(PullRequestReviewCommentEvent),
    CheckSuite(CheckSuiteEvent),
    Ping,
    Unsupported(String),
}

#[derive(Debug, Deserialize)]
pub struct IssuesEvent {
    pub action: String,
    pub issue: IssuePayload,
    pub repository: RepositoryPayload,
    pub installation: Option<InstallationPayload>,
    pub label: Option<LabelPayload>,
}

#[derive(Debug, Deserialize)]
pub struct IssueCommentEvent {
    pub action: String,
    pub issue: IssuePayload,
    pub comment: CommentPayload,
    pub repository: RepositoryPayload,
    pub installation: Option<InstallationPayload>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequestPayload,
    pub repository: RepositoryPayload,
    pub installation: Option<InstallationPayload>,
    pub sender: UserPayload,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestReviewEvent {
    pub action: String,
    pub review: ReviewPayload,
    pub pull_request: PullRequestPayload,
    pub repository: RepositoryPayload,
    pub installation: Option<InstallationPayload>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestReviewCommentEvent {
    pub action: String,
    pub comment: ReviewCommentPayload,
    pub pull_request: PullRequestPayload,
    pub repository: RepositoryPayload,
    pub installation: Option<InstallationPayload>,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuiteEvent {
    pub action: String,
    pub check_suite: CheckSuitePayload,
    pub repository: RepositoryPayload,
    pub installation: Option<InstallationPayload>,
}

#[derive(Debug, Deserialize)]
pub struct IssuePayload {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<LabelPayload>,
    pub user: UserPayload,
    pub pull_request: Option<serde_json::Value>, // Present if issue is a PR
}

#[derive(Debug, Deserialize)]
pub struct LabelPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentPayload {
    pub id: u64,
    pub body: Option<String>,
    pub user: UserPayload,
}

#[derive(Debug, Deserialize)]
pub struct ReviewPayload {
    pub id: u64,
    pub body: Option<String>,
    pub state: String, // "approved", "changes_requested", "commented"
    pub user: UserPayload,
}

#[derive(Debug, Deserialize)]
pub struct ReviewCommentPayload {
    pub id: u64,
    pub body: Option<String>,
    pub path: Option<String>,
    pub line: Option<u64>,
    pub user: UserPayload,
    pub diff_hunk: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub head: BranchRefPayload,
    pub base: BranchRefPayload,
    pub user: UserPayload,
}

#[derive(Debug, Deserialize)]
pub struct BranchRefPayload {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuitePayload {
    pub id: u64,
    pub head_branch: Option<String>,
    pub head_sha: String,
    pub conclusion: Option<String>,
    #[serde(default)]
    pub pull_requests: Vec<CheckSuitePullRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuitePullRequest {
    pub number: u64,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPayload {
    pub id: u64,
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
}

#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub login: String,
    pub id: u64,
    #[serde(rename = "type", default)]
    pub user_type: String,
}

impl UserPayload {
    pub fn is_bot(&self) -> bool {
        self.user_type == "Bot" || self.login.ends_with("[bot]")
    }
}

#[derive(Debug, Deserialize)]
pub struct InstallationPayload {
    pub id: u64,
}

impl RepositoryPayload {
    /// Combine with the installation the event was delivered for.
    pub fn to_repo_ref(&self, installation: Option<&InstallationPayload>) -> Result<RepoRef> {
        let installation = installation.ok_or_else(|| {
            AppError::InvalidEvent(format!("No installation in event for {}", self.full_name))
        })?;
        Ok(RepoRef {
            full_name: self.full_name.clone(),
            clone_url: self.clone_url.clone(),
            default_branch: self.default_branch.clone(),
            installation_id: installation.id,
        })
    }
}

impl WebhookEvent {
    pub fn parse(event_type: &str, payload: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        match event_type {
            "issues" => Ok(WebhookEvent::Issues(serde_json::from_slice(payload)?)),
            "issue_comment" => Ok(WebhookEvent::IssueComment(serde_json::from_slice(payload)?)),
            "pull_request" => Ok(WebhookEvent::PullRequest(serde_json::from_slice(payload)?)),
            "pull_request_review" => Ok(WebhookEvent::PullRequestReview(serde_json::from_slice(
                payload,
            )?)),
            "pull_request_review_comment" => Ok(WebhookEvent::PullRequestReviewComment(
                serde_json::from_slice(payload)?,
            )),
            "check_suite" => Ok(WebhookEvent::CheckSuite(serde_json::from_slice(payload)?)),
            "ping" => Ok(WebhookEvent::Ping),
            other => Ok(WebhookEvent::Unsupported(other.to_string())),
        }
    }
}

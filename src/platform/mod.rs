pub mod github;
pub mod state;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use crate::workflow::task::FileEdit;
use crate::workflow::types::{CommitRef, PullRequestRef};
use types::*;

/// Source-hosting operations the workflow engine depends on.
///
/// Every call fails with an `AppError` whose `external_kind()` tells auth,
/// rate-limit, not-found and network failures apart.
#[async_trait]
pub trait SourceHostingGateway: Send + Sync {
    /// Fetch a full issue with comments.
    async fn get_issue(&self, repo: &RepoRef, number: u64) -> Result<Issue>;

    /// Fetch a pull request.
    async fn get_pull_request(&self, repo: &RepoRef, number: u64) -> Result<PullRequest>;

    /// Unified diff of a pull request against its base.
    async fn get_pull_request_diff(&self, repo: &RepoRef, number: u64) -> Result<String>;

    /// Commit a change set and push it.
    ///
    /// When `branch` equals `base` the commit lands on top of the existing
    /// branch. Otherwise `branch` is (re)created from `base` first.
    async fn apply_change_set(
        &self,
        repo: &RepoRef,
        branch: &str,
        base: &str,
        change_set: &[FileEdit],
        message: &str,
    ) -> Result<CommitRef>;

    /// Create a pull request.
    async fn open_pull_request(
        &self,
        repo: &RepoRef,
        pr: &CreatePullRequest,
    ) -> Result<PullRequestRef>;

    /// Replace a pull request's description.
    async fn update_pull_request_body(&self, repo: &RepoRef, number: u64, body: &str)
        -> Result<()>;

    /// Submit a review on a pull request.
    async fn publish_review(
        &self,
        repo: &RepoRef,
        number: u64,
        review: &ReviewSubmission,
    ) -> Result<()>;

    /// Check runs reported for a commit.
    async fn get_ci_status(&self, repo: &RepoRef, git_ref: &str) -> Result<CiStatus>;

    /// Post a comment on an issue or PR.
    async fn post_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()>;
}

/// Resolves `owner/name` into full repository coordinates for requests that
/// arrive without a webhook payload.
#[async_trait]
pub trait RepositoryResolver: Send + Sync {
    async fn resolve(&self, full_name: &str) -> Result<RepoRef>;
}

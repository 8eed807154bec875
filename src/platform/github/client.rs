use async_trait::async_trait;
use octocrab::Octocrab;
use serde_json::json;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::{RepositoryResolver, SourceHostingGateway};
use crate::workflow::task::FileEdit;
use crate::workflow::types::{CommitRef, PullRequestRef};
use crate::workspace::manager::WorkspaceManager;

use super::auth::InstallationTokens;
use super::mapper;

/// GitHub App implementation of [`SourceHostingGateway`]. Reads go through
/// the REST API; commits go through a local clone.
pub struct GitHubGateway {
    tokens: Arc<InstallationTokens>,
    workspaces: Arc<WorkspaceManager>,
}

impl GitHubGateway {
    pub fn new(tokens: Arc<InstallationTokens>, workspaces: Arc<WorkspaceManager>) -> Self {
        Self { tokens, workspaces }
    }

    async fn client_for(&self, repo: &RepoRef) -> Result<(Octocrab, String, String)> {
        let (owner, name) = Self::parse_repo(repo)?;
        let client = self.tokens.client(repo.installation_id).await?;
        Ok((client, owner, name))
    }

    fn parse_repo(repo: &RepoRef) -> Result<(String, String)> {
        repo.owner_and_name()
            .map(|(o, n)| (o.to_string(), n.to_string()))
            .ok_or_else(|| AppError::GitHubApi(format!("Invalid repo name: {}", repo.full_name)))
    }

    /// Look up a repository by `owner/name` for requests that arrive without
    /// a webhook payload.
    pub async fn resolve_repository(&self, full_name: &str) -> Result<RepoRef> {
        let (owner, name) = full_name
            .split_once('/')
            .filter(|(o, n)| !o.is_empty() && !n.is_empty())
            .ok_or_else(|| AppError::InvalidEvent(format!("Invalid repository: {full_name}")))?;

        let installation_id = self.tokens.installation_for(owner, name).await?;
        let client = self.tokens.client(installation_id).await?;
        let repo = client.repos(owner, name).get().await?;

        Ok(RepoRef {
            full_name: full_name.to_string(),
            clone_url: repo
                .clone_url
                .map(|u| u.to_string())
                .unwrap_or_else(|| format!("https://github.com/{full_name}.git")),
            default_branch: repo.default_branch.unwrap_or_else(|| "main".to_string()),
            installation_id,
        })
    }
}

/// Clone, apply, commit and push. Runs on its own task and holds the clone
/// directory through a guard, so the directory is removed even when the
/// caller stops waiting.
async fn commit_change_set(
    workspaces: Arc<WorkspaceManager>,
    repo: RepoRef,
    token: String,
    branch: String,
    base: String,
    change_set: Vec<FileEdit>,
    message: String,
) -> Result<CommitRef> {
    let guard = workspaces.guard(&repo.full_name, workspaces.allocate_slot());

    // A fresh branch is recreated from base, so a leftover remote branch
    // from an earlier attempt has to be overwritten.
    let force = branch != base;
    let workspace = if force {
        workspaces
            .setup_branch(&repo, &token, &branch, &base, guard.slot())
            .await?
    } else {
        workspaces
            .checkout(&repo, &token, &branch, guard.slot())
            .await?
    };

    workspaces.apply(&workspace, &change_set).await?;
    let sha = workspaces
        .finalize(&workspace, &message, &token, force)
        .await?
        .ok_or_else(|| {
            AppError::Workspace(format!(
                "Change set left {} unchanged; nothing to commit",
                workspace.branch
            ))
        })?;
    drop(guard);

    Ok(CommitRef {
        sha,
        branch: workspace.branch,
    })
}

#[async_trait]
impl RepositoryResolver for GitHubGateway {
    async fn resolve(&self, full_name: &str) -> Result<RepoRef> {
        self.resolve_repository(full_name).await
    }
}

#[async_trait]
impl SourceHostingGateway for GitHubGateway {
    async fn get_issue(&self, repo: &RepoRef, number: u64) -> Result<Issue> {
        let (client, owner, name) = self.client_for(repo).await?;

        let issue = client.issues(&owner, &name).get(number).await?;

        let comments_page = client
            .issues(&owner, &name)
            .list_comments(number)
            .per_page(100)
            .send()
            .await?;

        Ok(mapper::map_issue(&issue, comments_page.items))
    }

    async fn get_pull_request(&self, repo: &RepoRef, number: u64) -> Result<PullRequest> {
        let (client, owner, name) = self.client_for(repo).await?;
        let pr = client.pulls(&owner, &name).get(number).await?;
        Ok(mapper::map_pull_request(pr))
    }

    async fn get_pull_request_diff(&self, repo: &RepoRef, number: u64) -> Result<String> {
        let (client, owner, name) = self.client_for(repo).await?;
        Ok(client.pulls(&owner, &name).get_diff(number).await?)
    }

    async fn apply_change_set(
        &self,
        repo: &RepoRef,
        branch: &str,
        base: &str,
        change_set: &[FileEdit],
        message: &str,
    ) -> Result<CommitRef> {
        let token = self.tokens.get(repo.installation_id).await?;

        let job = tokio::spawn(commit_change_set(
            Arc::clone(&self.workspaces),
            repo.clone(),
            token,
            branch.to_string(),
            base.to_string(),
            change_set.to_vec(),
            message.to_string(),
        ));
        let commit = job
            .await
            .map_err(|e| AppError::Workspace(format!("Commit task failed: {e}")))??;
        tracing::info!(
            repo = %repo.full_name,
            branch = %commit.branch,
            sha = %commit.sha,
            files = change_set.len(),
            "Pushed change set"
        );
        Ok(commit)
    }

    async fn open_pull_request(
        &self,
        repo: &RepoRef,
        pr: &CreatePullRequest,
    ) -> Result<PullRequestRef> {
        let (client, owner, name) = self.client_for(repo).await?;

        let created = client
            .pulls(&owner, &name)
            .create(&pr.title, &pr.head_branch, &pr.base_branch)
            .body(&pr.body)
            .send()
            .await?;

        let created = mapper::map_pull_request(created);
        Ok(PullRequestRef {
            number: created.number,
            url: created.url,
            head_branch: created.head_branch,
        })
    }

    async fn update_pull_request_body(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<()> {
        let (client, owner, name) = self.client_for(repo).await?;
        client
            .pulls(&owner, &name)
            .update(number)
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    async fn publish_review(
        &self,
        repo: &RepoRef,
        number: u64,
        review: &ReviewSubmission,
    ) -> Result<()> {
        let (client, owner, name) = self.client_for(repo).await?;

        // octocrab has no review-creation builder, use the API directly
        let url = format!("/repos/{owner}/{name}/pulls/{number}/reviews");
        let mut payload = json!({
            "event": review.event,
            "body": review.body,
        });
        // GitHub rejects an empty comments array
        if !review.comments.is_empty() {
            payload["comments"] = json!(review.comments);
        }
        let _: serde_json::Value = client.post(&url, Some(&payload)).await?;

        Ok(())
    }

    async fn get_ci_status(&self, repo: &RepoRef, git_ref: &str) -> Result<CiStatus> {
        let (client, owner, name) = self.client_for(repo).await?;

        let url = format!(
            "/repos/{owner}/{name}/commits/{}/check-runs?per_page=100",
            urlencoding::encode(git_ref)
        );
        let response: serde_json::Value = client.get(&url, None::<&()>).await?;

        let checks = response["check_runs"]
            .as_array()
            .map(|runs| runs.iter().map(mapper::map_check_run).collect())
            .unwrap_or_default();

        Ok(CiStatus { checks })
    }

    async fn post_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        let (client, owner, name) = self.client_for(repo).await?;

        client
            .issues(&owner, &name)
            .create_comment(number, body)
            .await?;

        Ok(())
    }
}

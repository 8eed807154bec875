use std::path::Path;

use git2::{
    build::RepoBuilder, Cred, ErrorCode, FetchOptions, IndexAddOption, PushOptions,
    RemoteCallbacks, Repository, Signature,
};

use crate::error::{AppError, Result};

const COMMIT_AUTHOR: &str = "Patcher Bot";
const COMMIT_EMAIL: &str = "patcher[bot]@users.noreply.github.com";

/// Reject names starting with `-` so they can never be read as options.
fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('-') {
        return Err(AppError::Git(format!("Invalid branch name: {name:?}")));
    }
    Ok(())
}

/// Credentials come from a callback; the token never reaches `.git/config`.
fn make_fetch_options(token: &str) -> FetchOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

fn make_push_options(token: &str) -> PushOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

fn switch_to(repo: &Repository, branch_name: &str) -> Result<()> {
    let refname = format!("refs/heads/{branch_name}");
    let obj = repo.revparse_single(&refname)?;
    repo.checkout_tree(&obj, None)?;
    repo.set_head(&refname)?;
    Ok(())
}

/// Clone a repository over HTTPS into `target`.
pub async fn clone(url: &str, target: &Path, token: &str) -> Result<()> {
    if !url.starts_with("https://") {
        return Err(AppError::Git(format!("Expected HTTPS clone URL, got: {url}")));
    }

    let url = url.to_string();
    let target = target.to_path_buf();
    let token = token.to_string();

    tokio::task::spawn_blocking(move || {
        let fetch_opts = make_fetch_options(&token);
        RepoBuilder::new()
            .fetch_options(fetch_opts)
            .clone(&url, &target)?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Clone task panicked: {e}")))?
}

/// Name of the branch HEAD points at, if any.
pub async fn current_branch(dir: &Path) -> Result<Option<String>> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<Option<String>> {
        let repo = Repository::open(&dir)?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => {
                return Ok(repo
                    .find_reference("HEAD")?
                    .symbolic_target()
                    .and_then(|t| t.strip_prefix("refs/heads/"))
                    .map(str::to_string));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(head.is_branch().then(|| head.shorthand().map(str::to_string)).flatten())
    })
    .await
    .map_err(|e| AppError::Git(format!("Current-branch task panicked: {e}")))?
}

/// Fetch a remote branch and check it out locally.
pub async fn fetch_and_checkout(dir: &Path, branch_name: &str, token: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let token = token.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;

        let refspec = format!("+refs/heads/{branch_name}:refs/remotes/origin/{branch_name}");
        let mut fetch_opts = make_fetch_options(&token);
        remote.fetch(&[&refspec], Some(&mut fetch_opts), None)?;

        let reference = repo.find_reference(&format!("refs/remotes/origin/{branch_name}"))?;
        let commit = reference.peel_to_commit()?;
        repo.branch(&branch_name, &commit, false)?;
        switch_to(&repo, &branch_name)
    })
    .await
    .map_err(|e| AppError::Git(format!("Fetch-and-checkout task panicked: {e}")))?
}

/// Create a branch at HEAD and check it out.
pub async fn create_branch(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let commit = repo.head()?.peel_to_commit()?;
        repo.branch(&branch_name, &commit, false)?;
        switch_to(&repo, &branch_name)
    })
    .await
    .map_err(|e| AppError::Git(format!("Create-branch task panicked: {e}")))?
}

/// Stage additions, modifications and deletions.
pub async fn stage_all(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Stage task panicked: {e}")))?
}

/// Commit the index onto HEAD and return the new commit's SHA.
pub async fn commit(dir: &Path, message: &str) -> Result<String> {
    let dir = dir.to_path_buf();
    let message = message.to_string();

    tokio::task::spawn_blocking(move || -> Result<String> {
        let repo = Repository::open(&dir)?;
        let sig = Signature::now(COMMIT_AUTHOR, COMMIT_EMAIL)?;
        let mut index = repo.index()?;
        let tree = repo.find_tree(index.write_tree()?)?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)?;
        Ok(oid.to_string())
    })
    .await
    .map_err(|e| AppError::Git(format!("Commit task panicked: {e}")))?
}

/// Push a branch to origin. `force` overwrites diverged remote history.
pub async fn push(dir: &Path, branch_name: &str, token: &str, force: bool) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let refspec = format!(
        "{}refs/heads/{branch_name}:refs/heads/{branch_name}",
        if force { "+" } else { "" }
    );
    let token = token.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let mut push_opts = make_push_options(&token);
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Push task panicked: {e}")))?
}

/// Whether the working tree differs from HEAD (untracked files included).
pub async fn has_changes(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let statuses = repo.statuses(None)?;
        Ok(!statuses.is_empty())
    })
    .await
    .map_err(|e| AppError::Git(format!("Has-changes task panicked: {e}")))?
}

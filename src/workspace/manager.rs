use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};
use crate::platform::types::RepoRef;
use crate::workflow::task::{EditKind, FileEdit};
use crate::workspace::git;

/// Hands out isolated clone directories under `base_dir`.
pub struct WorkspaceManager {
    base_dir: PathBuf,
    next_slot: AtomicU64,
}

/// Owns a workspace directory and removes it when dropped, including when
/// the future holding it is cancelled mid-commit.
#[derive(Debug)]
pub struct WorkspaceGuard {
    path: PathBuf,
    slot: u64,
}

impl WorkspaceGuard {
    pub fn slot(&self) -> u64 {
        self.slot
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        let remove = move || {
            if path.exists() {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    tracing::warn!(error = %e, path = %path.display(), "Failed to clean up workspace");
                }
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

/// A checked-out clone with `branch` as HEAD.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
}

impl WorkspaceManager {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            next_slot: AtomicU64::new(1),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// A slot number no other workspace of this process uses.
    pub fn allocate_slot(&self) -> u64 {
        self.next_slot.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserve the directory for `slot`. It is deleted when the guard drops.
    pub fn guard(&self, repo_full_name: &str, slot: u64) -> WorkspaceGuard {
        WorkspaceGuard {
            path: self.workspace_path(repo_full_name, slot),
            slot,
        }
    }

    /// Clean up an existing workspace directory and ensure its parent exists.
    async fn prepare_workspace_dir(path: &Path) -> Result<()> {
        if path.exists() {
            tokio::fs::remove_dir_all(path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to clean workspace: {e}")))?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to create workspace dir: {e}")))?;
        }
        Ok(())
    }

    /// Clone `repo` and check out `git_ref`.
    pub async fn checkout(
        &self,
        repo: &RepoRef,
        token: &str,
        git_ref: &str,
        slot: u64,
    ) -> Result<Workspace> {
        let path = self.workspace_path(&repo.full_name, slot);
        Self::prepare_workspace_dir(&path).await?;

        git::clone(&repo.clone_url, &path, token).await?;
        if git::current_branch(&path).await?.as_deref() != Some(git_ref) {
            git::fetch_and_checkout(&path, git_ref, token).await?;
        }

        Ok(Workspace {
            path,
            branch: git_ref.to_string(),
        })
    }

    /// Check out `base` and, when `branch` differs, start `branch` from it.
    /// An existing remote `branch` is overwritten on the next forced push.
    pub async fn setup_branch(
        &self,
        repo: &RepoRef,
        token: &str,
        branch: &str,
        base: &str,
        slot: u64,
    ) -> Result<Workspace> {
        let mut workspace = self.checkout(repo, token, base, slot).await?;
        if branch != base {
            git::create_branch(&workspace.path, branch).await?;
            workspace.branch = branch.to_string();
        }
        Ok(workspace)
    }

    /// Write a change set into the working tree.
    pub async fn apply(&self, workspace: &Workspace, edits: &[FileEdit]) -> Result<()> {
        for edit in edits {
            let target = Self::verify_path(&workspace.path, Path::new(&edit.path))?;
            match edit.kind {
                EditKind::Delete => {
                    if target.exists() {
                        tokio::fs::remove_file(&target).await.map_err(|e| {
                            AppError::Workspace(format!("Failed to delete {}: {e}", edit.path))
                        })?;
                    }
                }
                EditKind::Create | EditKind::Modify => {
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, &edit.content).await.map_err(|e| {
                        AppError::Workspace(format!("Failed to write {}: {e}", edit.path))
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Commit and push changes from the workspace. Returns the commit SHA, or
    /// `None` when the tree was already clean.
    ///
    /// When `force` is true the push overwrites the remote branch even if
    /// histories have diverged (re-processing an issue whose branch exists).
    pub async fn finalize(
        &self,
        workspace: &Workspace,
        commit_message: &str,
        token: &str,
        force: bool,
    ) -> Result<Option<String>> {
        if !git::has_changes(&workspace.path).await? {
            tracing::info!(branch = %workspace.branch, "No changes to commit");
            return Ok(None);
        }

        git::stage_all(&workspace.path).await?;
        let sha = git::commit(&workspace.path, commit_message).await?;
        git::push(&workspace.path, &workspace.branch, token, force).await?;

        Ok(Some(sha))
    }

    pub async fn cleanup_path(&self, path: &Path) -> Result<()> {
        if path.exists() {
            tokio::fs::remove_dir_all(path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to cleanup workspace: {e}")))?;
        }
        Ok(())
    }

    pub fn workspace_path(&self, repo_full_name: &str, slot: u64) -> PathBuf {
        let safe_name = repo_full_name.replace('/', "__");
        self.base_dir.join(format!("{safe_name}__{slot}"))
    }

    /// Verify a path is within the workspace (path traversal protection).
    pub fn verify_path(workspace_root: &Path, requested_path: &Path) -> Result<PathBuf> {
        if requested_path.is_absolute() {
            return Err(AppError::Workspace(format!(
                "Absolute path not allowed: {}",
                requested_path.display()
            )));
        }
        let full_path = workspace_root.join(requested_path);

        // Canonicalize to resolve .. and symlinks. For files that do not exist
        // yet, resolve the nearest existing ancestor instead.
        let mut existing = full_path.as_path();
        let mut tail = Vec::new();
        while !existing.exists() {
            let name = existing
                .file_name()
                .ok_or_else(|| AppError::Workspace("Invalid file path".to_string()))?;
            tail.push(name.to_os_string());
            existing = existing
                .parent()
                .ok_or_else(|| AppError::Workspace("Invalid file path".to_string()))?;
        }

        let mut canonical = existing
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;
        for name in tail.into_iter().rev() {
            canonical.push(name);
        }

        let canonical_root = workspace_root
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve workspace root: {e}")))?;

        if !canonical.starts_with(&canonical_root) {
            return Err(AppError::Workspace(format!(
                "Path traversal detected: {} is outside workspace",
                requested_path.display()
            )));
        }

        Ok(canonical)
    }
}

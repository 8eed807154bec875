use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use crate::config::{AgentConfig, WorkspaceConfig};
use crate::context::languages::{self, DEFINITION_LANGUAGES, SKIPPED_DIRS};
use crate::context::{Checkout, CodeContextProvider, FileSummary, RepoMap, SearchHit, Symbol};
use crate::error::{AppError, Result};
use crate::platform::github::InstallationTokens;
use crate::platform::types::RepoRef;
use crate::workspace::manager::WorkspaceManager;

const MAX_DEFINITION_HITS: usize = 20;
const MAX_HIT_TEXT: usize = 200;

/// Clones each requested ref into its own directory and answers queries
/// from the local files.
pub struct LocalCodeContext {
    workspaces: WorkspaceManager,
    tokens: Arc<InstallationTokens>,
    max_file_size: usize,
    max_search_results: usize,
}

impl LocalCodeContext {
    pub fn new(
        workspace: &WorkspaceConfig,
        agent: &AgentConfig,
        tokens: Arc<InstallationTokens>,
    ) -> Self {
        // Checkouts live apart from the commit workspaces so slot numbers
        // cannot collide.
        let workspaces = WorkspaceManager::new(&WorkspaceConfig {
            base_dir: workspace.base_dir.join("context"),
        });
        Self {
            workspaces,
            tokens,
            max_file_size: agent.max_file_size_bytes,
            max_search_results: agent.max_search_results,
        }
    }
}

#[async_trait]
impl CodeContextProvider for LocalCodeContext {
    async fn open(&self, repo: &RepoRef, git_ref: &str, slot: u64) -> Result<Checkout> {
        let token = self.tokens.get(repo.installation_id).await?;
        let workspace = self.workspaces.checkout(repo, &token, git_ref, slot).await?;
        tracing::debug!(repo = %repo.full_name, git_ref, slot, "Opened checkout");
        Ok(Checkout {
            slot,
            root: workspace.path,
            git_ref: workspace.branch,
        })
    }

    async fn map_repository(&self, checkout: &Checkout) -> Result<RepoMap> {
        let root = checkout.root.clone();
        let max_file_size = self.max_file_size;
        tokio::task::spawn_blocking(move || map_directory(&root, max_file_size))
            .await
            .map_err(|e| AppError::Internal(format!("Repository map task panicked: {e}")))
    }

    async fn search_code(&self, checkout: &Checkout, query: &str) -> Result<Vec<SearchHit>> {
        let pattern = Regex::new(query)
            .or_else(|_| Regex::new(&regex::escape(query)))
            .map_err(|e| AppError::Internal(format!("Unusable search query {query:?}: {e}")))?;
        let root = checkout.root.clone();
        let (max_file_size, limit) = (self.max_file_size, self.max_search_results);

        tokio::task::spawn_blocking(move || {
            search_directory(&root, &pattern, None, max_file_size, limit)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Search task panicked: {e}")))
    }

    async fn read_file(&self, checkout: &Checkout, path: &str) -> Result<String> {
        read_checked(&checkout.root, path, self.max_file_size).await
    }

    async fn find_definition(
        &self,
        checkout: &Checkout,
        symbol: &str,
        language: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let targets: Vec<&str> = match language {
            Some(lang) if DEFINITION_LANGUAGES.contains(&lang) => vec![lang],
            _ => DEFINITION_LANGUAGES.to_vec(),
        };

        let mut searches = Vec::new();
        for lang in targets {
            if let Some(pattern) = languages::definition_pattern(lang, symbol) {
                let re = Regex::new(&pattern)
                    .map_err(|e| AppError::Internal(format!("Bad definition pattern: {e}")))?;
                searches.push((lang.to_string(), re));
            }
        }

        let root = checkout.root.clone();
        let max_file_size = self.max_file_size;
        tokio::task::spawn_blocking(move || {
            let mut hits = Vec::new();
            for (lang, re) in &searches {
                let remaining = MAX_DEFINITION_HITS.saturating_sub(hits.len());
                if remaining == 0 {
                    break;
                }
                hits.extend(search_directory(
                    &root,
                    re,
                    Some(lang.as_str()),
                    max_file_size,
                    remaining,
                ));
            }
            hits
        })
        .await
        .map_err(|e| AppError::Internal(format!("Definition search task panicked: {e}")))
    }

    async fn close(&self, checkout: Checkout) -> Result<()> {
        self.workspaces.cleanup_path(&checkout.root).await
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// Source files under `root` as (relative path, language, absolute path),
/// sorted by relative path.
fn source_files(root: &Path, max_file_size: usize) -> Vec<(String, &'static str, PathBuf)> {
    let mut files: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.metadata()
                .map(|m| m.len() as usize <= max_file_size)
                .unwrap_or(false)
        })
        .filter_map(|e| {
            let language = languages::detect(e.path())?;
            let relative = e.path().strip_prefix(root).ok()?;
            let relative = relative.to_string_lossy().replace('\\', "/");
            Some((relative, language, e.path().to_path_buf()))
        })
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

pub fn map_directory(root: &Path, max_file_size: usize) -> RepoMap {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    let mut files = Vec::new();

    for (relative, language, absolute) in source_files(root, max_file_size) {
        *counts.entry(language).or_default() += 1;
        let symbols: Vec<Symbol> = std::fs::read_to_string(&absolute)
            .map(|source| {
                languages::extract_symbols(language, &source)
                    .into_iter()
                    .map(|(name, kind, line)| Symbol { name, kind, line })
                    .collect()
            })
            .unwrap_or_default();
        files.push(FileSummary {
            path: relative,
            language,
            symbols,
        });
    }

    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(lang, count)| (lang.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    RepoMap {
        languages: ranked,
        files,
    }
}

pub fn search_directory(
    root: &Path,
    pattern: &Regex,
    language: Option<&str>,
    max_file_size: usize,
    limit: usize,
) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    for (relative, file_language, absolute) in source_files(root, max_file_size) {
        if language.is_some_and(|l| l != file_language) {
            continue;
        }
        let Ok(source) = std::fs::read_to_string(&absolute) else {
            continue;
        };
        for (i, line) in source.lines().enumerate() {
            if pattern.is_match(line) {
                hits.push(SearchHit {
                    path: relative.clone(),
                    line: i + 1,
                    text: line.trim().chars().take(MAX_HIT_TEXT).collect(),
                });
                if hits.len() >= limit {
                    return hits;
                }
            }
        }
    }
    hits
}

/// Read a file inside `root`, refusing traversal and oversized files.
pub async fn read_checked(root: &Path, path: &str, max_file_size: usize) -> Result<String> {
    let full_path = WorkspaceManager::verify_path(root, Path::new(path))?;

    if !full_path.is_file() {
        return Err(AppError::Workspace(format!("File not found: {path}")));
    }

    let metadata = tokio::fs::metadata(&full_path)
        .await
        .map_err(|e| AppError::Workspace(format!("Failed to read file metadata: {e}")))?;

    if metadata.len() as usize > max_file_size {
        return Err(AppError::Workspace(format!(
            "File is too large ({} bytes, max {max_file_size} bytes)",
            metadata.len()
        )));
    }

    tokio::fs::read_to_string(&full_path)
        .await
        .map_err(|e| AppError::Workspace(format!("Failed to read {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        fs::write(
            root.join("src/app.py"),
            "class App:\n    def run(self):\n        return parse_args()\n",
        )
        .unwrap();
        fs::write(root.join("src/cli.py"), "def parse_args():\n    return []\n").unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn parse_args() {}\n").unwrap();
        fs::write(root.join("node_modules/dep/index.js"), "function parse_args() {}\n").unwrap();
        tmp
    }

    #[test]
    fn test_map_skips_vendored_dirs() {
        let tmp = fixture();
        let map = map_directory(tmp.path(), 1024);

        assert_eq!(map.languages[0], ("python".to_string(), 2));
        assert!(map.files.iter().all(|f| !f.path.starts_with("node_modules")));
        let app = map.files.iter().find(|f| f.path == "src/app.py").unwrap();
        assert_eq!(app.symbols.len(), 2);
    }

    #[test]
    fn test_search_respects_limit() {
        let tmp = fixture();
        let re = Regex::new("parse_args").unwrap();
        let hits = search_directory(tmp.path(), &re, None, 1024, 10);
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| !h.path.contains("node_modules")));

        let capped = search_directory(tmp.path(), &re, None, 1024, 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_definition_search_by_language() {
        let tmp = fixture();
        let re = Regex::new(&languages::definition_pattern("python", "parse_args").unwrap()).unwrap();
        let hits = search_directory(tmp.path(), &re, Some("python"), 1024, 20);
        assert_eq!(
            hits,
            vec![SearchHit {
                path: "src/cli.py".to_string(),
                line: 1,
                text: "def parse_args():".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_read_checked_limits() {
        let tmp = fixture();
        assert!(read_checked(tmp.path(), "src/cli.py", 1024).await.is_ok());
        assert!(read_checked(tmp.path(), "src/cli.py", 4).await.is_err());
        assert!(read_checked(tmp.path(), "../outside", 1024).await.is_err());
        assert!(read_checked(tmp.path(), "src/missing.py", 1024).await.is_err());
    }
}

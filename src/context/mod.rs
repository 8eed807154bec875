pub mod languages;
pub mod local;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::platform::types::RepoRef;

/// A read-only checkout of one ref. `slot` keeps concurrent checkouts of the
/// same repository apart.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub slot: u64,
    pub root: PathBuf,
    pub git_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub kind: &'static str,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub language: &'static str,
    pub symbols: Vec<Symbol>,
}

/// Languages and top-level symbols of a checkout.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepoMap {
    /// Language and file count, most common first.
    pub languages: Vec<(String, usize)>,
    pub files: Vec<FileSummary>,
}

impl RepoMap {
    /// Compact outline for prompts: one line per file, symbols indented below.
    pub fn render(&self, max_files: usize) -> String {
        let mut out = String::new();
        for file in self.files.iter().take(max_files) {
            out.push_str(&file.path);
            out.push('\n');
            for symbol in &file.symbols {
                out.push_str(&format!("  {} {} (L{})\n", symbol.kind, symbol.name, symbol.line));
            }
        }
        if self.files.len() > max_files {
            out.push_str(&format!("... {} more files\n", self.files.len() - max_files));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub line: usize,
    pub text: String,
}

/// Read-only view of repository contents at a ref.
#[async_trait]
pub trait CodeContextProvider: Send + Sync {
    async fn open(&self, repo: &RepoRef, git_ref: &str, slot: u64) -> Result<Checkout>;

    async fn map_repository(&self, checkout: &Checkout) -> Result<RepoMap>;

    /// Regex search over source files.
    async fn search_code(&self, checkout: &Checkout, query: &str) -> Result<Vec<SearchHit>>;

    async fn read_file(&self, checkout: &Checkout, path: &str) -> Result<String>;

    /// Definition sites of `symbol`, narrowed to `language` when given.
    async fn find_definition(
        &self,
        checkout: &Checkout,
        symbol: &str,
        language: Option<&str>,
    ) -> Result<Vec<SearchHit>>;

    async fn close(&self, checkout: Checkout) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_truncates() {
        let map = RepoMap {
            languages: vec![("rust".to_string(), 2)],
            files: vec![
                FileSummary {
                    path: "src/lib.rs".to_string(),
                    language: "rust",
                    symbols: vec![Symbol {
                        name: "run".to_string(),
                        kind: "function",
                        line: 3,
                    }],
                },
                FileSummary {
                    path: "src/main.rs".to_string(),
                    language: "rust",
                    symbols: vec![],
                },
            ],
        };

        let rendered = map.render(1);
        assert!(rendered.contains("src/lib.rs\n  function run (L3)"));
        assert!(rendered.contains("... 1 more files"));
        assert!(!rendered.contains("src/main.rs"));
    }
}

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Webhook verification failed: {0}")]
    WebhookVerification(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("GitHub authentication failed: {0}")]
    GitHubAuth(String),

    #[error("GitHub API rate limited: {0}")]
    GitHubRateLimited(String),

    #[error("GitHub resource not found: {0}")]
    GitHubNotFound(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Model API error: {0}")]
    ModelApi(String),

    #[error("Model API authentication failed: {0}")]
    ModelAuth(String),

    #[error("Model API rate limited: {0}")]
    ModelRateLimited(String),

    #[error("Model API transient error: {0}")]
    ModelTransient(String),

    #[error("External call timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a collaborator failure, recorded on
/// `TerminalResult::ExternalFailure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalErrorKind {
    Auth,
    RateLimit,
    NotFound,
    Network,
    Timeout,
    Malformed,
    Other,
}

impl std::fmt::Display for ExternalErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExternalErrorKind::Auth => "authentication",
            ExternalErrorKind::RateLimit => "rate limit",
            ExternalErrorKind::NotFound => "not found",
            ExternalErrorKind::Network => "network",
            ExternalErrorKind::Timeout => "timeout",
            ExternalErrorKind::Malformed => "malformed response",
            ExternalErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

impl AppError {
    pub fn external_kind(&self) -> ExternalErrorKind {
        match self {
            AppError::GitHubAuth(_) | AppError::ModelAuth(_) => ExternalErrorKind::Auth,
            AppError::GitHubRateLimited(_) | AppError::ModelRateLimited(_) => {
                ExternalErrorKind::RateLimit
            }
            AppError::GitHubNotFound(_) => ExternalErrorKind::NotFound,
            AppError::Timeout(_) => ExternalErrorKind::Timeout,
            AppError::Http(e) if e.is_timeout() => ExternalErrorKind::Timeout,
            AppError::Http(e) if e.is_decode() => ExternalErrorKind::Malformed,
            AppError::Http(_) | AppError::ModelTransient(_) | AppError::Git(_) => {
                ExternalErrorKind::Network
            }
            AppError::Serialization(_) => ExternalErrorKind::Malformed,
            _ => ExternalErrorKind::Other,
        }
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        match &e {
            octocrab::Error::GitHub { source, .. } => match source.status_code.as_u16() {
                401 | 403 if source.message.to_lowercase().contains("rate limit") => {
                    AppError::GitHubRateLimited(source.message.clone())
                }
                401 | 403 => AppError::GitHubAuth(source.message.clone()),
                404 => AppError::GitHubNotFound(source.message.clone()),
                429 => AppError::GitHubRateLimited(source.message.clone()),
                _ => AppError::GitHubApi(e.to_string()),
            },
            _ => AppError::GitHubApi(e.to_string()),
        }
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub claude: Option<ClaudeConfig>,
    #[serde(default)]
    pub openai: Option<OpenAiConfig>,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

#[derive(Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token for the synchronous `/api/review` endpoint. The endpoint
    /// is disabled when unset.
    #[serde(default)]
    pub api_token: Option<String>,
}

// Manual Debug impl to avoid leaking the API token
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    pub app_id: u64,
    pub private_key_path: PathBuf,
    pub webhook_secret: String,
    #[serde(default = "default_trigger_label")]
    pub trigger_label: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_mention")]
    pub mention: String,
}

// Manual Debug impl to avoid leaking the webhook secret
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("app_id", &self.app_id)
            .field("private_key_path", &self.private_key_path)
            .field("webhook_secret", &"[REDACTED]")
            .field("trigger_label", &self.trigger_label)
            .field("branch_prefix", &self.branch_prefix)
            .field("mention", &self.mention)
            .finish()
    }
}

/// Which model backend serves structured requests.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelProvider {
    #[default]
    #[serde(rename = "claude")]
    Claude,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ModelProvider {
    pub fn name(self) -> &'static str {
        match self {
            ModelProvider::Claude => "claude",
            ModelProvider::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ModelProvider,
}

#[derive(Deserialize, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Overrides the Messages endpoint, e.g. for a proxy.
    #[serde(default)]
    pub api_url: Option<String>,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default)]
    pub api_url: Option<String>,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub base_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_workspace_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: usize,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    /// How many file excerpts the analysis step pulls into the task context.
    #[serde(default = "default_max_context_files")]
    pub max_context_files: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            max_search_results: default_max_search_results(),
            max_context_files: default_max_context_files(),
        }
    }
}

/// Limits and policy for the workflow engine. Resolved once at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct OrchestrationConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_validator_retry_limit")]
    pub validator_retry_limit: u32,
    #[serde(default = "default_protected_path_patterns")]
    pub protected_path_patterns: Vec<String>,
    #[serde(default = "default_external_call_timeout_secs")]
    pub external_call_timeout_secs: u64,
    /// How long a review waits for running checks before deciding. Zero
    /// disables the wait.
    #[serde(default = "default_ci_wait_secs")]
    pub ci_wait_secs: u64,
    #[serde(default = "default_ci_poll_interval_secs")]
    pub ci_poll_interval_secs: u64,
    /// Check names containing any of these (case-insensitive) are patcher's
    /// own and never gate a review.
    #[serde(default = "default_own_check_patterns")]
    pub own_check_patterns: Vec<String>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            validator_retry_limit: default_validator_retry_limit(),
            protected_path_patterns: default_protected_path_patterns(),
            external_call_timeout_secs: default_external_call_timeout_secs(),
            ci_wait_secs: default_ci_wait_secs(),
            ci_poll_interval_secs: default_ci_poll_interval_secs(),
            own_check_patterns: default_own_check_patterns(),
        }
    }
}

impl OrchestrationConfig {
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs)
    }

    pub fn ci_wait(&self) -> Duration {
        Duration::from_secs(self.ci_wait_secs)
    }

    pub fn ci_poll_interval(&self) -> Duration {
        Duration::from_secs(self.ci_poll_interval_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_trigger_label() -> String {
    "patcher".to_string()
}

fn default_branch_prefix() -> String {
    "patcher/".to_string()
}

fn default_mention() -> String {
    "patcher".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/tmp/patcher-workspaces")
}

fn default_max_file_size() -> usize {
    512 * 1024 // 512 KB
}

fn default_max_search_results() -> usize {
    50
}

fn default_max_context_files() -> usize {
    8
}

fn default_max_iterations() -> u32 {
    3
}

fn default_validator_retry_limit() -> u32 {
    2
}

pub fn default_protected_path_patterns() -> Vec<String> {
    [
        "/.github/workflows/**",
        "/.github/actions/**",
        "/.gitlab-ci.yml",
        "/.circleci/**",
        "/.travis.yml",
        "/azure-pipelines.yml",
        "/Jenkinsfile",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_external_call_timeout_secs() -> u64 {
    600
}

fn default_ci_wait_secs() -> u64 {
    600
}

fn default_ci_poll_interval_secs() -> u64 {
    30
}

pub fn default_own_check_patterns() -> Vec<String> {
    vec!["patcher".to_string(), "ai-review".to_string()]
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(config::File::with_name("patcher").required(false));
        }

        // Environment variable overrides with PATCHER_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("PATCHER")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("orchestration.protected_path_patterns")
                .with_list_parse_key("orchestration.own_check_patterns")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the workflow engine misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.orchestration.protected_path_patterns.is_empty() {
            tracing::warn!("No protected path patterns configured; CI configuration is unprotected");
        }
        crate::workflow::restriction::RestrictionEnforcer::new(
            &self.orchestration.protected_path_patterns,
        )?;
        if self.orchestration.external_call_timeout_secs == 0 {
            return Err(AppError::Config(
                "orchestration.external_call_timeout_secs must be positive".to_string(),
            ));
        }
        if self.orchestration.ci_wait_secs > 0 && self.orchestration.ci_poll_interval_secs == 0 {
            return Err(AppError::Config(
                "orchestration.ci_poll_interval_secs must be positive when ci_wait_secs is set"
                    .to_string(),
            ));
        }
        let provider_configured = match self.llm.provider {
            ModelProvider::Claude => self.claude.is_some(),
            ModelProvider::OpenAi => self.openai.is_some(),
        };
        if !provider_configured {
            return Err(AppError::Config(format!(
                "llm.provider is {0} but the [{0}] section is missing",
                self.llm.provider.name()
            )));
        }
        if !self.github.branch_prefix.ends_with('/') {
            return Err(AppError::Config(format!(
                "github.branch_prefix must end with '/': {}",
                self.github.branch_prefix
            )));
        }
        Ok(())
    }

    pub fn webhook_secret(&self) -> &str {
        &self.github.webhook_secret
    }
}

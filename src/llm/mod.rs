pub mod claude;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::{AppConfig, ModelProvider};
use crate::error::{AppError, Result};

/// Longest rejected answer echoed back to the model on a retry.
const MAX_ECHOED_RESPONSE_CHARS: usize = 4000;

/// A rejected model answer and the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub response: String,
    pub error: String,
}

impl Correction {
    /// The rejected answer as replayed in the assistant turn.
    pub fn echoed_response(&self) -> String {
        let echoed: String = self
            .response
            .chars()
            .take(MAX_ECHOED_RESPONSE_CHARS)
            .collect();
        if echoed.trim().is_empty() {
            "(empty response)".to_string()
        } else {
            echoed
        }
    }

    /// The user turn that asks for another attempt through `tool`.
    pub fn retry_instruction(&self, tool: &str) -> String {
        format!(
            "Your previous response could not be used: {}\n\nRespond again using the `{tool}` tool with output that matches its schema exactly.",
            self.error
        )
    }
}

/// Everything sent to the model for one structured request.
///
/// Corrections are only ever appended; each retry sees every earlier failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    system: String,
    request: String,
    corrections: Vec<Correction>,
}

impl PromptContext {
    pub fn new(system: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            request: request.into(),
            corrections: Vec::new(),
        }
    }

    pub fn add_correction(&mut self, response: &str, error: &str) {
        self.corrections.push(Correction {
            response: response.to_string(),
            error: error.to_string(),
        });
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn corrections(&self) -> &[Correction] {
        &self.corrections
    }
}

/// Describes the JSON shape the model must produce.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaHint {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: serde_json::Value,
}

/// Language-model backend. Returns the raw response text; parsing is the
/// caller's job.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(&self, prompt: &PromptContext, schema: &SchemaHint) -> Result<String>;
}

/// Build the backend selected by `llm.provider`.
pub fn gateway_from_config(config: &AppConfig) -> Result<Arc<dyn ModelGateway>> {
    let missing = || {
        AppError::Config(format!(
            "No [{}] section for the selected model provider",
            config.llm.provider.name()
        ))
    };
    let gateway: Arc<dyn ModelGateway> = match config.llm.provider {
        ModelProvider::Claude => Arc::new(claude::ClaudeClient::new(
            config.claude.as_ref().ok_or_else(missing)?,
        )?),
        ModelProvider::OpenAi => Arc::new(openai::OpenAiClient::new(
            config.openai.as_ref().ok_or_else(missing)?,
        )?),
    };
    tracing::info!(provider = config.llm.provider.name(), "Model provider selected");
    Ok(gateway)
}

/// Map a failed HTTP status from any model API onto the error taxonomy.
pub(crate) fn classify_status(status: StatusCode, body: String) -> AppError {
    let message = format!("API returned {status}: {body}");
    match status.as_u16() {
        401 | 403 => AppError::ModelAuth(message),
        429 => AppError::ModelRateLimited(message),
        408 => AppError::Timeout(message),
        500..=599 => AppError::ModelTransient(message),
        _ => AppError::ModelApi(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalErrorKind;

    #[test]
    fn test_status_classification() {
        let kind = |code: u16| {
            classify_status(StatusCode::from_u16(code).unwrap(), String::new()).external_kind()
        };
        assert_eq!(kind(401), ExternalErrorKind::Auth);
        assert_eq!(kind(429), ExternalErrorKind::RateLimit);
        assert_eq!(kind(529), ExternalErrorKind::Network);
        assert_eq!(kind(408), ExternalErrorKind::Timeout);
        assert_eq!(kind(400), ExternalErrorKind::Other);
    }

    #[test]
    fn test_correction_turns() {
        let empty = Correction {
            response: "  ".to_string(),
            error: "no JSON object found".to_string(),
        };
        assert_eq!(empty.echoed_response(), "(empty response)");
        let retry = empty.retry_instruction("submit_code");
        assert!(retry.contains("no JSON object found"));
        assert!(retry.contains("`submit_code`"));

        let long = Correction {
            response: "x".repeat(MAX_ECHOED_RESPONSE_CHARS + 10),
            error: String::new(),
        };
        assert_eq!(long.echoed_response().len(), MAX_ECHOED_RESPONSE_CHARS);
    }

    #[test]
    fn test_corrections_accumulate() {
        let mut prompt = PromptContext::new("system", "do the thing");
        prompt.add_correction("{", "EOF while parsing");
        prompt.add_correction("{}", "missing field `files`");

        assert_eq!(prompt.corrections().len(), 2);
        assert_eq!(prompt.corrections()[1].error, "missing field `files`");
        assert_eq!(prompt.request(), "do the thing");
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::llm::{ModelGateway, PromptContext, SchemaHint};

/// A shape the model must produce.
pub trait OutputSchema: DeserializeOwned + Send {
    fn hint() -> SchemaHint;

    /// Semantic checks that serde cannot express.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome<T> {
    Parsed(T),
    Exhausted { last_error: String, attempts: u32 },
}

/// Requests structured output with a fixed retry budget.
///
/// A request makes at most `retry_limit + 1` gateway calls. Responses are
/// checked against the JSON schema sent to the model, then deserialised and
/// checked semantically. Every failure is fed back to the model; gateway
/// errors are returned immediately and never retried here.
#[derive(Clone)]
pub struct StructuredOutputValidator {
    retry_limit: u32,
    call_timeout: Duration,
    /// Compiled schemas by schema name.
    schemas: Arc<Mutex<HashMap<&'static str, Arc<Validator>>>>,
}

impl StructuredOutputValidator {
    pub fn new(retry_limit: u32, call_timeout: Duration) -> Self {
        Self {
            retry_limit,
            call_timeout,
            schemas: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The compiled form of `hint.schema`, built on first use.
    fn compiled(&self, hint: &SchemaHint) -> Result<Arc<Validator>> {
        let mut schemas = self
            .schemas
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(validator) = schemas.get(hint.name) {
            return Ok(Arc::clone(validator));
        }

        let validator = jsonschema::validator_for(&hint.schema).map_err(|e| {
            AppError::Internal(format!("Invalid JSON schema for `{}`: {e}", hint.name))
        })?;
        let validator = Arc::new(validator);
        schemas.insert(hint.name, Arc::clone(&validator));
        Ok(validator)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_limit.saturating_add(1)
    }

    pub async fn request<S: OutputSchema>(
        &self,
        model: &dyn ModelGateway,
        prompt: &PromptContext,
    ) -> Result<ValidationOutcome<S>> {
        let hint = S::hint();
        let schema = self.compiled(&hint)?;
        let mut prompt = prompt.clone();
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts() {
            let raw = tokio::time::timeout(self.call_timeout, model.complete(&prompt, &hint))
                .await
                .map_err(|_| {
                    AppError::Timeout(format!(
                        "Model call for `{}` exceeded {}s",
                        hint.name,
                        self.call_timeout.as_secs()
                    ))
                })??;

            match parse::<S>(&raw, &schema) {
                Ok(value) => {
                    tracing::debug!(schema = hint.name, attempt, "Structured output accepted");
                    return Ok(ValidationOutcome::Parsed(value));
                }
                Err(error) => {
                    tracing::warn!(
                        schema = hint.name,
                        attempt,
                        max_attempts = self.max_attempts(),
                        error = %error,
                        "Model output rejected"
                    );
                    prompt.add_correction(&raw, &error);
                    last_error = error;
                }
            }
        }

        Ok(ValidationOutcome::Exhausted {
            last_error,
            attempts: self.max_attempts(),
        })
    }
}

fn parse<S: OutputSchema>(raw: &str, schema: &Validator) -> std::result::Result<S, String> {
    let json = extract_json(raw).ok_or_else(|| "No JSON object found in response".to_string())?;
    let instance: Value =
        serde_json::from_str(json).map_err(|e| format!("Invalid JSON: {e}"))?;

    let violations: Vec<String> = schema
        .iter_errors(&instance)
        .map(|e| e.to_string())
        .collect();
    if !violations.is_empty() {
        return Err(format!(
            "Response does not match the schema: {}",
            violations.join("; ")
        ));
    }

    let value: S =
        serde_json::from_value(instance).map_err(|e| format!("Invalid JSON for schema: {e}"))?;
    value.validate()?;
    Ok(value)
}

/// Locate the JSON object in a model response: the whole text, a fenced
/// block, or the first balanced `{...}`.
pub fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        return Some(fenced);
    }

    balanced_object(trimmed)
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    let inner = body[..close].trim();
    inner.starts_with('{').then_some(inner)
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

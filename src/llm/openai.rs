use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::OpenAiConfig;
use crate::error::{AppError, Result};
use crate::llm::{classify_status, ModelGateway, PromptContext, SchemaHint};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Chat Completions backend. Works against any OpenAI-compatible server.
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;

        let base = config.api_url.as_deref().unwrap_or(OPENAI_API_URL);
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    pub async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("OpenAI API request: {e}"))
                } else {
                    AppError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        Ok(response.json::<ChatResponse>().await?)
    }

    /// Force a single function call whose parameters are the expected
    /// output shape.
    pub fn structured_request(&self, prompt: &PromptContext, schema: &SchemaHint) -> ChatRequest {
        let mut messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: prompt.system().to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: prompt.request().to_string(),
            },
        ];
        for correction in prompt.corrections() {
            messages.push(ChatMessage {
                role: "assistant".to_string(),
                content: correction.echoed_response(),
            });
            messages.push(ChatMessage {
                role: "user".to_string(),
                content: correction.retry_instruction(schema.name),
            });
        }

        ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages,
            tools: vec![json!({
                "type": "function",
                "function": {
                    "name": schema.name,
                    "description": schema.description,
                    "parameters": schema.schema,
                }
            })],
            tool_choice: json!({"type": "function", "function": {"name": schema.name}}),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ModelGateway for OpenAiClient {
    async fn complete(&self, prompt: &PromptContext, schema: &SchemaHint) -> Result<String> {
        let request = self.structured_request(prompt, schema);
        let response = self.send(&request).await?;

        tracing::debug!(
            id = %response.id,
            model = %self.model,
            prompt_tokens = response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens = response.usage.as_ref().map(|u| u.completion_tokens),
            "OpenAI response received"
        );

        response_text(&response, schema.name)
    }
}

/// Arguments of the forced function call, or the message text when the
/// model answered without calling it.
fn response_text(response: &ChatResponse, function: &str) -> Result<String> {
    let message = response
        .choices
        .first()
        .map(|c| &c.message)
        .ok_or_else(|| AppError::ModelApi(format!("Response {} had no choices", response.id)))?;

    if let Some(call) = message
        .tool_calls
        .iter()
        .find(|call| call.function.name == function)
    {
        return Ok(call.function.arguments.clone());
    }

    match message.content.as_deref() {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(AppError::ModelApi(format!(
            "Response {} contained neither a function call nor text",
            response.id
        ))),
    }
}

// --- Request types ---

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<serde_json::Value>,
    pub tool_choice: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

// --- Response types ---

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON text, exactly as the model produced it.
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

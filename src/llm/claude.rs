use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ClaudeConfig;
use crate::error::{AppError, Result};
use crate::llm::{classify_status, ModelGateway, PromptContext, SchemaHint};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeClient {
    pub fn new(config: &ClaudeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| CLAUDE_API_URL.to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    pub async fn send_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("Claude API request: {e}"))
                } else {
                    AppError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body = response.json::<MessagesResponse>().await?;
        Ok(body)
    }

    /// Build a request that forces the model to answer through a single tool
    /// whose input schema is the expected output shape.
    pub fn structured_request(&self, prompt: &PromptContext, schema: &SchemaHint) -> MessagesRequest {
        let mut messages = vec![Message {
            role: "user".to_string(),
            content: MessageContent::Text(prompt.request().to_string()),
        }];

        for correction in prompt.corrections() {
            messages.push(Message {
                role: "assistant".to_string(),
                content: MessageContent::Text(correction.echoed_response()),
            });
            messages.push(Message {
                role: "user".to_string(),
                content: MessageContent::Text(correction.retry_instruction(schema.name)),
            });
        }

        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: prompt.system().to_string(),
            messages,
            tools: vec![ToolDefinition {
                name: schema.name.to_string(),
                description: schema.description.to_string(),
                input_schema: schema.schema.clone(),
            }],
            tool_choice: Some(ToolChoice {
                kind: "tool".to_string(),
                name: schema.name.to_string(),
            }),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ModelGateway for ClaudeClient {
    async fn complete(&self, prompt: &PromptContext, schema: &SchemaHint) -> Result<String> {
        let request = self.structured_request(prompt, schema);
        let response = self.send_message(&request).await?;

        tracing::debug!(
            id = %response.id,
            model = %self.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "Claude response received"
        );

        response_text(&response, schema.name)
    }
}

/// The forced tool call's input as JSON, or the text blocks when the model
/// answered in prose anyway.
fn response_text(response: &MessagesResponse, tool_name: &str) -> Result<String> {
    for block in &response.content {
        if let ContentBlock::ToolUse { name, input, .. } = block {
            if name == tool_name {
                return Ok(serde_json::to_string(input)?);
            }
        }
    }

    let text = response
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        return Err(AppError::ModelApi(format!(
            "Response {} contained neither tool input nor text",
            response.id
        )));
    }
    Ok(text)
}

// --- Request types ---

#[derive(Debug, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolChoice {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

// --- Response types ---

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> ClaudeClient {
        ClaudeClient::new(&ClaudeConfig {
            api_key: "sk-test".to_string(),
            model: "claude-test".to_string(),
            max_tokens: 1024,
            request_timeout_secs: 30,
            api_url: None,
        })
        .unwrap()
    }

    fn hint() -> SchemaHint {
        SchemaHint {
            name: "submit_code",
            description: "Submit file changes",
            schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn test_structured_request_forces_tool() {
        let prompt = PromptContext::new("be precise", "fix issue 7");
        let request = client().structured_request(&prompt, &hint());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["tool_choice"], json!({"type": "tool", "name": "submit_code"}));
        assert_eq!(value["tools"][0]["name"], "submit_code");
        assert_eq!(value["messages"].as_array().unwrap().len(), 1);
        assert_eq!(value["system"], "be precise");
    }

    #[test]
    fn test_corrections_become_turns() {
        let mut prompt = PromptContext::new("sys", "fix issue 7");
        prompt.add_correction("", "no JSON object found");
        let request = client().structured_request(&prompt, &hint());

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].role, "assistant");
        match &request.messages[2].content {
            MessageContent::Text(text) => assert!(text.contains("no JSON object found")),
            MessageContent::Blocks(_) => panic!("expected text"),
        }
    }

    #[test]
    fn test_api_url_override() {
        assert_eq!(client().api_url, CLAUDE_API_URL);
        let proxied = ClaudeClient::new(&ClaudeConfig {
            api_key: "sk-test".to_string(),
            model: "claude-test".to_string(),
            max_tokens: 1024,
            request_timeout_secs: 30,
            api_url: Some("http://localhost:9000/v1/messages".to_string()),
        })
        .unwrap();
        assert_eq!(proxied.api_url, "http://localhost:9000/v1/messages");
    }

    #[test]
    fn test_response_text_prefers_tool_input() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "Here you go"},
                {"type": "tool_use", "id": "tu_1", "name": "submit_code", "input": {"files": []}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();

        assert_eq!(response_text(&response, "submit_code").unwrap(), r#"{"files":[]}"#);
        assert_eq!(response_text(&response, "other_tool").unwrap(), "Here you go");
    }

    #[test]
    fn test_empty_response_is_error() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_2",
            "content": [],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 0}
        }))
        .unwrap();
        assert!(response_text(&response, "submit_code").is_err());
    }
}

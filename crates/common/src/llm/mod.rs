//! Language-model capability
//!
//! A single `generate(prompt) -> text` call. It may be slow and may fail
//! transiently; retry, timeout and cancellation policy belong to the
//! caller.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trait for text generation
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for the prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-compatible chat completions client
pub struct ChatCompletionModel {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

impl ChatCompletionModel {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "llm.api_key is required".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { config, api_key, client })
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self.client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::LanguageModelTimeout {
                        timeout_ms: self.config.timeout_secs * 1000,
                    }
                } else {
                    AppError::LanguageModel {
                        message: format!("LLM API request failed: {}", e),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LanguageModel {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| AppError::LanguageModel {
            message: format!("Failed to parse LLM response: {}", e),
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::LanguageModel {
                message: "Empty response from LLM".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let result = ChatCompletionModel::new(LlmConfig::default());
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage { role: "user", content: "hi" }],
            max_tokens: 10,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 10);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Revenue was $10B [1]."}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, "Revenue was $10B [1].");
    }
}

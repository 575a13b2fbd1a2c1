use crate::config::LlmConfig;
use crate::error::CapabilityError;
use crate::text_generator::TextGenerator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SYSTEM_PROMPT: &str =
    "You are a document assistant. When asked for JSON, respond with a single JSON object only.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Chat Completions API レスポンス
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI Chat Completions API バックエンド
pub struct OpenAiChatBackend {
    config: LlmConfig,
    client: reqwest::Client,
}

impl OpenAiChatBackend {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Chat API HTTPクライアント作成失敗")?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn map_request_error(&self, err: reqwest::Error) -> CapabilityError {
        if err.is_timeout() {
            CapabilityError::Timeout(self.config.timeout_seconds)
        } else {
            err.into()
        }
    }
}

/// 最初の choice のメッセージ本文を取り出す
fn first_choice_content(body: &str) -> Result<String, CapabilityError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| CapabilityError::InvalidResponse(format!("Chat API レスポンスパース失敗: {}", e)))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| CapabilityError::InvalidResponse("応答に本文がありません".to_string()))
}

#[async_trait]
impl TextGenerator for OpenAiChatBackend {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CapabilityError> {
        if self.config.api_key.is_empty() {
            return Err(CapabilityError::NotConfigured("llm.api_key"));
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
            max_tokens,
        };

        log::debug!(
            "Chat API: モデル {}, プロンプト {}文字, max_tokens {}",
            self.config.model,
            prompt.chars().count(),
            max_tokens
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CapabilityError::RequestFailed(format!(
                "Chat API エラー: {} - {}",
                status, error_text
            )));
        }

        let body = response.text().await.map_err(|e| self.map_request_error(e))?;
        first_choice_content(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_choice_content() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "{\"title\": \"x\"}"}}]}"#;
        assert_eq!(first_choice_content(body).unwrap(), r#"{"title": "x"}"#);
    }

    #[test]
    fn test_first_choice_content_missing() {
        assert!(matches!(
            first_choice_content(r#"{"choices": []}"#),
            Err(CapabilityError::InvalidResponse(_))
        ));
        assert!(matches!(
            first_choice_content(r#"{"choices": [{"message": {"content": null}}]}"#),
            Err(CapabilityError::InvalidResponse(_))
        ));
        assert!(matches!(
            first_choice_content("<html>"),
            Err(CapabilityError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest {
            model: "gpt-3.5-turbo",
            messages: vec![ChatMessage {
                role: "user",
                content: "hello",
            }],
            temperature: 0.3,
            max_tokens: 1000,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 1000);
    }

    #[tokio::test]
    async fn test_generate_without_api_key_is_not_configured() {
        let backend = OpenAiChatBackend::new(LlmConfig::default()).unwrap();
        let result = backend.generate("hello", 0.3, 100).await;
        assert!(matches!(result, Err(CapabilityError::NotConfigured(_))));
    }
}

//! LLM-backed generator over an OpenAI-compatible chat completions API

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::generator::Generator;
use crate::config::GeneratorConfig;
use crate::error::GenerationError;

const CROSSOVER_SYSTEM_PROMPT: &str = "You merge two prompt templates into one. \
Keep every placeholder in double braces intact. Combine the strongest instructions \
of both. Reply with the new template only, no commentary.";

const MUTATION_SYSTEM_PROMPT: &str = "You rewrite a prompt template to explore a \
variation. Keep every placeholder in double braces intact and keep the intent. \
Change wording, ordering or emphasis. Reply with the new template only, no commentary.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }

    fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }
}

/// Generator that delegates crossover and mutation to a chat model
#[derive(Clone)]
pub struct LlmGenerator {
    client: Arc<Client>,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
}

impl LlmGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: Option<u32>,
    ) -> Result<Self, GenerationError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerationError::NotConfigured("API key is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_tokens,
        })
    }

    /// Build from config; the key comes from the configured environment variable
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            GenerationError::NotConfigured(format!("environment variable {} is not set", config.api_key_env))
        })?;
        Self::new(config.base_url.clone(), api_key, config.model.clone(), config.max_tokens)
    }

    async fn complete(&self, system: &str, user: String, temperature: f32) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            max_tokens: self.max_tokens,
            temperature: Some(temperature),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Provider { status, body });
        }

        let raw: serde_json::Value = response.json().await?;
        let content = extract_content(&raw);
        debug!("{} returned {} chars", self.model, content.len());

        let content = content.trim();
        if content.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(content.to_string())
    }
}

/// Pull the first choice's text, accepting plain-string and content-part arrays
fn extract_content(raw: &serde_json::Value) -> String {
    let content = raw
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"));

    match content {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(parts)) => parts
            .iter()
            .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn crossover(&self, first: &str, second: &str) -> Result<String, GenerationError> {
        let prompt = format!(
            "Template A:\n<<<\n{}\n>>>\n\nTemplate B:\n<<<\n{}\n>>>",
            first, second
        );
        self.complete(CROSSOVER_SYSTEM_PROMPT, prompt, 0.7).await
    }

    async fn mutate(&self, content: &str) -> Result<String, GenerationError> {
        let prompt = format!("Template:\n<<<\n{}\n>>>", content);
        self.complete(MUTATION_SYSTEM_PROMPT, prompt, 1.0).await
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

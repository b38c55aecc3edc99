use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::llm::{Message, ModelConfig, StructuredModel};
use crate::schema::ResponseSchema;

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    format: &'a serde_json::Value, // JSON schema for structured output
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client: config.http_client()?,
        })
    }
}

#[async_trait]
impl StructuredModel for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        schema: &ResponseSchema,
    ) -> Result<String, ModelError> {
        let url = format!("{}/api/chat", self.base_url);

        let request = OllamaRequest {
            model: &self.model,
            messages,
            stream: false,
            format: schema.as_value(),
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status, body });
        }

        let ollama_response: OllamaResponse = response.json().await?;

        Ok(ollama_response.message.content)
    }
}

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ModelError;
use crate::llm::{Message, ModelConfig, StructuredModel};
use crate::schema::ResponseSchema;

/// OpenAI-compatible chat completions client using `json_schema` response formats
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    refusal: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ModelError::Config("openai_api_key is not set".to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            client: config.http_client()?,
        })
    }
}

#[async_trait]
impl StructuredModel for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        schema: &ResponseSchema,
    ) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = json!({
            "model": self.model,
            "messages": messages,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name(),
                    "schema": schema.as_value(),
                },
            },
        });

        debug!(model = %self.model, messages = messages.len(), "Sending chat completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status: status.as_u16(), body });
        }

        let chat: ChatResponse = response.json().await?;

        let message = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ModelError::MalformedResponse("no choices returned".to_string()))?;

        if let Some(refusal) = message.refusal {
            return Err(ModelError::MalformedResponse(format!("model refused: {}", refusal)));
        }

        message
            .content
            .ok_or_else(|| ModelError::MalformedResponse("empty message content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ResponseFormat;
    use mockito::Matcher;

    fn schema() -> ResponseSchema {
        ResponseSchema::of::<ResponseFormat<String>>("names").unwrap()
    }

    #[tokio::test]
    async fn test_complete_returns_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "response_format": {"type": "json_schema", "json_schema": {"name": "names"}},
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"data\":[\"Aspirin\"]}"}}]}"#)
            .create_async()
            .await;

        let mut config = ModelConfig::openai("gpt-4o-mini", "sk-test");
        config.base_url = server.url();
        let client = OpenAiClient::new(&config).unwrap();

        let content = client
            .complete(&[Message::system("extract"), Message::user("Aspirin")], &schema())
            .await
            .unwrap();

        assert_eq!(content, r#"{"data":["Aspirin"]}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_surfaces_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("invalid api key")
            .create_async()
            .await;

        let mut config = ModelConfig::openai("gpt-4o-mini", "sk-wrong");
        config.base_url = server.url();
        let client = OpenAiClient::new(&config).unwrap();

        let err = client
            .complete(&[Message::user("Aspirin")], &schema())
            .await
            .unwrap_err();

        assert!(matches!(err, ModelError::Status { status: 401, .. }));
    }
}

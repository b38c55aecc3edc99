use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ModelError;
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;
use crate::schema::ResponseSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A model that answers a conversation with JSON constrained by a schema.
///
/// Implementations return the raw text of the answer; validating it against
/// the schema is the caller's job.
#[async_trait]
pub trait StructuredModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[Message],
        schema: &ResponseSchema,
    ) -> Result<String, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Ollama => "http://localhost:11434",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "ollama" => Ok(Provider::Ollama),
            other => Err(ModelError::Config(format!("unknown model provider '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: Option<u64>,
}

impl ModelConfig {
    pub fn openai(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider: Provider::OpenAi,
            model: model.into(),
            api_key: Some(api_key.into()),
            base_url: Provider::OpenAi.default_base_url().to_string(),
            timeout_secs: None,
        }
    }

    pub fn ollama(model: impl Into<String>) -> Self {
        Self {
            provider: Provider::Ollama,
            model: model.into(),
            api_key: None,
            base_url: Provider::Ollama.default_base_url().to_string(),
            timeout_secs: None,
        }
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, ModelError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder.build().map_err(ModelError::Client)
    }
}

/// Build the model client selected by `config.provider`
pub fn build_model(config: &ModelConfig) -> Result<Arc<dyn StructuredModel>, ModelError> {
    if config.model.trim().is_empty() {
        return Err(ModelError::Config(format!(
            "{}_model is not set",
            config.provider
        )));
    }

    match config.provider {
        Provider::OpenAi => Ok(Arc::new(OpenAiClient::new(config)?)),
        Provider::Ollama => Ok(Arc::new(OllamaClient::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!(" ollama ".parse::<Provider>().unwrap(), Provider::Ollama);
        assert!("anthropic".parse::<Provider>().is_err());
    }

    #[test]
    fn test_build_model_requires_model_name() {
        let config = ModelConfig::ollama("");
        assert!(matches!(build_model(&config), Err(ModelError::Config(_))));

        let model = build_model(&ModelConfig::ollama("llama3")).unwrap();
        assert_eq!(model.model_name(), "llama3");
    }

    #[test]
    fn test_openai_requires_api_key() {
        let mut config = ModelConfig::openai("gpt-4o-mini", "");
        config.api_key = None;
        assert!(build_model(&config).is_err());
    }
}

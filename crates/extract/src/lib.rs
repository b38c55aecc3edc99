pub mod error;
pub mod llm;
pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod structured;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ExtractionError, ModelError};
pub use llm::{build_model, Message, ModelConfig, Provider, Role, StructuredModel};
pub use retry::RetryPolicy;
pub use schema::{ResponseFormat, ResponseSchema};
pub use structured::StructuredCall;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Turns a letter into a list of schema-validated items for one task
pub struct Extractor<E> {
    system_prompt: String,
    call: StructuredCall<ResponseFormat<E>>,
}

impl<E> Extractor<E>
where
    E: DeserializeOwned + JsonSchema,
{
    pub fn new(
        model: Arc<dyn StructuredModel>,
        task_name: &str,
        task_prompt: &str,
        retry: RetryPolicy,
    ) -> Result<Self, ExtractionError> {
        Ok(Self {
            system_prompt: prompt::build_system_prompt(task_prompt),
            call: StructuredCall::new(model, task_name, retry)?,
        })
    }

    pub fn schema(&self) -> &ResponseSchema {
        self.call.schema()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Extract every item the letter mentions
    pub async fn extract(&self, letter: &str) -> Result<Vec<E>, ExtractionError> {
        let response = self.call.invoke(&self.system_prompt, letter).await?;
        Ok(response.data)
    }
}

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ExtractionError;
use crate::llm::{Message, StructuredModel};
use crate::prompt;
use crate::retry::RetryPolicy;
use crate::schema::ResponseSchema;

/// One schema-constrained model call with bounded re-prompting on invalid output
pub struct StructuredCall<T> {
    model: Arc<dyn StructuredModel>,
    schema: ResponseSchema,
    retry: RetryPolicy,
    _response: PhantomData<fn() -> T>,
}

impl<T> Clone for StructuredCall<T> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            schema: self.schema.clone(),
            retry: self.retry,
            _response: PhantomData,
        }
    }
}

impl<T> StructuredCall<T>
where
    T: DeserializeOwned + JsonSchema,
{
    pub fn new(
        model: Arc<dyn StructuredModel>,
        name: &str,
        retry: RetryPolicy,
    ) -> Result<Self, ExtractionError> {
        Ok(Self {
            model,
            schema: ResponseSchema::of::<T>(name)?,
            retry,
            _response: PhantomData,
        })
    }

    pub fn schema(&self) -> &ResponseSchema {
        &self.schema
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn invoke(&self, system_prompt: &str, user_prompt: &str) -> Result<T, ExtractionError> {
        let mut messages = vec![Message::system(system_prompt), Message::user(user_prompt)];
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(schema = self.schema.name(), attempt, "Invoking model");

            let raw = self.model.complete(&messages, &self.schema).await?;

            let reason = match self.schema.parse::<T>(&raw) {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            schema = self.schema.name(),
                            attempts = attempt,
                            "Model output validated after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(reason) => reason,
            };

            if attempt > self.retry.max_retries() {
                warn!(
                    schema = self.schema.name(),
                    attempts = attempt,
                    error = %reason,
                    "Model output failed validation after max retries"
                );
                return Err(ExtractionError::Invalid { attempts: attempt, reason });
            }

            let backoff = self.retry.backoff(attempt);
            warn!(
                schema = self.schema.name(),
                attempt,
                max_retries = self.retry.max_retries(),
                backoff_ms = backoff.as_millis(),
                error = %reason,
                "Model output failed validation, re-prompting"
            );

            tokio::time::sleep(backoff).await;

            messages.push(Message::assistant(raw));
            messages.push(Message::user(prompt::build_retry_prompt(&reason)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::llm::Role;
    use crate::testing::ScriptedModel;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Selection {
        code: String,
    }

    #[tokio::test]
    async fn test_valid_first_answer_makes_one_call() {
        let model = Arc::new(ScriptedModel::new([r#"{"code": "1A00"}"#]));
        let call =
            StructuredCall::<Selection>::new(model.clone(), "selection", RetryPolicy::immediate(2))
                .unwrap();

        let selected = call.invoke("pick one", "candidates").await.unwrap();

        assert_eq!(selected, Selection { code: "1A00".to_string() });
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_answer_is_reprompted_with_errors() {
        let model = Arc::new(ScriptedModel::new(["not json", r#"{"code": "BA00.0"}"#]));
        let call =
            StructuredCall::<Selection>::new(model.clone(), "selection", RetryPolicy::immediate(2))
                .unwrap();

        let selected = call.invoke("pick one", "candidates").await.unwrap();

        assert_eq!(selected.code, "BA00.0");
        assert_eq!(model.calls(), 2);

        let second = model.conversation(1);
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].role, Role::Assistant);
        assert_eq!(second[2].content, "not json");
        assert!(second[3].content.contains("response is not valid JSON"));
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_budget() {
        let model = Arc::new(ScriptedModel::new([r#"{"id": 1}"#, r#"{"id": 2}"#, r#"{"id": 3}"#]));
        let call =
            StructuredCall::<Selection>::new(model.clone(), "selection", RetryPolicy::immediate(2))
                .unwrap();

        let err = call.invoke("pick one", "candidates").await.unwrap_err();

        assert!(matches!(err, ExtractionError::Invalid { attempts: 3, .. }));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_errors_are_not_retried() {
        let model = Arc::new(ScriptedModel::from_results(vec![Err(ModelError::Status {
            status: 503,
            body: "overloaded".to_string(),
        })]));
        let call =
            StructuredCall::<Selection>::new(model.clone(), "selection", RetryPolicy::immediate(2))
                .unwrap();

        let err = call.invoke("pick one", "candidates").await.unwrap_err();

        assert!(matches!(err, ExtractionError::Model(ModelError::Status { status: 503, .. })));
        assert_eq!(model.calls(), 1);
    }
}

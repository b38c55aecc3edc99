//! In-memory model for tests: replays canned answers in order.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::ModelError;
use crate::llm::{Message, StructuredModel};
use crate::schema::ResponseSchema;

pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
    conversations: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn from_results(responses: Vec<Result<String, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            conversations: Mutex::new(Vec::new()),
        }
    }

    /// Number of completions requested so far
    pub fn calls(&self) -> usize {
        self.conversations.lock().unwrap().len()
    }

    /// Messages sent with the `index`-th completion
    pub fn conversation(&self, index: usize) -> Vec<Message> {
        self.conversations.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl StructuredModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _schema: &ResponseSchema,
    ) -> Result<String, ModelError> {
        self.conversations.lock().unwrap().push(messages.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::MalformedResponse("script exhausted".to_string())))
    }
}

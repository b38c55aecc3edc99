use regex::Regex;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, LazyLock};

use crate::error::ExtractionError;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("valid fence pattern")
});

/// Envelope every extraction response is wrapped in
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResponseFormat<T> {
    pub data: Vec<T>,
}

/// JSON Schema derived from a Rust type, compiled once for validation
#[derive(Clone)]
pub struct ResponseSchema {
    name: String,
    schema: Value,
    validator: Arc<jsonschema::Validator>,
}

impl std::fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSchema")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl ResponseSchema {
    pub fn of<T: JsonSchema>(name: &str) -> Result<Self, ExtractionError> {
        let generated = schemars::schema_for!(T);
        let mut schema = serde_json::to_value(&generated)
            .map_err(|e| ExtractionError::Schema(e.to_string()))?;

        // Providers reject the meta-schema key; the validator defaults to the same draft
        if let Some(object) = schema.as_object_mut() {
            object.remove("$schema");
        }

        Self::from_value(name, schema)
    }

    pub fn from_value(name: &str, schema: Value) -> Result<Self, ExtractionError> {
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| ExtractionError::Schema(e.to_string()))?;

        Ok(Self {
            name: sanitize_name(name),
            schema,
            validator: Arc::new(validator),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_value(&self) -> &Value {
        &self.schema
    }

    /// Collect every validation error for `instance`
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parse raw model output, validate it, then deserialize into `T`
    pub fn parse<T: DeserializeOwned>(&self, raw: &str) -> Result<T, String> {
        let text = strip_code_fence(raw);

        let value: Value = serde_json::from_str(text)
            .map_err(|e| format!("response is not valid JSON: {}", e))?;

        self.validate(&value).map_err(|errors| errors.join("; "))?;

        serde_json::from_value(value).map_err(|e| format!("response does not match schema: {}", e))
    }
}

fn strip_code_fence(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

// Provider schema names allow only [a-zA-Z0-9_-]
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "response".to_string()
    } else {
        cleaned
    }
}

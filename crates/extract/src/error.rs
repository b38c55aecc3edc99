use thiserror::Error;

/// Failures talking to a model provider
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Model request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected model response: {0}")]
    MalformedResponse(String),

    #[error("Model configuration error: {0}")]
    Config(String),
}

/// Failures producing a schema-valid payload
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Model output failed validation after {attempts} attempt(s): {reason}")]
    Invalid { attempts: usize, reason: String },

    #[error("Invalid response schema: {0}")]
    Schema(String),
}

impl ExtractionError {
    /// True when the model answered but never produced a valid payload
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

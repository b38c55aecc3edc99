use thiserror::Error;

/// Failures talking to an external terminology or code service
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Lookup request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Lookup service returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Failed to decode lookup response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl LookupError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

use extract::ExtractionError;
use std::io;
use std::path::PathBuf;
use terminology::LookupError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode rows for {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("Code selection failed: {0}")]
    Selection(#[from] ExtractionError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Processing node '{node}' failed: {source}")]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl PipelineError {
    /// Storage failures leave the output in an unknown state and stop the batch
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Unknown workflow '{name}'. Available workflows: {available}")]
    UnknownWorkflow { name: String, available: String },

    #[error("Workflow '{0}' requires a statement")]
    MissingStatement(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Failed to set up lookup client: {0}")]
    Lookup(#[from] LookupError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown model provider '{0}'")]
    UnknownProvider(String),

    #[error("Missing required setting '{0}'")]
    Missing(String),

    #[error("Invalid value '{value}' for setting '{key}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

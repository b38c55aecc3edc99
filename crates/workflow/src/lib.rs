pub mod config;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod storage;
pub mod tasks;

pub use config::{AppConfig, RetryConfig, Settings, TerminologyConfig};
pub use error::{BuildError, ConfigError, NodeError, PipelineError, StorageError};
pub use node::{LookupPolicy, NoProcessing, ProcessingNode};
pub use pipeline::{Pipeline, RunSummary, TaskDescriptor, Workflow, WorkflowSuite};
pub use registry::{WorkflowContext, WorkflowRegistry};
pub use state::WorkflowState;
pub use storage::{CsvSink, StorageConfig};

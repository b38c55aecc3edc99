use async_trait::async_trait;
use extract::{ExtractionError, Extractor, RetryPolicy, StructuredModel};
use ingest::Document;
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::node::{NoProcessing, ProcessingNode};
use crate::state::WorkflowState;
use crate::storage::CsvSink;

/// Task definition: name, prompt and the processing nodes in run order.
///
/// The response schema is derived from `E`. Without explicit nodes the
/// pipeline runs [`NoProcessing`].
pub struct TaskDescriptor<E, P> {
    name: String,
    prompt: String,
    nodes: Vec<Box<dyn ProcessingNode<E, P>>>,
}

impl<E, P> TaskDescriptor<E, P>
where
    E: DeserializeOwned + JsonSchema + Clone + Send + Sync + 'static,
    P: Serialize + From<E> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            nodes: Vec::new(),
        }
    }

    pub fn node(mut self, node: impl ProcessingNode<E, P> + 'static) -> Self {
        self.nodes.push(Box::new(node));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compile(
        self,
        model: Arc<dyn StructuredModel>,
        sink: Arc<CsvSink>,
        retry: RetryPolicy,
    ) -> Result<Pipeline<E, P>, ExtractionError> {
        let extractor = Extractor::new(model, &self.name, &self.prompt, retry)?;

        let mut nodes = self.nodes;
        if nodes.is_empty() {
            nodes.push(Box::new(NoProcessing));
        }

        debug!(
            task = %self.name,
            nodes = nodes.len(),
            "Compiled pipeline"
        );

        Ok(Pipeline {
            name: self.name,
            extractor,
            nodes,
            sink,
        })
    }
}

/// Compiled `extraction -> processing nodes -> storage` chain, reusable across documents
pub struct Pipeline<E, P> {
    name: String,
    extractor: Extractor<E>,
    nodes: Vec<Box<dyn ProcessingNode<E, P>>>,
    sink: Arc<CsvSink>,
}

impl<E, P> Pipeline<E, P>
where
    E: DeserializeOwned + JsonSchema + Send + Sync,
    P: Serialize + Send + Sync,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    pub fn extractor(&self) -> &Extractor<E> {
        &self.extractor
    }

    pub async fn run(&self, document: &Document) -> Result<WorkflowState<E, P>, PipelineError> {
        let mut state = WorkflowState::new(document);
        info!(task = %self.name, patient_id = %state.patient_id(), "Running pipeline");

        let extracted = self.extractor.extract(state.letter()).await.inspect_err(|e| {
            warn!(task = %self.name, patient_id = %document.patient_id(), error = %e, "Extraction failed");
        })?;
        debug!(task = %self.name, items = extracted.len(), "Extraction finished");
        state.set_extracted(extracted);

        for node in &self.nodes {
            debug!(task = %self.name, node = node.name(), "Running node");
            node.process(&mut state)
                .await
                .map_err(|source| PipelineError::Node {
                    node: node.name().to_string(),
                    source,
                })?;
        }

        let processed = state.processed().unwrap_or_default();
        let path = self.sink.append(&self.name, state.patient_id(), processed).await?;
        state.set_path(path);

        Ok(state)
    }
}

/// Outcome of one workflow run over one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub workflow: String,
    pub patient_id: String,
    pub extracted: usize,
    pub stored: usize,
    pub paths: Vec<PathBuf>,
}

/// Type-erased workflow as built by the registry
#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, document: &Document) -> Result<RunSummary, PipelineError>;
}

#[async_trait]
impl<E, P> Workflow for Pipeline<E, P>
where
    E: DeserializeOwned + JsonSchema + Send + Sync,
    P: Serialize + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, document: &Document) -> Result<RunSummary, PipelineError> {
        let state = Pipeline::run(self, document).await?;

        Ok(RunSummary {
            workflow: self.name.clone(),
            patient_id: state.patient_id().to_string(),
            extracted: state.extracted().map_or(0, |items| items.len()),
            stored: state.processed().map_or(0, |items| items.len()),
            paths: state.path().map(|p| p.to_path_buf()).into_iter().collect(),
        })
    }
}

/// Runs several workflows over the same document, one after another
pub struct WorkflowSuite {
    name: String,
    workflows: Vec<Box<dyn Workflow>>,
}

impl WorkflowSuite {
    pub fn new(name: impl Into<String>, workflows: Vec<Box<dyn Workflow>>) -> Self {
        Self {
            name: name.into(),
            workflows,
        }
    }

    pub fn members(&self) -> Vec<&str> {
        self.workflows.iter().map(|w| w.name()).collect()
    }
}

#[async_trait]
impl Workflow for WorkflowSuite {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, document: &Document) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary {
            workflow: self.name.clone(),
            patient_id: document.patient_id().to_string(),
            extracted: 0,
            stored: 0,
            paths: Vec::new(),
        };

        for workflow in &self.workflows {
            let result = workflow.run(document).await?;
            summary.extracted += result.extracted;
            summary.stored += result.stored;
            summary.paths.extend(result.paths);
        }

        Ok(summary)
    }
}

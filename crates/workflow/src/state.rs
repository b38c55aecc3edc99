use ingest::Document;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Per-document record threaded through extraction, processing and storage.
///
/// The patient id, letter and extracted payload are fixed once set; nodes
/// can only write the processed payload.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState<E, P> {
    patient_id: String,
    letter: String,
    extracted: Option<Vec<E>>,
    processed: Option<Vec<P>>,
    path: Option<PathBuf>,
}

impl<E, P> WorkflowState<E, P> {
    pub fn new(document: &Document) -> Self {
        Self {
            patient_id: document.patient_id().to_string(),
            letter: document.text().to_string(),
            extracted: None,
            processed: None,
            path: None,
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn letter(&self) -> &str {
        &self.letter
    }

    pub fn extracted(&self) -> Option<&[E]> {
        self.extracted.as_deref()
    }

    pub fn processed(&self) -> Option<&[P]> {
        self.processed.as_deref()
    }

    /// Output file, set once storage has run
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_processed(&mut self, items: Vec<P>) {
        self.processed = Some(items);
    }

    pub(crate) fn set_extracted(&mut self, items: Vec<E>) {
        self.extracted = Some(items);
    }

    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = Some(path);
    }
}

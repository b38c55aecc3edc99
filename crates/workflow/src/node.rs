use async_trait::async_trait;
use extract::ExtractionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use terminology::LookupError;
use tracing::warn;

use crate::error::NodeError;
use crate::state::WorkflowState;

/// A processing stage between extraction and storage
#[async_trait]
pub trait ProcessingNode<E, P>: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, state: &mut WorkflowState<E, P>) -> Result<(), NodeError>;
}

/// Converts every extracted item into the processed type unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProcessing;

#[async_trait]
impl<E, P> ProcessingNode<E, P> for NoProcessing
where
    E: Clone + Send + Sync,
    P: From<E> + Send + Sync,
{
    fn name(&self) -> &str {
        "no_processing"
    }

    async fn process(&self, state: &mut WorkflowState<E, P>) -> Result<(), NodeError> {
        let items = state
            .extracted()
            .unwrap_or_default()
            .iter()
            .cloned()
            .map(P::from)
            .collect();
        state.set_processed(items);
        Ok(())
    }
}

/// What an enrichment node does when an external lookup fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupPolicy {
    /// Keep the item with empty codes and log a warning
    #[default]
    Degrade,
    /// Fail the document
    Propagate,
}

impl LookupPolicy {
    pub fn resolve<T: Default>(
        &self,
        node: &str,
        subject: &str,
        result: Result<T, LookupError>,
    ) -> Result<T, NodeError> {
        match (result, self) {
            (Ok(value), _) => Ok(value),
            (Err(e), LookupPolicy::Degrade) => {
                warn!(
                    node = node,
                    subject = subject,
                    error = %e,
                    "Lookup failed, keeping item without codes"
                );
                Ok(T::default())
            }
            (Err(e), LookupPolicy::Propagate) => Err(NodeError::Lookup(e)),
        }
    }

    /// Invalid model answers always fall back; transport errors follow the policy
    pub fn on_selection_error(
        &self,
        node: &str,
        subject: &str,
        error: ExtractionError,
    ) -> Result<(), NodeError> {
        if error.is_validation_failure() || *self == LookupPolicy::Degrade {
            warn!(
                node = node,
                subject = subject,
                error = %error,
                "Code selection failed, using best ranked candidate"
            );
            return Ok(());
        }
        Err(NodeError::Selection(error))
    }
}

impl fmt::Display for LookupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupPolicy::Degrade => f.write_str("degrade"),
            LookupPolicy::Propagate => f.write_str("propagate"),
        }
    }
}

impl FromStr for LookupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "degrade" => Ok(LookupPolicy::Degrade),
            "propagate" => Ok(LookupPolicy::Propagate),
            other => Err(format!("expected 'degrade' or 'propagate', got '{}'", other)),
        }
    }
}

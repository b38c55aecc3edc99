use async_trait::async_trait;
use extract::{RetryPolicy, StructuredCall, StructuredModel};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use terminology::{ConceptMatch, ConceptSearch, LookupError};
use tracing::{debug, warn};

use crate::error::{BuildError, NodeError};
use crate::node::{LookupPolicy, ProcessingNode};
use crate::state::WorkflowState;

pub const NAME: &str = "procedure_extraction_workflow";

pub const PROMPT: &str = "\
Given a doctor's letter containing none or multiple procedures, extract all procedures and their relevant information.

Values to extract:
- reference: The procedure as it appears in the text.
- name: The name of the procedure.
- name_translated: The name of the procedure translated to English.
- search_term: A search term that can be used to find the procedure in SNOMED CT.
- abbreviations: Abbreviations used for the procedure in the text (e.g. cCT, TAVI). Return an empty list if there are none.
- year: The year the procedure was performed. If no year is given, return -1.
- month: The month the procedure was performed. If no month is given, return -1.
- day: The day the procedure was performed. If no day is given, return -1.
";

const SELECTION_SYSTEM_PROMPT: &str = "You are a medical coding assistant.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedProcedure {
    pub reference: String,
    pub name: String,
    pub name_translated: String,
    pub search_term: String,
    pub abbreviations: Vec<String>,
    pub year: i32,
    pub month: i32,
    pub day: i32,
}

impl ExtractedProcedure {
    /// Search term, or the translated name when the model left it blank
    pub fn lookup_term(&self) -> &str {
        if self.search_term.trim().is_empty() {
            self.name_translated.trim()
        } else {
            self.search_term.trim()
        }
    }
}

/// Procedure with its SNOMED CT concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    #[serde(flatten)]
    pub procedure: ExtractedProcedure,
    pub snomed_id: String,
    pub snomed_fsn: String,
}

impl From<ExtractedProcedure> for Procedure {
    fn from(procedure: ExtractedProcedure) -> Self {
        Self {
            procedure,
            snomed_id: String::new(),
            snomed_fsn: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SnomedSelection {
    pub selected_concept_id: String,
}

fn selection_prompt(procedure: &ExtractedProcedure, candidates: &[ConceptMatch]) -> String {
    let listing: Vec<String> = candidates
        .iter()
        .map(|c| format!("- Concept ID: {}, FSN: {}", c.id, c.term))
        .collect();

    format!(
        "You are a medical coding expert. Given a procedure description and a list of SNOMED CT matches, \
select the most appropriate SNOMED CT code.

Procedure Information:
- Original reference: {}
- Procedure name: {}
- Translated name: {}
- Search term: {}

Available SNOMED CT Matches:
{}

Select the most appropriate SNOMED CT code that best matches the procedure. Consider:
1. Specificity: Prefer more specific codes over general ones
2. Accuracy: The code should accurately represent the procedure
3. Clinical relevance: The code should be clinically meaningful

If none of the matches are appropriate, select the first concept ID.",
        procedure.reference,
        procedure.name,
        procedure.name_translated,
        procedure.lookup_term(),
        listing.join("\n")
    )
}

/// Adds SNOMED CT concepts found through the Snowstorm concept search
pub struct SnomedProcedureLookup {
    search: Option<ConceptSearch>,
    synonyms: BTreeMap<String, String>,
    selector: StructuredCall<SnomedSelection>,
    policy: LookupPolicy,
}

impl SnomedProcedureLookup {
    pub fn new(
        search: Option<ConceptSearch>,
        synonyms: BTreeMap<String, String>,
        model: Arc<dyn StructuredModel>,
        retry: RetryPolicy,
        policy: LookupPolicy,
    ) -> Result<Self, BuildError> {
        Ok(Self {
            search,
            synonyms,
            selector: StructuredCall::new(model, "snomed_selection", retry)?,
            policy,
        })
    }

    async fn candidates(
        &self,
        search: &ConceptSearch,
        procedure: &ExtractedProcedure,
    ) -> Result<Vec<ConceptMatch>, LookupError> {
        let term = procedure.lookup_term();
        let found = search
            .search(term, &self.synonyms, &procedure.abbreviations)
            .await?;
        if !found.is_empty() {
            return Ok(found);
        }

        debug!(term = %term, "No exact SNOMED CT match, relaxing query");
        search.search_relaxed(term).await
    }

    async fn choose(
        &self,
        procedure: &ExtractedProcedure,
        candidates: Vec<ConceptMatch>,
    ) -> Result<Option<ConceptMatch>, NodeError> {
        if candidates.len() <= 1 {
            return Ok(candidates.into_iter().next());
        }

        let prompt = selection_prompt(procedure, &candidates);
        match self.selector.invoke(SELECTION_SYSTEM_PROMPT, &prompt).await {
            Ok(selection) => {
                let selected = selection.selected_concept_id.trim();
                if let Some(found) = candidates.iter().find(|c| c.id == selected) {
                    return Ok(Some(found.clone()));
                }
                warn!(
                    procedure = %procedure.name,
                    selected = selected,
                    "Model selected a concept outside the candidates, using best ranked"
                );
            }
            Err(e) => self.policy.on_selection_error(self.name(), &procedure.name, e)?,
        }

        Ok(candidates.into_iter().next())
    }
}

#[async_trait]
impl ProcessingNode<ExtractedProcedure, Procedure> for SnomedProcedureLookup {
    fn name(&self) -> &str {
        "snomed_procedure_lookup"
    }

    async fn process(
        &self,
        state: &mut WorkflowState<ExtractedProcedure, Procedure>,
    ) -> Result<(), NodeError> {
        let mut procedures = Vec::new();

        for extracted in state.extracted().unwrap_or_default() {
            let mut procedure = Procedure::from(extracted.clone());

            if let Some(search) = &self.search {
                let result = self.candidates(search, extracted).await;
                let candidates = self.policy.resolve(self.name(), &extracted.name, result)?;

                if let Some(chosen) = self.choose(extracted, candidates).await? {
                    procedure.snomed_id = chosen.id;
                    procedure.snomed_fsn = chosen.term;
                }
            }

            procedures.push(procedure);
        }

        state.set_processed(procedures);
        Ok(())
    }
}

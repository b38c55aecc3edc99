use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const NAME: &str = "boolean_statement_workflow";

pub const PROMPT: &str = "\
Given medical information about a patient in the form of a doctor's letter, label the patient according to the following statement.

Values to extract:
- filter: A boolean value indicating whether the statement is true (filter=true) or false (filter=false).
- information: The extracted information from the document that supports the filter decision.
- reference: The exact text snippet from the document that was used to make the decision.
";

/// Whether a free-text criterion holds for the patient, with its evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedStatement {
    pub filter: bool,
    pub information: String,
    pub reference: String,
}

/// Task prompt with the statement under evaluation appended
pub fn prompt_for(statement: &str) -> String {
    format!("{}\n\nStatement: {}\n", PROMPT, statement.trim())
}

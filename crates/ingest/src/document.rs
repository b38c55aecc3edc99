use serde::{Deserialize, Serialize};

/// A doctor's letter keyed by the patient it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    patient_id: String,
    text: String,
}

impl Document {
    pub fn new(patient_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            text: text.into(),
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

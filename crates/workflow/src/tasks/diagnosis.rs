use async_trait::async_trait;
use extract::{RetryPolicy, StructuredCall, StructuredModel};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use terminology::{IcdCandidate, IcdClient};
use tracing::{debug, warn};

use crate::error::{BuildError, NodeError};
use crate::node::{LookupPolicy, ProcessingNode};
use crate::state::WorkflowState;

pub const NAME: &str = "diagnosis_extraction_workflow";

pub const PROMPT: &str = "\
Given a doctor's letter containing none or multiple diagnoses, extract all diagnoses and their relevant information.

Values to extract:
- reference: The diagnosis as it appears in the text.
- name: The name of the diagnosis.
- name_translated: The name of the diagnosis translated to English.
- year: The year the diagnosis was made. If no year is given, return -1.
- month: The month the diagnosis was made. If no month is given, return -1.
- day: The day the diagnosis was made. If no day is given, return -1.
";

const SELECTION_SYSTEM_PROMPT: &str = "You are a medical coding assistant.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedDiagnosis {
    pub reference: String,
    pub name: String,
    pub name_translated: String,
    /// -1 when unknown, likewise for month and day
    pub year: i32,
    pub month: i32,
    pub day: i32,
}

/// Diagnosis with its ICD-11 MMS code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    #[serde(flatten)]
    pub diagnosis: ExtractedDiagnosis,
    pub icd11_code: String,
    pub icd11_title: String,
}

impl From<ExtractedDiagnosis> for Diagnosis {
    fn from(diagnosis: ExtractedDiagnosis) -> Self {
        Self {
            diagnosis,
            icd11_code: String::new(),
            icd11_title: String::new(),
        }
    }
}

/// Model answer when several ICD-11 candidates match
#[derive(Debug, Deserialize, JsonSchema)]
pub struct IcdSelection {
    /// ICD-11 code of the best match, e.g. "1A00" or "BA00.0"
    pub code: String,
}

fn selection_prompt(diagnosis: &ExtractedDiagnosis, candidates: &[IcdCandidate]) -> String {
    let listing: Vec<String> = candidates
        .iter()
        .map(|c| format!("- Code: {}, Title: {}, Score: {:.2}", c.code, c.title, c.score))
        .collect();

    format!(
        "You are a medical coding expert. Given a diagnosis description and a list of ICD-11 matches, \
select the most appropriate ICD-11 code.

Diagnosis Information:
- Original reference: {}
- Diagnosis name: {}
- Translated name: {}

Available ICD-11 Matches (sorted by relevance score):
{}

Select the most appropriate ICD-11 code that best matches the diagnosis. Consider:
1. Specificity: Prefer more specific codes over general ones
2. Accuracy: The code should accurately represent the diagnosis
3. Clinical relevance: The code should be clinically meaningful
4. Search score: Higher scores indicate better matches, but use your medical expertise

Return the ICD-11 code (e.g. \"1A00\" or \"BA00.0\") of the best match.",
        diagnosis.reference,
        diagnosis.name,
        diagnosis.name_translated,
        listing.join("\n")
    )
}

/// Adds ICD-11 codes via the WHO API, asking the model to choose between close matches
pub struct IcdDiagnosisLookup {
    client: Option<IcdClient>,
    selector: StructuredCall<IcdSelection>,
    policy: LookupPolicy,
}

impl IcdDiagnosisLookup {
    pub fn new(
        client: Option<IcdClient>,
        model: Arc<dyn StructuredModel>,
        retry: RetryPolicy,
        policy: LookupPolicy,
    ) -> Result<Self, BuildError> {
        Ok(Self {
            client,
            selector: StructuredCall::new(model, "icd_selection", retry)?,
            policy,
        })
    }

    async fn choose(
        &self,
        diagnosis: &ExtractedDiagnosis,
        candidates: Vec<IcdCandidate>,
    ) -> Result<Option<IcdCandidate>, NodeError> {
        if candidates.is_empty() {
            return Ok(None);
        }

        if let Some(exact) = candidates.iter().find(|c| c.score >= 1.0) {
            debug!(diagnosis = %diagnosis.name, code = %exact.code, "Exact ICD-11 match");
            return Ok(Some(exact.clone()));
        }

        let prompt = selection_prompt(diagnosis, &candidates);
        match self.selector.invoke(SELECTION_SYSTEM_PROMPT, &prompt).await {
            Ok(selection) => {
                let selected = selection.code.trim();
                if let Some(found) = candidates.iter().find(|c| c.code == selected) {
                    return Ok(Some(found.clone()));
                }
                warn!(
                    diagnosis = %diagnosis.name,
                    selected = selected,
                    "Model selected a code outside the candidates, using best ranked"
                );
            }
            Err(e) => self.policy.on_selection_error(self.name(), &diagnosis.name, e)?,
        }

        Ok(candidates.into_iter().next())
    }
}

#[async_trait]
impl ProcessingNode<ExtractedDiagnosis, Diagnosis> for IcdDiagnosisLookup {
    fn name(&self) -> &str {
        "icd_diagnosis_lookup"
    }

    async fn process(
        &self,
        state: &mut WorkflowState<ExtractedDiagnosis, Diagnosis>,
    ) -> Result<(), NodeError> {
        let mut diagnoses = Vec::new();

        for extracted in state.extracted().unwrap_or_default() {
            let mut diagnosis = Diagnosis::from(extracted.clone());

            if let Some(client) = &self.client {
                let result = client.search(&extracted.name_translated).await;
                let candidates = self.policy.resolve(self.name(), &extracted.name, result)?;

                if let Some(chosen) = self.choose(extracted, candidates).await? {
                    diagnosis.icd11_code = chosen.code;
                    diagnosis.icd11_title = chosen.title;
                }
            }

            diagnoses.push(diagnosis);
        }

        state.set_processed(diagnoses);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::testing::ScriptedModel;
    use ingest::Document;
    use mockito::Matcher;
    use serde_json::json;
    use terminology::IcdConfig;

    fn diabetes() -> ExtractedDiagnosis {
        ExtractedDiagnosis {
            reference: "Diabetes mellitus Typ 2 (ED 2015)".to_string(),
            name: "Diabetes mellitus Typ 2".to_string(),
            name_translated: "Type 2 diabetes mellitus".to_string(),
            year: 2015,
            month: -1,
            day: -1,
        }
    }

    fn candidate(code: &str, title: &str, score: f64) -> IcdCandidate {
        IcdCandidate {
            code: code.to_string(),
            title: title.to_string(),
            score,
        }
    }

    fn node(model: Arc<ScriptedModel>, client: Option<IcdClient>) -> IcdDiagnosisLookup {
        IcdDiagnosisLookup::new(client, model, RetryPolicy::immediate(1), LookupPolicy::Degrade).unwrap()
    }

    #[tokio::test]
    async fn test_exact_score_skips_model() {
        let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let lookup = node(model.clone(), None);

        let chosen = lookup
            .choose(
                &diabetes(),
                vec![
                    candidate("5A14", "Diabetes mellitus, type unspecified", 0.8),
                    candidate("5A11", "Type 2 diabetes mellitus", 1.0),
                ],
            )
            .await
            .unwrap();

        assert_eq!(chosen.unwrap().code, "5A11");
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_selects_between_candidates() {
        let model = Arc::new(ScriptedModel::new([r#"{"code": "5A11"}"#]));
        let lookup = node(model.clone(), None);

        let chosen = lookup
            .choose(
                &diabetes(),
                vec![
                    candidate("5A14", "Diabetes mellitus, type unspecified", 0.8),
                    candidate("5A11", "Type 2 diabetes mellitus", 0.7),
                ],
            )
            .await
            .unwrap();

        assert_eq!(chosen.unwrap().title, "Type 2 diabetes mellitus");
        let prompt = &model.conversation(0)[1].content;
        assert!(prompt.contains("- Code: 5A14, Title: Diabetes mellitus, type unspecified, Score: 0.80"));
        assert!(prompt.contains("Translated name: Type 2 diabetes mellitus"));
    }

    #[tokio::test]
    async fn test_unknown_selection_falls_back_to_first() {
        let model = Arc::new(ScriptedModel::new([r#"{"code": "XX99"}"#]));
        let lookup = node(model, None);

        let chosen = lookup
            .choose(
                &diabetes(),
                vec![candidate("5A14", "first", 0.8), candidate("5A11", "second", 0.7)],
            )
            .await
            .unwrap();

        assert_eq!(chosen.unwrap().code, "5A14");
    }

    #[tokio::test]
    async fn test_invalid_selection_falls_back_to_first() {
        let model = Arc::new(ScriptedModel::new(["nonsense", "still nonsense"]));
        let lookup = node(model.clone(), None);

        let chosen = lookup
            .choose(
                &diabetes(),
                vec![candidate("5A14", "first", 0.8), candidate("5A11", "second", 0.7)],
            )
            .await
            .unwrap();

        assert_eq!(chosen.unwrap().code, "5A14");
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_without_credentials_codes_stay_empty() {
        let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let lookup = node(model, None);
        let mut state = WorkflowState::new(&Document::new("p1", "letter"));
        state.set_extracted(vec![diabetes()]);

        lookup.process(&mut state).await.unwrap();

        let processed = state.processed().unwrap();
        assert_eq!(processed[0], Diagnosis::from(diabetes()));
    }

    #[tokio::test]
    async fn test_process_codes_diagnoses_from_search() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/connect/token")
            .with_status(200)
            .with_body(json!({"access_token": "tok", "expires_in": 3600}).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/icd/release/11/2022-02/mms/search")
            .match_query(Matcher::UrlEncoded("q".into(), "Type 2 diabetes mellitus".into()))
            .with_status(200)
            .with_body(
                json!({"destinationEntities": [
                    {"theCode": "5A11", "title": "<em class='found'>Type 2 diabetes mellitus</em>", "score": 1.0}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let config = IcdConfig {
            base_url: server.url(),
            token_url: format!("{}/connect/token", server.url()),
            ..IcdConfig::with_credentials("id", "secret")
        };
        let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let lookup = node(model, Some(IcdClient::new(&config).unwrap()));

        let mut state = WorkflowState::new(&Document::new("p1", "letter"));
        state.set_extracted(vec![diabetes()]);
        lookup.process(&mut state).await.unwrap();

        let processed = state.processed().unwrap();
        assert_eq!(processed[0].icd11_code, "5A11");
        assert_eq!(processed[0].icd11_title, "Type 2 diabetes mellitus");
        assert_eq!(processed[0].diagnosis.year, 2015);
    }
}

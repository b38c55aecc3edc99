use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::LookupError;
use crate::http::LookupClient;

pub const RXNAV_BASE_URL: &str = "https://rxnav.nlm.nih.gov/REST";

static QUALIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)").expect("valid qualifier pattern"));

/// Drug name without parenthesised qualifiers, e.g. "ASS (Aspirin) 100" becomes "ASS 100"
pub fn strip_qualifier(name: &str) -> String {
    QUALIFIER.replace_all(name, "").trim().to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdGroupResponse {
    id_group: Option<IdGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdGroup {
    rxnorm_id: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproximateResponse {
    approximate_group: Option<ApproximateGroup>,
}

#[derive(Debug, Deserialize)]
struct ApproximateGroup {
    candidate: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    rxcui: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertiesResponse {
    prop_concept_group: Option<PropConceptGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropConceptGroup {
    prop_concept: Option<Vec<PropConcept>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropConcept {
    prop_name: String,
    prop_value: String,
}

/// RxNorm identifiers and ATC classes from the NLM RxNav REST API
#[derive(Clone)]
pub struct RxNavClient {
    client: LookupClient,
}

impl RxNavClient {
    pub fn new(base_url: &str, timeout_secs: Option<u64>) -> Result<Self, LookupError> {
        Ok(Self {
            client: LookupClient::new(base_url, timeout_secs)?,
        })
    }

    /// Exact name match first, then an approximate match on name and active ingredient
    pub async fn rxcui(
        &self,
        name: &str,
        active_ingredient: &str,
    ) -> Result<Option<String>, LookupError> {
        let name = strip_qualifier(name);
        if !name.is_empty() {
            if let Some(rxcui) = self.exact_rxcui(&name).await? {
                return Ok(Some(rxcui));
            }
        }

        let term = format!("{} {}", name, active_ingredient.trim());
        let term = term.trim();
        if term.is_empty() {
            return Ok(None);
        }

        debug!(term = %term, "No exact RxNorm match, trying approximate search");
        self.approximate_rxcui(term).await
    }

    pub async fn exact_rxcui(&self, name: &str) -> Result<Option<String>, LookupError> {
        let response: IdGroupResponse = self.client.get_json("rxcui.json", &[("name", name)]).await?;

        Ok(response
            .id_group
            .and_then(|group| group.rxnorm_id)
            .and_then(|ids| ids.into_iter().find(|id| !id.is_empty())))
    }

    pub async fn approximate_rxcui(&self, term: &str) -> Result<Option<String>, LookupError> {
        let response: ApproximateResponse = self
            .client
            .get_json("approximateTerm.json", &[("term", term), ("maxEntries", "1")])
            .await?;

        Ok(response
            .approximate_group
            .and_then(|group| group.candidate)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|candidate| candidate.rxcui)
            .find(|rxcui| !rxcui.is_empty()))
    }

    /// ATC codes attached to an RxNorm concept, in response order
    pub async fn atc_codes(&self, rxcui: &str) -> Result<Vec<String>, LookupError> {
        let path = format!("rxcui/{}/allProperties.json", rxcui);
        let response: PropertiesResponse = self.client.get_json(&path, &[("prop", "Codes")]).await?;

        let mut codes: Vec<String> = Vec::new();
        let concepts = response
            .prop_concept_group
            .and_then(|group| group.prop_concept)
            .unwrap_or_default();
        for concept in concepts {
            if concept.prop_name == "ATC" && !codes.contains(&concept.prop_value) {
                codes.push(concept.prop_value);
            }
        }
        Ok(codes)
    }
}

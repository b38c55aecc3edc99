use regex::{NoExpand, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::error::LookupError;
use crate::http::LookupClient;

/// Descendants of the SNOMED CT "Procedure" concept
pub const PROCEDURE_ROOT: &str = "< 71388002 |Procedure|";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowstormConfig {
    pub base_url: String,
    pub branch: String,
    /// Maximum number of ranked candidates returned by a search
    pub limit: usize,
    /// Page size requested for each individual ECL query
    pub page_size: usize,
    pub timeout_secs: Option<u64>,
}

impl SnowstormConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for SnowstormConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            branch: "MAIN".to_string(),
            limit: 10,
            page_size: 50,
            timeout_secs: Some(30),
        }
    }
}

/// Builds Expression Constraint Language queries under a fixed root constraint
#[derive(Debug, Clone)]
pub struct EclQuery {
    root: String,
}

impl EclQuery {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn procedures() -> Self {
        Self::new(PROCEDURE_ROOT)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// `<root> {{ term = "..." }}`
    pub fn term(&self, term: &str) -> String {
        format!("{} {{{{ term = {} }}}}", self.root, quote(term))
    }

    /// Matches concepts with a description containing any of the given terms
    pub fn any_term<S: AsRef<str>>(&self, terms: &[S]) -> String {
        let quoted: Vec<String> = terms.iter().map(|t| quote(t.as_ref())).collect();
        format!("{} {{{{ term = ({}) }}}}", self.root, quoted.join(" "))
    }

    /// Progressively looser queries for a multi-word term.
    ///
    /// Word combinations of size n-1 down to 2 come first, the individual
    /// words last. A term of fewer than two words yields nothing.
    pub fn relaxed(&self, term: &str) -> Vec<String> {
        let words: Vec<&str> = term.split_whitespace().collect();
        if words.len() < 2 {
            return Vec::new();
        }

        let mut queries = Vec::new();
        for size in (2..words.len()).rev() {
            let phrases: Vec<String> = combinations(&words, size)
                .into_iter()
                .map(|combo| combo.join(" "))
                .collect();
            queries.push(self.any_term(&phrases));
        }
        queries.push(self.any_term(&words));

        queries
    }
}

fn quote(term: &str) -> String {
    format!("\"{}\"", term.replace('\\', "\\\\").replace('"', "\\\""))
}

fn combinations<'a>(items: &[&'a str], size: usize) -> Vec<Vec<&'a str>> {
    if size == 0 {
        return vec![Vec::new()];
    }
    if items.len() < size {
        return Vec::new();
    }

    let mut result = Vec::new();
    for (i, first) in items.iter().enumerate() {
        for mut rest in combinations(&items[i + 1..], size - 1) {
            rest.insert(0, *first);
            result.push(rest);
        }
    }
    result
}

/// Candidate concept returned by a search, ranked from 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMatch {
    pub id: String,
    /// Fully specified name
    pub term: String,
    pub preferred_term: Option<String>,
    pub rank: usize,
}

#[derive(Debug, Deserialize)]
struct ConceptPage {
    #[serde(default)]
    items: Option<Vec<ConceptItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConceptItem {
    concept_id: String,
    fsn: Option<TermEntry>,
    pt: Option<TermEntry>,
}

#[derive(Debug, Deserialize)]
struct TermEntry {
    term: String,
}

impl From<ConceptItem> for ConceptMatch {
    fn from(item: ConceptItem) -> Self {
        let preferred_term = item.pt.map(|pt| pt.term);
        let term = item
            .fsn
            .map(|fsn| fsn.term)
            .or_else(|| preferred_term.clone())
            .unwrap_or_default();

        Self {
            id: item.concept_id,
            term,
            preferred_term,
            rank: 0,
        }
    }
}

/// SNOMED CT concept search against a Snowstorm terminology server
pub struct ConceptSearch {
    client: LookupClient,
    branch: String,
    query: EclQuery,
    limit: usize,
    page_size: usize,
}

impl ConceptSearch {
    pub fn new(config: &SnowstormConfig, query: EclQuery) -> Result<Self, LookupError> {
        let client = LookupClient::new(&config.base_url, config.timeout_secs)?
            .with_param("activeFilter", "true")
            .with_param("termActive", "true")
            .with_header("Accept-Language", "en");

        Ok(Self {
            client,
            branch: config.branch.trim_matches('/').to_string(),
            query,
            limit: config.limit,
            page_size: config.page_size,
        })
    }

    pub fn query(&self) -> &EclQuery {
        &self.query
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Search terms tried for one extracted term, in order, without duplicates.
    ///
    /// The original term comes first, then the term with each synonym
    /// substitution applied (case-insensitive), then each abbreviation.
    pub fn query_variants(
        term: &str,
        synonyms: &BTreeMap<String, String>,
        abbreviations: &[String],
    ) -> Vec<String> {
        let mut candidates = vec![term.trim().to_string()];

        for (phrase, synonym) in synonyms {
            if phrase.trim().is_empty() {
                continue;
            }
            let Ok(pattern) = RegexBuilder::new(&regex::escape(phrase))
                .case_insensitive(true)
                .build()
            else {
                continue;
            };
            if pattern.is_match(term) {
                let substituted = pattern.replace_all(term, NoExpand(synonym.as_str()));
                candidates.push(substituted.trim().to_string());
            }
        }

        candidates.extend(abbreviations.iter().map(|a| a.trim().to_string()));

        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|c| !c.is_empty())
            .filter(|c| seen.insert(c.clone()))
            .collect()
    }

    /// Query every variant of `term` and return the merged, ranked candidates
    pub async fn search(
        &self,
        term: &str,
        synonyms: &BTreeMap<String, String>,
        abbreviations: &[String],
    ) -> Result<Vec<ConceptMatch>, LookupError> {
        let variants = Self::query_variants(term, synonyms, abbreviations);
        if variants.is_empty() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for variant in &variants {
            let ecl = self.query.term(variant);
            let concepts = self.fetch(&ecl).await?;
            debug!(variant = %variant, hits = concepts.len(), "Snowstorm variant searched");
            found.extend(concepts);
        }

        let ranked = rank(found, self.limit);
        info!(
            term = %term,
            variants = variants.len(),
            candidates = ranked.len(),
            "Snowstorm search completed"
        );

        Ok(ranked)
    }

    /// Run the relaxed queries for `term` until one returns candidates
    pub async fn search_relaxed(&self, term: &str) -> Result<Vec<ConceptMatch>, LookupError> {
        for ecl in self.query.relaxed(term) {
            let concepts = self.fetch(&ecl).await?;
            if !concepts.is_empty() {
                debug!(ecl = %ecl, hits = concepts.len(), "Relaxed query matched");
                return Ok(rank(concepts, self.limit));
            }
        }
        Ok(Vec::new())
    }

    async fn fetch(&self, ecl: &str) -> Result<Vec<ConceptMatch>, LookupError> {
        let path = format!("{}/concepts", self.branch);
        let page_size = self.page_size.to_string();

        let page: ConceptPage = self
            .client
            .get_json(&path, &[("ecl", ecl), ("limit", page_size.as_str())])
            .await?;

        Ok(page
            .items
            .unwrap_or_default()
            .into_iter()
            .map(ConceptMatch::from)
            .collect())
    }
}

/// Deduplicate by concept id (first occurrence wins), order by ascending
/// name length, keep at most `limit` and assign ranks from 1.
pub fn rank(concepts: Vec<ConceptMatch>, limit: usize) -> Vec<ConceptMatch> {
    let mut seen = HashSet::new();
    let mut unique: Vec<ConceptMatch> = concepts
        .into_iter()
        .filter(|c| seen.insert(c.id.clone()))
        .collect();

    unique.sort_by_key(|c| c.term.chars().count());
    unique.truncate(limit);

    for (i, concept) in unique.iter_mut().enumerate() {
        concept.rank = i + 1;
    }
    unique
}

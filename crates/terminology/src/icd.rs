use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::LookupError;
use crate::http::LookupClient;

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid markup pattern"));

/// Candidates at or below this score are discarded
pub const MIN_SCORE: f64 = 0.3;

/// Tokens are refreshed this long before the server-side expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcdConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub base_url: String,
    pub token_url: String,
    pub release: String,
    pub language: String,
    pub timeout_secs: Option<u64>,
}

impl IcdConfig {
    pub fn with_credentials(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            ..Self::default()
        }
    }

    /// Both client id and secret are present and non-empty
    pub fn has_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.client_id) && present(&self.client_secret)
    }
}

impl Default for IcdConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            base_url: "https://id.who.int".to_string(),
            token_url: "https://icdaccessmanagement.who.int/connect/token".to_string(),
            release: "2022-02".to_string(),
            language: "en".to_string(),
            timeout_secs: Some(30),
        }
    }
}

/// ICD-11 MMS search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcdCandidate {
    pub code: String,
    pub title: String,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    destination_entities: Option<Vec<DestinationEntity>>,
    #[serde(default)]
    error: bool,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DestinationEntity {
    the_code: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    score: f64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// WHO ICD-11 API client using OAuth2 client credentials
pub struct IcdClient {
    client: LookupClient,
    auth: reqwest::Client,
    config: IcdConfig,
    token: Mutex<Option<CachedToken>>,
}

impl IcdClient {
    pub fn new(config: &IcdConfig) -> Result<Self, LookupError> {
        if !config.has_credentials() {
            return Err(LookupError::Auth(
                "ICD client id and secret are required".to_string(),
            ));
        }

        let client = LookupClient::new(&config.base_url, config.timeout_secs)?
            .with_header("Accept-Language", &config.language)
            .with_header("API-Version", "v2");

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client,
            auth: builder.build().map_err(LookupError::Client)?,
            config: config.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, LookupError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let client_id = self.config.client_id.as_deref().unwrap_or_default();
        let client_secret = self.config.client_secret.as_deref().unwrap_or_default();
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", "icdapi_access"),
        ];

        let response = self
            .auth
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|source| LookupError::Request {
                url: self.config.token_url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Auth(format!(
                "token endpoint returned status {}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|source| LookupError::Decode {
            url: self.config.token_url.clone(),
            source,
        })?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        debug!(expires_in_secs = lifetime.as_secs(), "Obtained ICD access token");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        });

        Ok(token.access_token)
    }

    /// Flexible search over the MMS linearization, keeping candidates above [`MIN_SCORE`]
    pub async fn search(&self, query: &str) -> Result<Vec<IcdCandidate>, LookupError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let token = self.access_token().await?;
        let path = format!("icd/release/11/{}/mms/search", self.config.release);

        let response: SearchResponse = self
            .client
            .get_json_authorized(
                &path,
                &[("q", query.trim()), ("useFlexisearch", "true"), ("flatResults", "true")],
                Some(&token),
            )
            .await?;

        if response.error {
            debug!(
                query = %query,
                message = response.error_message.as_deref().unwrap_or(""),
                "ICD search reported an error"
            );
            return Ok(Vec::new());
        }

        let candidates: Vec<IcdCandidate> = response
            .destination_entities
            .unwrap_or_default()
            .into_iter()
            .filter(|entity| entity.score > MIN_SCORE)
            .filter_map(|entity| {
                let code = entity.the_code.filter(|c| !c.is_empty())?;
                Some(IcdCandidate {
                    code,
                    title: strip_markup(&entity.title),
                    score: entity.score,
                })
            })
            .collect();

        info!(query = %query, candidates = candidates.len(), "ICD search completed");
        Ok(candidates)
    }
}

/// Removes highlight tags such as `<em class='found'>` from search titles
pub fn strip_markup(title: &str) -> String {
    MARKUP.replace_all(title, "").trim().to_string()
}

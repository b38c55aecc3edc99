use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::error::LookupError;

/// JSON-over-HTTP client with per-service default query parameters and headers
#[derive(Clone)]
pub struct LookupClient {
    base_url: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl LookupClient {
    pub fn new(base_url: &str, timeout_secs: Option<u64>) -> Result<Self, LookupError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            params: Vec::new(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            client: builder.build().map_err(LookupError::Client)?,
        })
    }

    /// Query parameter sent with every request
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, LookupError> {
        self.get_json_authorized(path, params, None).await
    }

    pub async fn get_json_authorized<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> Result<T, LookupError> {
        let url = self.url(path);

        let mut request = self.client.get(&url).query(&self.params).query(params);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        debug!(url = %url, "Lookup request");

        let response = request.send().await.map_err(|source| LookupError::Request {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status { status: status.as_u16(), url });
        }

        response
            .json()
            .await
            .map_err(|source| LookupError::Decode { url, source })
    }
}

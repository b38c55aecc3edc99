use extract::{ModelConfig, Provider, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use terminology::{IcdConfig, RXNAV_BASE_URL, SnowstormConfig};

use crate::error::ConfigError;
use crate::node::LookupPolicy;
use crate::storage::StorageConfig;

/// Environment variables with this prefix become settings, e.g. `MEDMINER_BASE_DIR` -> `base_dir`
pub const ENV_PREFIX: &str = "MEDMINER_";

const DEFAULT_OLLAMA_MODEL: &str = "llama3";

/// Raw key -> value settings, built once at startup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut settings = Self::new();
        for (key, value) in vars {
            if let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) {
                settings.set(name, value);
            }
        }
        settings
    }

    /// Parse a TOML settings file. Nested tables become `table_key`, arrays are joined with `;`.
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let table: toml::Table = content.parse().map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut settings = Self::new();
        flatten_toml(&mut settings, "", &table);
        Ok(settings)
    }

    /// Settings file (when given) overridden by `MEDMINER_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&content, path)?
            }
            None => Self::new(),
        };

        settings.merge(Self::from_env());
        Ok(settings)
    }

    /// Values from `other` win
    pub fn merge(&mut self, other: Settings) {
        self.values.extend(other.values);
    }

    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.values.insert(key.as_ref().to_lowercase(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Trimmed value, `None` when unset or blank
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn get<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get_str(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Accepts true/false, yes/no, on/off and 1/0
    pub fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.get_str(key) else {
            return Ok(default);
        };
        match raw.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: raw.to_string(),
                reason: "expected a boolean".to_string(),
            }),
        }
    }

    fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get_str(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }
}

fn flatten_toml(settings: &mut Settings, prefix: &str, table: &toml::Table) {
    for (key, value) in table {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}_{}", prefix, key)
        };

        match value {
            toml::Value::Table(nested) => flatten_toml(settings, &name, nested),
            other => settings.set(&name, toml_scalar(other)),
        }
    }
}

fn toml_scalar(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items.iter().map(toml_scalar).collect::<Vec<_>>().join(";"),
        other => other.to_string(),
    }
}

/// `Cranial=Head;MRI=Magnetic resonance imaging`
pub fn parse_synonyms(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut synonyms = BTreeMap::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((phrase, synonym)) = entry.split_once('=') else {
            return Err(ConfigError::Invalid {
                key: "snowstorm_synonyms".to_string(),
                value: entry.to_string(),
                reason: "expected 'phrase=synonym'".to_string(),
            });
        };
        synonyms.insert(phrase.trim().to_string(), synonym.trim().to_string());
    }
    Ok(synonyms)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_backoff_ms, self.max_backoff_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminologyConfig {
    /// SNOMED CT coding is skipped without a Snowstorm server
    pub snowstorm: Option<SnowstormConfig>,
    pub synonyms: BTreeMap<String, String>,
    /// Medication coding is skipped when unset
    pub rxnav_base_url: Option<String>,
    pub icd: IcdConfig,
    pub lookup_policy: LookupPolicy,
    pub timeout_secs: Option<u64>,
}

impl Default for TerminologyConfig {
    fn default() -> Self {
        Self {
            snowstorm: None,
            synonyms: BTreeMap::new(),
            rxnav_base_url: Some(RXNAV_BASE_URL.to_string()),
            icd: IcdConfig::default(),
            lookup_policy: LookupPolicy::Degrade,
            timeout_secs: Some(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub storage: StorageConfig,
    pub terminology: TerminologyConfig,
    pub retry: RetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::ollama(DEFAULT_OLLAMA_MODEL),
            storage: StorageConfig::default(),
            terminology: TerminologyConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            model: model_config(settings)?,
            storage: StorageConfig {
                base_dir: settings
                    .get_str("base_dir")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.base_dir),
                split_patient: settings.flag("split_patient", defaults.storage.split_patient)?,
            },
            terminology: terminology_config(settings, defaults.terminology)?,
            retry: RetryConfig {
                max_retries: settings.get("extraction_max_retries", defaults.retry.max_retries)?,
                initial_backoff_ms: settings
                    .get("extraction_initial_backoff_ms", defaults.retry.initial_backoff_ms)?,
                max_backoff_ms: settings
                    .get("extraction_max_backoff_ms", defaults.retry.max_backoff_ms)?,
            },
        })
    }
}

fn model_config(settings: &Settings) -> Result<ModelConfig, ConfigError> {
    let provider_name = settings.get_str("model_provider").unwrap_or("ollama");
    let provider: Provider = provider_name
        .parse()
        .map_err(|_| ConfigError::UnknownProvider(provider_name.to_string()))?;

    let prefix = provider.as_str();
    let model_key = format!("{}_model", prefix);
    let api_key_key = format!("{}_api_key", prefix);

    let mut config = match provider {
        Provider::OpenAi => ModelConfig::openai(
            settings.require(&model_key)?,
            settings.require(&api_key_key)?,
        ),
        Provider::Ollama => {
            let mut config =
                ModelConfig::ollama(settings.get_str(&model_key).unwrap_or(DEFAULT_OLLAMA_MODEL));
            config.api_key = settings.get_str(&api_key_key).map(str::to_string);
            config
        }
    };

    if let Some(base_url) = settings.get_str(&format!("{}_base_url", prefix)) {
        config.base_url = base_url.to_string();
    }
    config.timeout_secs = settings.get("model_timeout_secs", 0u64).map(|t| (t > 0).then_some(t))?;

    Ok(config)
}

fn terminology_config(
    settings: &Settings,
    defaults: TerminologyConfig,
) -> Result<TerminologyConfig, ConfigError> {
    let timeout_secs = match settings.get("terminology_timeout_secs", 0u64)? {
        0 => defaults.timeout_secs,
        secs => Some(secs),
    };

    let snowstorm = match settings.get_str("snowstorm_base_url") {
        None => None,
        Some(base_url) => {
            let base = SnowstormConfig::default();
            Some(SnowstormConfig {
                base_url: base_url.to_string(),
                branch: settings.get_str("snowstorm_branch").unwrap_or(&base.branch).to_string(),
                limit: settings.get("terminology_limit", base.limit)?,
                page_size: settings.get("snowstorm_page_size", base.page_size)?,
                timeout_secs,
            })
        }
    };

    let synonyms = match settings.get_str("snowstorm_synonyms") {
        Some(raw) => parse_synonyms(raw)?,
        None => defaults.synonyms,
    };

    let rxnav_base_url = match settings.get_str("rxnav_base_url") {
        Some(url) if url.eq_ignore_ascii_case("none") => None,
        Some(url) => Some(url.to_string()),
        None => defaults.rxnav_base_url,
    };

    let icd = IcdConfig {
        client_id: settings.get_str("icd_client_id").map(str::to_string),
        client_secret: settings.get_str("icd_client_secret").map(str::to_string),
        release: settings
            .get_str("icd_release")
            .map(str::to_string)
            .unwrap_or(defaults.icd.release.clone()),
        timeout_secs,
        ..defaults.icd
    };

    Ok(TerminologyConfig {
        snowstorm,
        synonyms,
        rxnav_base_url,
        icd,
        lookup_policy: settings.get("lookup_policy", defaults.lookup_policy)?,
        timeout_secs,
    })
}

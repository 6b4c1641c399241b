//! Layered configuration for the document analysis service.
//!
//! Sources, highest priority first:
//! 1. Environment variables prefixed `LEITOR_` (`__` separates sections, so
//!    `LEITOR_SERVER__PORT` maps to `server.port`)
//! 2. `leitor.toml` in the working directory (or the path given to [`AppConfig::load_from`])
//! 3. Built-in defaults

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "leitor.toml";
const ENV_PREFIX: &str = "LEITOR_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Figment(#[from] figment::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub csrf: CsrfSettings,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub credits: CreditConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Enables the `Secure` cookie attribute.
    pub production: bool,
    #[serde(deserialize_with = "comma_list")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            production: false,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfSettings {
    pub enabled: bool,
    pub cookie_name: String,
    pub header_name: String,
    pub token_ttl_secs: u64,
    #[serde(deserialize_with = "comma_list")]
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie_name: "csrf_token".into(),
            header_name: "x-csrf-token".into(),
            token_ttl_secs: 3600,
            exempt_paths: vec!["/health".into(), "/api/health".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub max_upload_bytes: usize,
    #[serde(deserialize_with = "comma_list")]
    pub allowed_types: Vec<String>,
    pub requests_per_second: u32,
    pub burst: u32,
    pub default_provider: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 20 * 1024 * 1024,
            allowed_types: vec![
                "image/jpeg".into(),
                "image/png".into(),
                "image/gif".into(),
                "image/webp".into(),
                "application/pdf".into(),
            ],
            requests_per_second: 10,
            burst: 20,
            default_provider: "gemini".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditConfig {
    pub monthly_limit: u32,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self { monthly_limit: 500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(deserialize_with = "comma_list")]
    pub gemini_keys: Vec<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    #[serde(deserialize_with = "comma_list")]
    pub openai_keys: Vec<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub key_cooldown_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            gemini_keys: Vec::new(),
            gemini_model: "gemini-1.5-flash".into(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            openai_keys: Vec::new(),
            openai_model: "gpt-4o-mini".into(),
            openai_base_url: "https://api.openai.com/v1".into(),
            key_cooldown_secs: 60,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub history_path: PathBuf,
    pub history_limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            history_path: PathBuf::from("batch-history.json"),
            history_limit: 50,
        }
    }
}

impl AppConfig {
    /// Loads `.env`, then `leitor.toml` (if present), then `LEITOR_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(path: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "batch.concurrency must be at least 1".into(),
            ));
        }
        if self.analysis.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "analysis.max_upload_bytes must be positive".into(),
            ));
        }
        if self.csrf.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "csrf.token_ttl_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Accepts either a list or a comma-separated string, so the same key works in
/// TOML arrays and in single environment variables.
fn comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        Single(String),
    }

    let items = match ListOrString::deserialize(deserializer)? {
        ListOrString::List(items) => items,
        ListOrString::Single(raw) => raw.split(',').map(str::to_string).collect(),
    };

    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

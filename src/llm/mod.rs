use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ProvidersConfig;

pub mod gemini;
pub mod key_pool;
pub mod openai;

pub use gemini::GeminiClient;
pub use key_pool::KeyPool;
pub use openai::OpenAiClient;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider '{0}' is not configured")]
    UnknownProvider(String),
    #[error("no API key available for provider '{0}'")]
    NoAvailableKey(String),
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider returned an empty response")]
    EmptyResponse,
}

/// One uploaded document as sent to a vision model.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct AnalysisPrompt {
    pub analysis_type: String,
}

impl AnalysisPrompt {
    pub fn new(analysis_type: impl Into<String>) -> Self {
        Self {
            analysis_type: analysis_type.into(),
        }
    }

    pub fn text(&self) -> String {
        let fields = match self.analysis_type.as_str() {
            "nota_fiscal" | "invoice" => {
                "numero, data, emitente, cnpj_emitente, destinatario, valor_total, impostos"
            }
            "boleto" => "beneficiario, pagador, vencimento, valor, linha_digitavel",
            _ => "data, fornecedor, cnpj, descricao, valor_total, forma_pagamento",
        };

        format!(
            "Analise o documento ({kind}) e extraia os campos: {fields}. \
             Responda somente com um objeto JSON. Use \"ND\" para campos não encontrados \
             e descreva em \"observacoes\" qualquer problema de legibilidade ou incerteza.",
            kind = self.analysis_type
        )
    }
}

#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn analyze(
        &self,
        document: &DocumentInput,
        prompt: &AnalysisPrompt,
    ) -> Result<Value, ProviderError>;
}

/// Parses model output as JSON when possible, otherwise keeps the raw text.
pub fn parse_model_output(raw: &str) -> Value {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    serde_json::from_str(unfenced).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

pub(crate) fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to create HTTP client with timeout: {}, using default", e);
            reqwest::Client::new()
        })
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn VisionProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.provider_ids())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut registry = Self::new();
        let cooldown = Duration::from_secs(config.key_cooldown_secs);
        let timeout = Duration::from_secs(config.request_timeout_secs);

        if !config.gemini_keys.is_empty() {
            registry.register(Arc::new(GeminiClient::new(
                KeyPool::new(config.gemini_keys.clone(), cooldown),
                config.gemini_model.clone(),
                config.gemini_base_url.clone(),
                timeout,
            )));
        }

        if !config.openai_keys.is_empty() {
            registry.register(Arc::new(OpenAiClient::new(
                KeyPool::new(config.openai_keys.clone(), cooldown),
                config.openai_model.clone(),
                config.openai_base_url.clone(),
                timeout,
            )));
        }

        if registry.providers.is_empty() {
            warn!("No vision provider keys configured; /api/analyze will reject every request");
        } else {
            info!("Vision providers available: {:?}", registry.provider_ids());
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn VisionProvider>) {
        self.providers
            .insert(provider.id().to_ascii_lowercase(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn VisionProvider>, ProviderError> {
        self.providers
            .get(&id.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

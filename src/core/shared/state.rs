use axum::extract::FromRef;
use std::sync::Arc;

use crate::billing::CreditLedger;
use crate::config::AppConfig;
use crate::llm::ProviderRegistry;
use crate::security::csrf::{CsrfConfig, CsrfManager};
use crate::security::file_validation::FileValidationConfig;
use crate::security::rate_limiter::{AnalysisRateLimiter, HttpRateLimitConfig};

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub csrf: Arc<CsrfManager>,
    pub providers: ProviderRegistry,
    pub credits: Arc<CreditLedger>,
    pub upload_validation: FileValidationConfig,
    pub analysis_limiter: AnalysisRateLimiter,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let providers = ProviderRegistry::from_config(&config.providers);
        Self::with_providers(config, providers)
    }

    /// Builds state around an explicit provider set (tests register fakes here).
    pub fn with_providers(config: AppConfig, providers: ProviderRegistry) -> Self {
        let csrf = Arc::new(CsrfManager::new(CsrfConfig::from_settings(
            &config.csrf,
            config.server.production,
        )));
        let credits = Arc::new(CreditLedger::new(config.credits.monthly_limit));
        let upload_validation = FileValidationConfig::from_analysis(&config.analysis);
        let analysis_limiter =
            AnalysisRateLimiter::new(&HttpRateLimitConfig::from_analysis(&config.analysis));

        Self {
            config: Arc::new(config),
            csrf,
            providers,
            credits,
            upload_validation,
            analysis_limiter,
        }
    }
}

impl FromRef<AppState> for Arc<CsrfManager> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.csrf)
    }
}

impl FromRef<AppState> for Arc<CreditLedger> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.credits)
    }
}

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::billing::CreditError;
use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;
use crate::llm::ProviderError;
use crate::security::csrf::get_csrf_token;
use crate::security::error_sanitizer::{log_and_sanitize, SafeErrorResponse};
use crate::security::rate_limiter::rate_limit_middleware;

pub mod analyze;
pub mod audit;
pub mod naming;
pub mod usage;

/// Room for the multipart boundaries and text fields around the uploaded file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Success envelope used by every JSON endpoint: `{success:true, data}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Arquivo excede o limite de {0} bytes")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Credits(#[from] CreditError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ApiError {
    pub fn into_safe(self, request_id: Option<&str>) -> SafeErrorResponse {
        let response = match self {
            Self::BadRequest(message) => SafeErrorResponse::bad_request(message),
            Self::PayloadTooLarge(max) => SafeErrorResponse::payload_too_large(max),
            Self::Credits(e) => SafeErrorResponse::insufficient_credits(e.to_string()),
            Self::Provider(ProviderError::UnknownProvider(id)) => {
                SafeErrorResponse::bad_request(format!("Provedor de IA desconhecido: {id}"))
                    .with_code("UNKNOWN_PROVIDER")
            }
            Self::Provider(e) => return log_and_sanitize(&e, "Vision provider failed", request_id),
        };

        match request_id {
            Some(rid) => response.with_request_id(rid),
            None => response,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_safe(None).into_response()
    }
}

pub fn configure(state: &AppState) -> Router<AppState> {
    let body_limit = state.config.analysis.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let analyze_routes = Router::new()
        .route(ApiUrls::ANALYZE, post(analyze::analyze_document))
        .layer(DefaultBodyLimit::max(body_limit))
        .route_layer(middleware::from_fn_with_state(
            state.analysis_limiter.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route(ApiUrls::CSRF_TOKEN, get(get_csrf_token))
        .route(ApiUrls::AUDIT, post(audit::audit_analysis))
        .route(ApiUrls::AUDIT_SUMMARY, post(audit::audit_summary))
        .route(ApiUrls::USAGE, get(usage::get_usage))
        .merge(analyze_routes)
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::error;

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"([?&]key=)[^&\s)]+",
        r"(Bearer\s+)\S+",
        r"()sk-[A-Za-z0-9_\-]{8,}",
        r"()AIza[0-9A-Za-z_\-]{20,}",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// JSON error body shared by every endpoint: `{success:false, error, code?}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeErrorResponse {
    #[serde(skip)]
    pub status: StatusCode,
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl SafeErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            error: error.into(),
            code: None,
            request_id: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message).with_code("BAD_REQUEST")
    }

    pub fn payload_too_large(max_size: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Arquivo excede o limite de {max_size} bytes"),
        )
        .with_code("PAYLOAD_TOO_LARGE")
    }

    pub fn insufficient_credits(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYMENT_REQUIRED, message).with_code("INSUFFICIENT_CREDITS")
    }

    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Muitas requisições, tente novamente em instantes",
        )
        .with_code("RATE_LIMITED")
    }

    pub fn provider_failure(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message).with_code("PROVIDER_ERROR")
    }

    pub fn internal_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Erro interno").with_code("INTERNAL_ERROR")
    }
}

impl IntoResponse for SafeErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Removes API keys and bearer tokens that upstream errors tend to echo (URLs, headers).
pub fn sanitize_message(message: &str) -> String {
    let mut result = message.to_string();
    for re in SECRET_PATTERNS.iter() {
        result = re.replace_all(&result, "${1}[REDACTED]").to_string();
    }
    result
}

/// Logs the full error server-side and returns a client-safe body.
pub fn log_and_sanitize<E: std::fmt::Display>(
    error: &E,
    context: &str,
    request_id: Option<&str>,
) -> SafeErrorResponse {
    let message = sanitize_message(&error.to_string());
    error!(request_id = ?request_id, "{context}: {message}");

    let response = SafeErrorResponse::provider_failure(message);
    match request_id {
        Some(rid) => response.with_request_id(rid),
        None => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_query_key() {
        let message = "error sending request for url (https://x.googleapis.com/v1/models/m:generateContent?key=AIzaSyA-secret-value)";
        let sanitized = sanitize_message(message);
        assert!(!sanitized.contains("secret-value"));
        assert!(sanitized.contains("?key=[REDACTED]"));
    }

    #[test]
    fn test_sanitize_bearer_and_openai_keys() {
        let sanitized = sanitize_message("Authorization: Bearer abc.def.ghi failed");
        assert_eq!(sanitized, "Authorization: Bearer [REDACTED] failed");

        let sanitized = sanitize_message("invalid key sk-proj1234567890abcdef");
        assert_eq!(sanitized, "invalid key [REDACTED]");
    }

    #[test]
    fn test_plain_messages_unchanged() {
        assert_eq!(sanitize_message("timeout"), "timeout");
    }

    #[test]
    fn test_error_body_shape() {
        let body = serde_json::to_value(SafeErrorResponse::rate_limited().with_request_id("r1"))
            .expect("serializes");
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "RATE_LIMITED");
        assert_eq!(body["requestId"], "r1");
        assert!(body.get("status").is_none());

        let response = SafeErrorResponse::insufficient_credits("sem créditos").into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }
}

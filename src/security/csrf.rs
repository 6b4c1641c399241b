use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::CsrfSettings;

pub const TOKEN_BYTES: usize = 32;
const TOKEN_HEX_LEN: usize = TOKEN_BYTES * 2;

#[derive(Debug, Clone)]
pub struct CsrfConfig {
    pub enabled: bool,
    pub cookie_name: String,
    pub header_name: String,
    pub token_ttl_secs: u64,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
    pub exempt_paths: Vec<String>,
    pub exempt_methods: Vec<Method>,
    pub issue_on_safe_methods: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie_name: "csrf_token".into(),
            header_name: "x-csrf-token".into(),
            token_ttl_secs: 3600,
            cookie_secure: false,
            cookie_same_site: SameSite::Strict,
            exempt_paths: vec!["/health".into(), "/api/health".into()],
            exempt_methods: vec![Method::GET, Method::HEAD, Method::OPTIONS],
            issue_on_safe_methods: true,
        }
    }
}

impl CsrfConfig {
    pub fn from_settings(settings: &CsrfSettings, production: bool) -> Self {
        Self {
            enabled: settings.enabled,
            cookie_name: settings.cookie_name.clone(),
            header_name: settings.header_name.to_ascii_lowercase(),
            token_ttl_secs: settings.token_ttl_secs,
            cookie_secure: production,
            exempt_paths: settings.exempt_paths.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// Token made available to handlers through request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// `true` when no usable cookie existed and a Set-Cookie must be sent.
    pub fresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CsrfRejection {
    #[error("CSRF token missing")]
    Missing,
    #[error("CSRF token invalid")]
    Invalid,
    #[error("CSRF token validation error")]
    Error,
}

impl CsrfRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing => "CSRF_MISSING",
            Self::Invalid => "CSRF_INVALID",
            Self::Error => "CSRF_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
struct CsrfErrorBody {
    success: bool,
    error: String,
    code: &'static str,
}

impl IntoResponse for CsrfRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::FORBIDDEN,
            Json(CsrfErrorBody {
                success: false,
                error: self.to_string(),
                code: self.code(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Clone)]
pub struct CsrfManager {
    config: CsrfConfig,
}

impl CsrfManager {
    pub fn new(config: CsrfConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// Reuses the cookie token when it is well formed, otherwise mints a new one.
    pub fn issue_token(&self, headers: &HeaderMap) -> IssuedToken {
        match cookie_value(headers, &self.config.cookie_name) {
            Ok(Some(existing)) if is_well_formed(&existing) => IssuedToken {
                token: existing,
                fresh: false,
            },
            _ => IssuedToken {
                token: generate_token(),
                fresh: true,
            },
        }
    }

    pub fn validate(&self, method: &Method, headers: &HeaderMap) -> Result<(), CsrfRejection> {
        if self.is_exempt_method(method) {
            return Ok(());
        }

        let Some(header_raw) = headers.get(self.config.header_name.as_str()) else {
            return Err(CsrfRejection::Missing);
        };
        let cookie_token = cookie_value(headers, &self.config.cookie_name)
            .map_err(|_| CsrfRejection::Error)?;
        let Some(cookie_token) = cookie_token else {
            return Err(CsrfRejection::Missing);
        };
        let header_token = header_raw.to_str().map_err(|_| CsrfRejection::Error)?;

        validate_double_submit(&cookie_token, header_token)
    }

    pub fn build_cookie(&self, token: &str) -> String {
        let secure = if self.config.cookie_secure {
            "; Secure"
        } else {
            ""
        };

        format!(
            "{}={}; Path=/; Max-Age={}; SameSite={}{secure}",
            self.config.cookie_name,
            token,
            self.config.token_ttl_secs,
            self.config.cookie_same_site.as_str(),
        )
    }

    pub fn is_exempt_path(&self, path: &str) -> bool {
        self.config.exempt_paths.iter().any(|p| {
            if p.ends_with('*') {
                let prefix = p.trim_end_matches('*');
                path.starts_with(prefix)
            } else {
                p == path
            }
        })
    }

    pub fn is_exempt_method(&self, method: &Method) -> bool {
        self.config.exempt_methods.iter().any(|m| m == method)
    }

    fn attach_cookie(&self, response: &mut Response, token: &str) {
        match HeaderValue::from_str(&self.build_cookie(token)) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!("Failed to encode CSRF cookie: {e}"),
        }
    }
}

/// Double-submit check: both copies present, same length, constant-time equal.
pub fn validate_double_submit(cookie_token: &str, header_token: &str) -> Result<(), CsrfRejection> {
    if cookie_token.is_empty() || header_token.is_empty() {
        return Err(CsrfRejection::Missing);
    }

    if cookie_token.len() != header_token.len() {
        return Err(CsrfRejection::Invalid);
    }

    if !constant_time_eq(cookie_token.as_bytes(), header_token.as_bytes()) {
        return Err(CsrfRejection::Invalid);
    }

    Ok(())
}

fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; TOKEN_BYTES] = rng.random();
    hex::encode(bytes)
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_HEX_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

pub fn extract_csrf_from_cookie(cookie_header: &str, cookie_name: &str) -> Option<String> {
    for cookie in cookie_header.split(';') {
        let cookie = cookie.trim();
        if let Some((name, value)) = cookie.split_once('=') {
            if name.trim() == cookie_name {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// Looks through every `Cookie` header. Fails only when a header is not readable text.
fn cookie_value(
    headers: &HeaderMap,
    cookie_name: &str,
) -> Result<Option<String>, header::ToStrError> {
    for value in headers.get_all(header::COOKIE) {
        if let Some(token) = extract_csrf_from_cookie(value.to_str()?, cookie_name) {
            if !token.is_empty() {
                return Ok(Some(token));
            }
        }
    }
    Ok(None)
}

pub async fn csrf_middleware(
    State(manager): State<Arc<CsrfManager>>,
    mut request: Request,
    next: Next,
) -> Response {
    let config = manager.config();

    if !config.enabled {
        return next.run(request).await;
    }

    if manager.is_exempt_method(request.method()) {
        if !config.issue_on_safe_methods {
            return next.run(request).await;
        }

        let issued = manager.issue_token(request.headers());
        request.extensions_mut().insert(issued.clone());

        let mut response = next.run(request).await;
        if issued.fresh {
            debug!("Issued new CSRF token");
            manager.attach_cookie(&mut response, &issued.token);
        }
        return response;
    }

    let path = request.uri().path().to_string();
    if manager.is_exempt_path(&path) {
        return next.run(request).await;
    }

    if let Err(rejection) = manager.validate(request.method(), request.headers()) {
        warn!(
            "CSRF validation failed for {} {}: {}",
            request.method(),
            path,
            rejection.code()
        );
        return rejection.into_response();
    }

    next.run(request).await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub success: bool,
    pub csrf_token: String,
}

/// `GET /api/csrf-token`. Reuses the token the middleware attached when present.
pub async fn get_csrf_token(
    State(manager): State<Arc<CsrfManager>>,
    issued: Option<Extension<IssuedToken>>,
    headers: HeaderMap,
) -> Response {
    let (issued, needs_cookie) = match issued {
        Some(Extension(issued)) => (issued, false),
        None => {
            let issued = manager.issue_token(&headers);
            let fresh = issued.fresh;
            (issued, fresh)
        }
    };

    let mut response = Json(CsrfTokenResponse {
        success: true,
        csrf_token: issued.token.clone(),
    })
    .into_response();

    if needs_cookie {
        manager.attach_cookie(&mut response, &issued.token);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_manager() -> CsrfManager {
        CsrfManager::new(CsrfConfig::default())
    }

    fn headers_with(cookie: Option<&str>, token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie {
            headers.insert(
                header::COOKIE,
                HeaderValue::from_str(&format!("session=abc; csrf_token={cookie}"))
                    .expect("valid cookie header"),
            );
        }
        if let Some(token) = token {
            headers.insert(
                "x-csrf-token",
                HeaderValue::from_str(token).expect("valid header"),
            );
        }
        headers
    }

    #[test]
    fn test_generated_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(is_well_formed(&token));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_issue_reuses_existing_cookie() {
        let manager = create_test_manager();
        let existing = generate_token();
        let issued = manager.issue_token(&headers_with(Some(&existing), None));
        assert_eq!(issued.token, existing);
        assert!(!issued.fresh);
    }

    #[test]
    fn test_issue_replaces_malformed_cookie() {
        let manager = create_test_manager();
        let issued = manager.issue_token(&headers_with(Some("not-a-token"), None));
        assert!(issued.fresh);
        assert!(is_well_formed(&issued.token));

        let issued = manager.issue_token(&HeaderMap::new());
        assert!(issued.fresh);
    }

    #[test]
    fn test_safe_methods_bypass_validation() {
        let manager = create_test_manager();
        let empty = HeaderMap::new();
        assert!(manager.validate(&Method::GET, &empty).is_ok());
        assert!(manager.validate(&Method::HEAD, &empty).is_ok());
        assert!(manager.validate(&Method::OPTIONS, &empty).is_ok());
        assert_eq!(
            manager.validate(&Method::POST, &empty),
            Err(CsrfRejection::Missing)
        );
        assert_eq!(
            manager.validate(&Method::DELETE, &empty),
            Err(CsrfRejection::Missing)
        );
    }

    #[test]
    fn test_double_submit_outcomes() {
        let manager = create_test_manager();

        let matching = headers_with(Some("abc123"), Some("abc123"));
        assert!(manager.validate(&Method::POST, &matching).is_ok());

        let mismatched = headers_with(Some("abc123"), Some("abc124"));
        assert_eq!(
            manager.validate(&Method::POST, &mismatched),
            Err(CsrfRejection::Invalid)
        );

        let different_length = headers_with(Some("abc123"), Some("abc1234"));
        assert_eq!(
            manager.validate(&Method::PUT, &different_length),
            Err(CsrfRejection::Invalid)
        );

        let no_header = headers_with(Some("abc123"), None);
        assert_eq!(
            manager.validate(&Method::POST, &no_header),
            Err(CsrfRejection::Missing)
        );

        let no_cookie = headers_with(None, Some("abc123"));
        assert_eq!(
            manager.validate(&Method::POST, &no_cookie),
            Err(CsrfRejection::Missing)
        );
    }

    #[test]
    fn test_unreadable_header_is_csrf_error() {
        let manager = create_test_manager();
        let mut headers = headers_with(Some("abc123"), None);
        headers.insert(
            "x-csrf-token",
            HeaderValue::from_bytes(&[0x61, 0xFF, 0x62]).expect("opaque header"),
        );
        assert_eq!(
            manager.validate(&Method::POST, &headers),
            Err(CsrfRejection::Error)
        );
    }

    #[test]
    fn test_rejection_codes() {
        assert_eq!(CsrfRejection::Missing.code(), "CSRF_MISSING");
        assert_eq!(CsrfRejection::Invalid.code(), "CSRF_INVALID");
        assert_eq!(CsrfRejection::Error.code(), "CSRF_ERROR");
        assert_eq!(
            CsrfRejection::Missing.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_build_cookie() {
        let manager = create_test_manager();
        let cookie = manager.build_cookie("test-token");

        assert!(cookie.contains("csrf_token=test-token"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(!cookie.contains("HttpOnly"));
        assert!(!cookie.contains("Secure"));

        let production = CsrfManager::new(CsrfConfig {
            cookie_secure: true,
            ..CsrfConfig::default()
        });
        assert!(production.build_cookie("t").ends_with("; Secure"));
    }

    #[test]
    fn test_exempt_paths() {
        let manager = CsrfManager::new(CsrfConfig {
            exempt_paths: vec!["/api/health".into(), "/webhooks/*".into()],
            ..CsrfConfig::default()
        });

        assert!(manager.is_exempt_path("/api/health"));
        assert!(manager.is_exempt_path("/webhooks/stripe"));
        assert!(!manager.is_exempt_path("/api/analyze"));
    }

    #[test]
    fn test_extract_csrf_from_cookie() {
        let cookie = "session=abc123; csrf_token=xyz789; other=value";
        assert_eq!(
            extract_csrf_from_cookie(cookie, "csrf_token"),
            Some("xyz789".to_string())
        );
        assert_eq!(extract_csrf_from_cookie(cookie, "nonexistent"), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc123", b"abc123"));
        assert!(!constant_time_eq(b"abc123", b"abc124"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"", b"a"));
    }
}

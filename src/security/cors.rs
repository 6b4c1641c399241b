use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// CORS for the browser client. Credentials are allowed so the CSRF cookie travels,
/// which rules out wildcard origins; with no configured origins only same-origin works.
pub fn create_cors_layer(allowed_origins: &[String], csrf_header: &str) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {origin}");
                None
            }
        })
        .collect();

    if !origins.is_empty() {
        info!("CORS configured with {} allowed origins", origins.len());
    }

    let mut allowed_headers = vec![header::CONTENT_TYPE, header::ACCEPT];
    if let Ok(name) = HeaderName::from_bytes(csrf_header.as_bytes()) {
        allowed_headers.push(name);
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(allowed_headers)
        .expose_headers([HeaderName::from_static("x-request-id")])
        .allow_credentials(true)
}

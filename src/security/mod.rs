pub mod cors;
pub mod csrf;
pub mod error_sanitizer;
pub mod file_validation;
pub mod rate_limiter;
pub mod request_id;

pub use cors::create_cors_layer;
pub use csrf::{csrf_middleware, get_csrf_token, CsrfConfig, CsrfManager, CsrfRejection};
pub use error_sanitizer::{log_and_sanitize, sanitize_message, SafeErrorResponse};
pub use file_validation::{validate_file_upload, FileValidationConfig, FileValidationResult};
pub use rate_limiter::{rate_limit_middleware, AnalysisRateLimiter, HttpRateLimitConfig};
pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};

#[derive(Debug)]
pub struct ApiUrls;

impl ApiUrls {
    pub const HEALTH: &'static str = "/api/health";
    pub const HEALTH_SIMPLE: &'static str = "/health";
    pub const CSRF_TOKEN: &'static str = "/api/csrf-token";
    pub const ANALYZE: &'static str = "/api/analyze";
    pub const AUDIT: &'static str = "/api/audit";
    pub const AUDIT_SUMMARY: &'static str = "/api/audit/summary";
    pub const USAGE: &'static str = "/api/usage";
}

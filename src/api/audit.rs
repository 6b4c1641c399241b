use axum::{extract::rejection::JsonRejection, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiResponse;
use crate::audit::{detect_alerts, AuditSummary};
use crate::security::error_sanitizer::SafeErrorResponse;

#[derive(Debug, Deserialize)]
pub struct AuditRequest {
    #[serde(default)]
    pub analysis: Value,
}

#[derive(Debug, Serialize)]
pub struct AuditData {
    pub alerts: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditSummaryRequest {
    #[serde(default)]
    pub analyses: Vec<Value>,
}

/// `POST /api/audit`: runs the heuristics over a stored AI response.
pub async fn audit_analysis(
    payload: Result<Json<AuditRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AuditData>>, SafeErrorResponse> {
    let Json(request) = payload.map_err(|e| SafeErrorResponse::bad_request(e.body_text()))?;
    let alerts = detect_alerts(&request.analysis);
    Ok(Json(ApiResponse::ok(AuditData { alerts })))
}

/// `POST /api/audit/summary`: alert counts over many responses, for the dashboard.
pub async fn audit_summary(
    payload: Result<Json<AuditSummaryRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AuditSummary>>, SafeErrorResponse> {
    let Json(request) = payload.map_err(|e| SafeErrorResponse::bad_request(e.body_text()))?;
    let summary = AuditSummary::from_results(request.analyses.iter().map(detect_alerts));
    Ok(Json(ApiResponse::ok(summary)))
}

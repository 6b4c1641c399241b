use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::ApiResponse;
use crate::billing::{CreditLedger, UsageSnapshot};
use crate::security::error_sanitizer::SafeErrorResponse;

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub company: Option<String>,
}

/// `GET /api/usage?company=<id>`
pub async fn get_usage(
    State(credits): State<Arc<CreditLedger>>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<ApiResponse<UsageSnapshot>>, SafeErrorResponse> {
    let company = query
        .company
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| SafeErrorResponse::bad_request("Empresa não informada"))?;

    Ok(Json(ApiResponse::ok(credits.snapshot(&company).await)))
}

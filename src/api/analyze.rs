//! `POST /api/analyze`: one uploaded document in, extracted fields and audit alerts out.

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Extension, Json,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::{naming::suggest_file_name, ApiError, ApiResponse};
use crate::audit::detect_alerts;
use crate::core::shared::state::AppState;
use crate::llm::{AnalysisPrompt, DocumentInput};
use crate::security::error_sanitizer::SafeErrorResponse;
use crate::security::file_validation::validate_file_upload;
use crate::security::request_id::RequestId;

pub const DEFAULT_ANALYSIS_TYPE: &str = "recibo";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeData {
    pub analysis: Value,
    pub suggested_name: Option<String>,
    pub alerts: Vec<String>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Default)]
struct AnalyzeForm {
    file_name: String,
    content_type: String,
    bytes: Option<Bytes>,
    analysis_type: Option<String>,
    company: Option<String>,
    provider: Option<String>,
    batch_id: Option<String>,
}

pub async fn analyze_document(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<AnalyzeData>>, SafeErrorResponse> {
    let request_id = request_id.map(|Extension(id)| id.0);

    analyze(&state, multipart)
        .await
        .map(|data| Json(ApiResponse::ok(data)))
        .map_err(|e| e.into_safe(request_id.as_deref()))
}

async fn analyze(state: &AppState, mut multipart: Multipart) -> Result<AnalyzeData, ApiError> {
    let max_upload = state.config.analysis.max_upload_bytes;
    let form = read_form(&mut multipart, max_upload).await?;

    let bytes = form
        .bytes
        .ok_or_else(|| ApiError::BadRequest("Nenhum arquivo enviado no campo 'image'".into()))?;
    let company = form
        .company
        .ok_or_else(|| ApiError::BadRequest("Empresa não informada".into()))?;

    if bytes.len() > max_upload {
        return Err(ApiError::PayloadTooLarge(max_upload));
    }

    let validation = validate_file_upload(
        &form.file_name,
        &form.content_type,
        &bytes,
        &state.upload_validation,
    );
    if !validation.is_valid {
        return Err(ApiError::BadRequest(validation.error_message()));
    }
    for warning in &validation.warnings {
        warn!("Upload {}: {}", form.file_name, warning);
    }

    let provider_id = form
        .provider
        .unwrap_or_else(|| state.config.analysis.default_provider.clone());
    let provider = state.providers.get(&provider_id)?;

    state.credits.try_consume(&company).await?;

    let document = DocumentInput {
        file_name: form.file_name.clone(),
        mime_type: validation
            .detected_type
            .unwrap_or_else(|| form.content_type.clone()),
        bytes,
    };
    let prompt = AnalysisPrompt::new(
        form.analysis_type
            .unwrap_or_else(|| DEFAULT_ANALYSIS_TYPE.to_string()),
    );

    let analysis = match provider.analyze(&document, &prompt).await {
        Ok(analysis) => analysis,
        Err(e) => {
            state.credits.refund(&company).await;
            return Err(e.into());
        }
    };

    let alerts = detect_alerts(&analysis);
    let suggested_name = suggest_file_name(&analysis, &document.file_name);

    info!(
        company = %company,
        provider = %provider.id(),
        batch_id = ?form.batch_id,
        alerts = alerts.len(),
        "Analyzed {}",
        document.file_name
    );

    Ok(AnalyzeData {
        analysis,
        suggested_name,
        alerts,
        batch_id: form.batch_id,
    })
}

async fn read_form(multipart: &mut Multipart, max_upload: usize) -> Result<AnalyzeForm, ApiError> {
    let mut form = AnalyzeForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_upload))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "image" {
            form.file_name = field.file_name().unwrap_or("documento").to_string();
            form.content_type = field.content_type().unwrap_or_default().to_string();
            form.bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, max_upload))?,
            );
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| multipart_error(e, max_upload))?;
        let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());

        match name.as_str() {
            "analysisType" => form.analysis_type = value,
            "company" => form.company = value,
            "provider" => form.provider = value,
            "batchId" => form.batch_id = value,
            _ => {}
        }
    }

    Ok(form)
}

fn multipart_error(error: MultipartError, max_upload: usize) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(max_upload)
    } else {
        ApiError::BadRequest(format!("Formulário inválido: {}", error.body_text()))
    }
}

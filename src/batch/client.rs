//! Client side of the analysis API: the seam the batch analyzer talks through.

use async_trait::async_trait;
use reqwest::{multipart, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::BatchUpload;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("falha de comunicação: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Rejected(String),
    #[error("resposta inválida do servidor: {0}")]
    InvalidBody(String),
}

/// `data` of a successful `POST /api/analyze`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeReply {
    #[serde(default)]
    pub analysis: Value,
    #[serde(default)]
    pub suggested_name: Option<String>,
    #[serde(default)]
    pub alerts: Vec<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditStatus {
    pub monthly_usage: u32,
    pub remaining_credits: u32,
    pub monthly_limit: u32,
}

#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, upload: &BatchUpload) -> Result<AnalyzeReply, ClientError>;

    async fn credit_status(&self, company: &str) -> Result<CreditStatus, ClientError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsrfTokenBody {
    csrf_token: String,
}

/// Talks to a running `leitor-docs` server.
///
/// The CSRF token is fetched once from `/api/csrf-token` and echoed back in both the
/// cookie and the header on every mutating request. A 403 drops the cached token so
/// the next request fetches a fresh one.
#[derive(Debug)]
pub struct HttpAnalysisClient {
    http: reqwest::Client,
    base_url: String,
    cookie_name: String,
    header_name: String,
    csrf_token: Mutex<Option<String>>,
}

impl HttpAnalysisClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to create HTTP client with timeout: {}, using default", e);
                reqwest::Client::new()
            });

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cookie_name: "csrf_token".into(),
            header_name: "x-csrf-token".into(),
            csrf_token: Mutex::new(None),
        }
    }

    pub fn with_csrf_names(
        mut self,
        cookie_name: impl Into<String>,
        header_name: impl Into<String>,
    ) -> Self {
        self.cookie_name = cookie_name.into();
        self.header_name = header_name.into();
        self
    }

    async fn csrf_token(&self) -> Result<String, ClientError> {
        let mut cached = self.csrf_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let response = self
            .http
            .get(format!("{}/api/csrf-token", self.base_url))
            .send()
            .await?;
        let body: CsrfTokenBody = read_json(response).await?;
        debug!("Fetched CSRF token from {}", self.base_url);

        *cached = Some(body.csrf_token.clone());
        Ok(body.csrf_token)
    }

    async fn forget_csrf_token(&self) {
        *self.csrf_token.lock().await = None;
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, upload: &BatchUpload) -> Result<AnalyzeReply, ClientError> {
        let token = self.csrf_token().await?;

        let image = multipart::Part::bytes(upload.bytes.to_vec())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)?;
        let form = multipart::Form::new()
            .part("image", image)
            .text("analysisType", upload.analysis_type.clone())
            .text("company", upload.company.clone())
            .text("provider", upload.provider.clone())
            .text("batchId", upload.batch_id.clone());

        let response = self
            .http
            .post(format!("{}/api/analyze", self.base_url))
            .header(reqwest::header::COOKIE, format!("{}={}", self.cookie_name, token))
            .header(self.header_name.as_str(), token.as_str())
            .multipart(form)
            .send()
            .await?;

        if response.status() == StatusCode::FORBIDDEN {
            self.forget_csrf_token().await;
        }

        read_envelope(response).await
    }

    async fn credit_status(&self, company: &str) -> Result<CreditStatus, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/usage", self.base_url))
            .query(&[("company", company)])
            .send()
            .await?;

        read_envelope(response).await
    }
}

async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let envelope: Envelope<T> = read_json(response).await?;
    if !envelope.success {
        return Err(ClientError::Rejected(
            envelope.error.unwrap_or_else(|| "erro desconhecido".into()),
        ));
    }
    envelope
        .data
        .ok_or_else(|| ClientError::InvalidBody("campo 'data' ausente".into()))
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<Envelope<Value>>(&text)
            .ok()
            .and_then(|e| e.error)
            .unwrap_or(text);
        return Err(ClientError::Status {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&text).map_err(|e| ClientError::InvalidBody(e.to_string()))
}

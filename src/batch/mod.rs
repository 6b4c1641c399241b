//! Bounded-concurrency batch analysis.
//!
//! A batch submits every file to the analysis endpoint with at most `concurrency`
//! requests in flight. Each input settles into exactly one [`BatchItemResult`]
//! (failures become `"ERRO"` records, never errors of the whole run), results stay in
//! input order and progress is published over a `watch` channel as items settle.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub mod client;
pub mod history;

pub use client::{AnalysisClient, AnalyzeReply, ClientError, CreditStatus, HttpAnalysisClient};
pub use history::{BatchHistory, BatchRecord, HistoryError};

pub const FAILED_RESULT: &str = "ERRO";
pub const DEFAULT_CONCURRENCY: usize = 2;

static LAST_BATCH_MILLIS: AtomicI64 = AtomicI64::new(0);

/// `batch_<epoch-millis>`, strictly increasing within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(String);

impl BatchId {
    pub fn generate() -> Self {
        let now = Utc::now().timestamp_millis();
        let mut last = LAST_BATCH_MILLIS.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match LAST_BATCH_MILLIS.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(format!("batch_{next}")),
                Err(actual) => last = actual,
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Per-item id: `<batchId>_<index>`.
    pub fn item_id(&self, index: usize) -> String {
        format!("{}_{}", self.0, index)
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file selected for analysis.
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl BatchFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "documento".into());
        let mime_type = mime_from_extension(path).to_string();
        Ok(Self::new(file_name, mime_type, bytes))
    }
}

fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// One multipart request to the analysis endpoint.
#[derive(Debug, Clone)]
pub struct BatchUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
    pub analysis_type: String,
    pub company: String,
    pub provider: String,
    pub batch_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchSchedule {
    /// Consecutive chunks of `concurrency` files; a chunk starts only after the previous one settled.
    #[default]
    Chunked,
    /// A semaphore-bounded pool; a new file starts as soon as any slot frees up.
    Pooled,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub company: String,
    pub provider: String,
    pub analysis_type: String,
    pub concurrency: usize,
    pub schedule: BatchSchedule,
}

impl BatchOptions {
    pub fn new(
        company: impl Into<String>,
        provider: impl Into<String>,
        analysis_type: impl Into<String>,
    ) -> Self {
        Self {
            company: company.into(),
            provider: provider.into(),
            analysis_type: analysis_type.into(),
            concurrency: DEFAULT_CONCURRENCY,
            schedule: BatchSchedule::default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_schedule(mut self, schedule: BatchSchedule) -> Self {
        self.schedule = schedule;
        self
    }
}

/// Shown to the caller when the remaining credits do not cover the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditCheck {
    pub requested: usize,
    pub remaining: u32,
}

impl CreditCheck {
    pub fn affordable(&self) -> usize {
        self.requested.min(self.remaining as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditDecision {
    ProceedWithAffordable,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub id: String,
    pub file_name: String,
    pub result: String,
    pub error: Option<String>,
    #[serde(default)]
    pub alerts: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl BatchItemResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn succeeded(id: String, file_name: String, reply: AnalyzeReply) -> Self {
        let result = match reply.suggested_name {
            Some(name) if !name.is_empty() => name,
            _ => match reply.analysis {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            },
        };

        Self {
            id,
            file_name,
            result,
            error: None,
            alerts: reply.alerts,
            timestamp: Utc::now(),
        }
    }

    fn failed(id: String, file_name: String, error: impl Into<String>) -> Self {
        Self {
            id,
            file_name,
            result: FAILED_RESULT.to_string(),
            error: Some(error.into()),
            alerts: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub results: Vec<BatchItemResult>,
}

impl BatchProgress {
    pub fn is_complete(&self) -> bool {
        self.processed == self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[BatchItemResult]) -> Self {
        Self {
            total: results.len(),
            succeeded: results.iter().filter(|r| r.is_success()).count(),
        }
    }

    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }

    pub fn message(&self) -> String {
        if self.succeeded == self.total {
            format!("{} de {} arquivos processados com sucesso", self.succeeded, self.total)
        } else {
            format!("{} de {} processados, verifique os erros", self.succeeded, self.total)
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub results: Vec<BatchItemResult>,
    /// Monthly usage re-read from the server after the run; `None` if that failed.
    pub usage: Option<CreditStatus>,
    /// Files left out after the caller chose to proceed with the affordable prefix.
    pub skipped: usize,
    pub summary: BatchSummary,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("não foi possível verificar os créditos: {0}")]
    CreditCheck(#[source] ClientError),
    #[error("lote cancelado: {requested} arquivos, {remaining} créditos restantes")]
    Cancelled { requested: usize, remaining: u32 },
    #[error("sem créditos restantes para este mês")]
    NoCredits,
}

pub struct BatchAnalyzer {
    client: Arc<dyn AnalysisClient>,
    progress: watch::Sender<BatchProgress>,
}

impl std::fmt::Debug for BatchAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchAnalyzer").finish_non_exhaustive()
    }
}

impl BatchAnalyzer {
    pub fn new(client: Arc<dyn AnalysisClient>) -> Self {
        let (progress, _) = watch::channel(BatchProgress::default());
        Self { client, progress }
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.progress.subscribe()
    }

    /// Runs one batch.
    ///
    /// `decide` is only consulted when the remaining credits are fewer than the files.
    pub async fn run<D>(
        &self,
        files: Vec<BatchFile>,
        options: &BatchOptions,
        decide: D,
    ) -> Result<BatchReport, BatchError>
    where
        D: FnOnce(&CreditCheck) -> CreditDecision,
    {
        let mut files = files;
        let mut skipped = 0;

        if !files.is_empty() {
            let status = self
                .client
                .credit_status(&options.company)
                .await
                .map_err(BatchError::CreditCheck)?;

            let check = CreditCheck {
                requested: files.len(),
                remaining: status.remaining_credits,
            };
            if check.affordable() < check.requested {
                match decide(&check) {
                    CreditDecision::Cancel => {
                        return Err(BatchError::Cancelled {
                            requested: check.requested,
                            remaining: check.remaining,
                        })
                    }
                    CreditDecision::ProceedWithAffordable if check.affordable() == 0 => {
                        return Err(BatchError::NoCredits)
                    }
                    CreditDecision::ProceedWithAffordable => {
                        skipped = check.requested - check.affordable();
                        files.truncate(check.affordable());
                    }
                }
            }
        }

        let batch_id = BatchId::generate();
        let concurrency = options.concurrency.max(1);
        let total = files.len();
        info!(
            "Starting {} with {} files ({:?}, concurrency {})",
            batch_id, total, options.schedule, concurrency
        );
        self.publish(0, total, Vec::new());

        let results = match options.schedule {
            BatchSchedule::Chunked => {
                self.run_chunked(&batch_id, &files, options, concurrency)
                    .await
            }
            BatchSchedule::Pooled => {
                self.run_pooled(&batch_id, &files, options, concurrency)
                    .await
            }
        };

        let usage = match self.client.credit_status(&options.company).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Could not refresh monthly usage after {}: {}", batch_id, e);
                None
            }
        };

        let summary = BatchSummary::from_results(&results);
        info!("{}: {}", batch_id, summary.message());

        Ok(BatchReport {
            batch_id,
            results,
            usage,
            skipped,
            summary,
        })
    }

    async fn run_chunked(
        &self,
        batch_id: &BatchId,
        files: &[BatchFile],
        options: &BatchOptions,
        concurrency: usize,
    ) -> Vec<BatchItemResult> {
        let total = files.len();
        let mut results = Vec::with_capacity(total);

        for (chunk_index, chunk) in files.chunks(concurrency).enumerate() {
            let offset = chunk_index * concurrency;
            let settled = join_all(chunk.iter().enumerate().map(|(i, file)| {
                process_item(
                    Arc::clone(&self.client),
                    batch_id.item_id(offset + i),
                    upload_for(file, options, batch_id),
                )
            }))
            .await;

            results.extend(settled);
            self.publish(results.len(), total, results.clone());
        }

        results
    }

    async fn run_pooled(
        &self,
        batch_id: &BatchId,
        files: &[BatchFile],
        options: &BatchOptions,
        concurrency: usize,
    ) -> Vec<BatchItemResult> {
        let total = files.len();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut set = JoinSet::new();

        for (index, file) in files.iter().enumerate() {
            let sem = Arc::clone(&semaphore);
            let client = Arc::clone(&self.client);
            let id = batch_id.item_id(index);
            let upload = upload_for(file, options, batch_id);
            set.spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    let file_name = upload.file_name.clone();
                    return (index, BatchItemResult::failed(id, file_name, "fila de envio encerrada"));
                };
                (index, process_item(client, id, upload).await)
            });
        }

        let mut slots: Vec<Option<BatchItemResult>> = vec![None; total];
        let mut processed = 0;
        while let Some(joined) = set.join_next().await {
            processed += 1;
            match joined {
                Ok((index, item)) => slots[index] = Some(item),
                Err(e) => error!("Batch task for {} failed to complete: {}", batch_id, e),
            }
            self.publish(processed, total, slots.iter().flatten().cloned().collect());
        }

        slots
            .into_iter()
            .zip(files)
            .enumerate()
            .map(|(index, (slot, file))| {
                slot.unwrap_or_else(|| {
                    BatchItemResult::failed(
                        batch_id.item_id(index),
                        file.file_name.clone(),
                        "processamento interrompido",
                    )
                })
            })
            .collect()
    }

    fn publish(&self, processed: usize, total: usize, results: Vec<BatchItemResult>) {
        self.progress.send_replace(BatchProgress {
            processed,
            total,
            results,
        });
    }
}

fn upload_for(file: &BatchFile, options: &BatchOptions, batch_id: &BatchId) -> BatchUpload {
    BatchUpload {
        file_name: file.file_name.clone(),
        mime_type: file.mime_type.clone(),
        bytes: file.bytes.clone(),
        analysis_type: options.analysis_type.clone(),
        company: options.company.clone(),
        provider: options.provider.clone(),
        batch_id: batch_id.to_string(),
    }
}

async fn process_item(
    client: Arc<dyn AnalysisClient>,
    id: String,
    upload: BatchUpload,
) -> BatchItemResult {
    match client.analyze(&upload).await {
        Ok(reply) => BatchItemResult::succeeded(id, upload.file_name, reply),
        Err(e) => {
            warn!("Analysis of {} failed: {}", upload.file_name, e);
            BatchItemResult::failed(id, upload.file_name, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails files whose name starts with `bad`, tracks peak concurrency.
    struct FakeClient {
        remaining: u32,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        started: Mutex<Vec<String>>,
    }

    impl FakeClient {
        fn new(remaining: u32) -> Arc<Self> {
            Arc::new(Self {
                remaining,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AnalysisClient for FakeClient {
        async fn analyze(&self, upload: &BatchUpload) -> Result<AnalyzeReply, ClientError> {
            self.started.lock().unwrap().push(upload.file_name.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = if upload.file_name.ends_with("slow.png") { 30 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if upload.file_name.starts_with("bad") {
                return Err(ClientError::Rejected("imagem ilegível".into()));
            }
            Ok(AnalyzeReply {
                analysis: json!({"valor": "10,00"}),
                suggested_name: Some(format!("renamed_{}", upload.file_name)),
                alerts: vec![],
                batch_id: Some(upload.batch_id.clone()),
            })
        }

        async fn credit_status(&self, _company: &str) -> Result<CreditStatus, ClientError> {
            Ok(CreditStatus {
                monthly_usage: 0,
                remaining_credits: self.remaining,
                monthly_limit: self.remaining,
            })
        }
    }

    fn files(names: &[&str]) -> Vec<BatchFile> {
        names
            .iter()
            .map(|n| BatchFile::new(*n, "image/png", Bytes::from_static(b"png")))
            .collect()
    }

    fn options(schedule: BatchSchedule) -> BatchOptions {
        BatchOptions::new("acme", "gemini", "recibo").with_schedule(schedule)
    }

    #[test]
    fn test_batch_ids_never_collide() {
        let first = BatchId::generate();
        let second = BatchId::generate();
        assert_ne!(first, second);
        assert!(first.as_str().starts_with("batch_"));
        assert_eq!(first.item_id(3), format!("{}_3", first));
    }

    #[test]
    fn test_summary_messages() {
        let ok = BatchSummary { total: 3, succeeded: 3 };
        assert_eq!(ok.message(), "3 de 3 arquivos processados com sucesso");
        let partial = BatchSummary { total: 3, succeeded: 1 };
        assert_eq!(partial.message(), "1 de 3 processados, verifique os erros");
        assert_eq!(partial.failed(), 2);
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_from_extension(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_from_extension(Path::new("a.pdf")), "application/pdf");
        assert_eq!(mime_from_extension(Path::new("a")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_chunked_keeps_order_and_completeness() {
        let client = FakeClient::new(100);
        let analyzer = BatchAnalyzer::new(client.clone());
        let report = analyzer
            .run(files(&["a.png", "bad.png", "c.png", "d.png", "e.png"]), &options(BatchSchedule::Chunked), |_| {
                CreditDecision::Cancel
            })
            .await
            .unwrap();

        assert_eq!(report.results.len(), 5);
        let names: Vec<&str> = report.results.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "bad.png", "c.png", "d.png", "e.png"]);
        assert_eq!(report.results[1].result, FAILED_RESULT);
        assert_eq!(report.results[1].error.as_deref(), Some("imagem ilegível"));
        assert_eq!(report.results[0].result, "renamed_a.png");
        assert_eq!(report.results[4].id, report.batch_id.item_id(4));
        assert_eq!(report.summary, BatchSummary { total: 5, succeeded: 4 });
        assert!(client.peak.load(Ordering::SeqCst) <= DEFAULT_CONCURRENCY);

        let progress = analyzer.subscribe().borrow().clone();
        assert!(progress.is_complete());
        assert_eq!(progress.results, report.results);
    }

    #[tokio::test]
    async fn test_chunk_waits_for_slowest_member() {
        let client = FakeClient::new(100);
        let analyzer = BatchAnalyzer::new(client.clone());
        analyzer
            .run(files(&["a-slow.png", "b.png", "c.png"]), &options(BatchSchedule::Chunked), |_| {
                CreditDecision::Cancel
            })
            .await
            .unwrap();

        // c.png belongs to the second chunk and cannot start before a-slow.png settles.
        let started = client.started.lock().unwrap().clone();
        assert_eq!(started.last().map(String::as_str), Some("c.png"));
    }

    #[tokio::test]
    async fn test_pooled_respects_bound() {
        let client = FakeClient::new(100);
        let analyzer = BatchAnalyzer::new(client.clone());
        let names: Vec<String> = (0..7).map(|i| format!("f{i}.png")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let report = analyzer
            .run(
                files(&names),
                &options(BatchSchedule::Pooled).with_concurrency(3),
                |_| CreditDecision::Cancel,
            )
            .await
            .unwrap();

        assert_eq!(report.results.len(), 7);
        assert!(client.peak.load(Ordering::SeqCst) <= 3);
        for (index, item) in report.results.iter().enumerate() {
            assert_eq!(item.file_name, format!("f{index}.png"));
        }
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let client = FakeClient::new(100);
        let analyzer = BatchAnalyzer::new(client);
        let mut rx = analyzer.subscribe();

        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let progress = rx.borrow_and_update().clone();
                seen.push(progress.processed);
                if progress.total > 0 && progress.is_complete() {
                    break;
                }
            }
            seen
        });

        analyzer
            .run(files(&["a.png", "b.png", "c.png", "d.png"]), &options(BatchSchedule::Pooled), |_| {
                CreditDecision::Cancel
            })
            .await
            .unwrap();

        let seen = watcher.await.unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&4));
    }

    #[tokio::test]
    async fn test_insufficient_credits_prompt() {
        let client = FakeClient::new(2);
        let analyzer = BatchAnalyzer::new(client.clone());

        let cancelled = analyzer
            .run(files(&["a.png", "b.png", "c.png"]), &options(BatchSchedule::Chunked), |check| {
                assert_eq!(check.affordable(), 2);
                CreditDecision::Cancel
            })
            .await;
        assert!(matches!(
            cancelled,
            Err(BatchError::Cancelled { requested: 3, remaining: 2 })
        ));
        assert!(client.started.lock().unwrap().is_empty());

        let report = analyzer
            .run(files(&["a.png", "b.png", "c.png"]), &options(BatchSchedule::Chunked), |_| {
                CreditDecision::ProceedWithAffordable
            })
            .await
            .unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_no_credits_left() {
        let analyzer = BatchAnalyzer::new(FakeClient::new(0));
        let result = analyzer
            .run(files(&["a.png"]), &options(BatchSchedule::Chunked), |_| {
                CreditDecision::ProceedWithAffordable
            })
            .await;
        assert!(matches!(result, Err(BatchError::NoCredits)));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let analyzer = BatchAnalyzer::new(FakeClient::new(0));
        let report = analyzer
            .run(Vec::new(), &options(BatchSchedule::Chunked), |_| CreditDecision::Cancel)
            .await
            .unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.summary.message(), "0 de 0 arquivos processados com sucesso");
    }
}

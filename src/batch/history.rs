use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{BatchItemResult, BatchReport};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("history file is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// One finished batch as kept in local history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub batch_id: String,
    pub company: String,
    pub provider: String,
    pub analysis_type: String,
    pub created_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub items: Vec<BatchItemResult>,
}

impl BatchRecord {
    pub fn from_report(report: &BatchReport, company: &str, provider: &str, analysis_type: &str) -> Self {
        Self {
            batch_id: report.batch_id.to_string(),
            company: company.to_string(),
            provider: provider.to_string(),
            analysis_type: analysis_type.to_string(),
            created_at: Utc::now(),
            total: report.summary.total,
            succeeded: report.summary.succeeded,
            items: report.results.clone(),
        }
    }
}

/// JSON file of past batches, newest first, capped at `limit` entries.
#[derive(Debug, Clone)]
pub struct BatchHistory {
    path: PathBuf,
    limit: usize,
}

impl BatchHistory {
    pub fn new(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file reads as empty history.
    pub async fn load(&self) -> Result<Vec<BatchRecord>, HistoryError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.is_empty() => Ok(Vec::new()),
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn append(&self, record: BatchRecord) -> Result<Vec<BatchRecord>, HistoryError> {
        let mut records = self.load().await?;
        records.retain(|r| r.batch_id != record.batch_id);
        records.insert(0, record);
        records.truncate(self.limit);

        self.save(&records).await?;
        debug!("Batch history at {} now holds {} entries", self.path.display(), records.len());
        Ok(records)
    }

    async fn save(&self, records: &[BatchRecord]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(records)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(batch_id: &str) -> BatchRecord {
        BatchRecord {
            batch_id: batch_id.into(),
            company: "acme".into(),
            provider: "gemini".into(),
            analysis_type: "recibo".into(),
            created_at: Utc::now(),
            total: 1,
            succeeded: 1,
            items: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let history = BatchHistory::new(dir.path().join("none.json"), 5);
        assert!(history.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_newest_first_and_trimmed() {
        let dir = TempDir::new().unwrap();
        let history = BatchHistory::new(dir.path().join("nested/history.json"), 2);

        history.append(record("batch_1")).await.unwrap();
        history.append(record("batch_2")).await.unwrap();
        let records = history.append(record("batch_3")).await.unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["batch_3", "batch_2"]);

        let reloaded = history.load().await.unwrap();
        assert_eq!(reloaded, records);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();

        let history = BatchHistory::new(path, 5);
        assert!(matches!(history.load().await, Err(HistoryError::Json(_))));
    }
}

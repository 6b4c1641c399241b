use serde::Serialize;
use std::collections::BTreeMap;

/// Dashboard aggregation of alert lists across many analyzed documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub total_documents: usize,
    pub documents_with_alerts: usize,
    pub alert_counts: BTreeMap<String, usize>,
}

impl AuditSummary {
    pub fn from_results<I, A>(results: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[String]>,
    {
        let mut summary = Self::default();
        for alerts in results {
            summary.record(alerts.as_ref());
        }
        summary
    }

    pub fn record(&mut self, alerts: &[String]) {
        self.total_documents += 1;
        if alerts.is_empty() {
            return;
        }
        self.documents_with_alerts += 1;
        for alert in alerts {
            *self.alert_counts.entry(alert.clone()).or_insert(0) += 1;
        }
    }

    /// Alerts ordered by frequency, most common first.
    pub fn top_alerts(&self, limit: usize) -> Vec<(&str, usize)> {
        let mut ranked: Vec<(&str, usize)> = self
            .alert_counts
            .iter()
            .map(|(alert, count)| (alert.as_str(), *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(limit);
        ranked
    }
}

//! Monthly analysis credits per company.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreditError {
    #[error("Créditos insuficientes: limite mensal de {limit} análises atingido")]
    InsufficientCredits { limit: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub monthly_usage: u32,
    pub remaining_credits: u32,
    pub monthly_limit: u32,
}

/// In-memory ledger keyed by company and calendar month (`YYYY-MM`).
#[derive(Debug)]
pub struct CreditLedger {
    monthly_limit: u32,
    usage: RwLock<HashMap<(String, String), u32>>,
}

impl CreditLedger {
    pub fn new(monthly_limit: u32) -> Self {
        Self {
            monthly_limit,
            usage: RwLock::new(HashMap::new()),
        }
    }

    pub fn monthly_limit(&self) -> u32 {
        self.monthly_limit
    }

    pub async fn snapshot(&self, company: &str) -> UsageSnapshot {
        self.snapshot_at(company, Utc::now()).await
    }

    pub async fn snapshot_at(&self, company: &str, now: DateTime<Utc>) -> UsageSnapshot {
        let usage = self.usage.read().await;
        let used = usage
            .get(&(company.to_string(), month_key(now)))
            .copied()
            .unwrap_or(0);
        UsageSnapshot {
            monthly_usage: used,
            remaining_credits: self.monthly_limit.saturating_sub(used),
            monthly_limit: self.monthly_limit,
        }
    }

    pub async fn usage(&self, company: &str) -> u32 {
        self.snapshot(company).await.monthly_usage
    }

    pub async fn remaining(&self, company: &str) -> u32 {
        self.snapshot(company).await.remaining_credits
    }

    /// Reserves one credit for `company` in the current month.
    pub async fn try_consume(&self, company: &str) -> Result<UsageSnapshot, CreditError> {
        self.try_consume_at(company, Utc::now()).await
    }

    pub async fn try_consume_at(
        &self,
        company: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot, CreditError> {
        let mut usage = self.usage.write().await;
        let used = usage.entry((company.to_string(), month_key(now))).or_insert(0);
        if *used >= self.monthly_limit {
            info!("Company {company} exhausted its {} monthly credits", self.monthly_limit);
            return Err(CreditError::InsufficientCredits {
                limit: self.monthly_limit,
            });
        }
        *used += 1;
        Ok(UsageSnapshot {
            monthly_usage: *used,
            remaining_credits: self.monthly_limit - *used,
            monthly_limit: self.monthly_limit,
        })
    }

    /// Returns a credit reserved by [`try_consume`](Self::try_consume) when the analysis failed.
    pub async fn refund(&self, company: &str) {
        self.refund_at(company, Utc::now()).await;
    }

    pub async fn refund_at(&self, company: &str, now: DateTime<Utc>) {
        let mut usage = self.usage.write().await;
        if let Some(used) = usage.get_mut(&(company.to_string(), month_key(now))) {
            *used = used.saturating_sub(1);
        }
    }
}

fn month_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 15, 12, 0, 0)
            .single()
            .expect("valid date")
    }

    #[tokio::test]
    async fn test_consume_until_exhausted() {
        let ledger = CreditLedger::new(2);
        let now = at(2026, 3);

        let first = ledger.try_consume_at("acme", now).await.expect("credit");
        assert_eq!(first.remaining_credits, 1);
        ledger.try_consume_at("acme", now).await.expect("credit");

        assert_eq!(
            ledger.try_consume_at("acme", now).await,
            Err(CreditError::InsufficientCredits { limit: 2 })
        );

        let other = ledger.snapshot_at("globex", now).await;
        assert_eq!(other.remaining_credits, 2);
    }

    #[tokio::test]
    async fn test_current_month_accessors() {
        let ledger = CreditLedger::new(3);
        ledger.try_consume("acme").await.expect("credit");
        assert_eq!(ledger.usage("acme").await, 1);
        assert_eq!(ledger.remaining("acme").await, 2);
        assert_eq!(ledger.remaining("globex").await, 3);
    }

    #[tokio::test]
    async fn test_usage_resets_each_month() {
        let ledger = CreditLedger::new(1);
        ledger.try_consume_at("acme", at(2026, 3)).await.expect("credit");
        assert!(ledger.try_consume_at("acme", at(2026, 3)).await.is_err());
        assert!(ledger.try_consume_at("acme", at(2026, 4)).await.is_ok());
    }

    #[tokio::test]
    async fn test_refund_restores_credit() {
        let ledger = CreditLedger::new(5);
        let now = at(2026, 1);
        ledger.try_consume_at("acme", now).await.expect("credit");
        ledger.refund_at("acme", now).await;
        ledger.refund_at("acme", now).await;

        let snapshot = ledger.snapshot_at("acme", now).await;
        assert_eq!(snapshot.monthly_usage, 0);
        assert_eq!(snapshot.remaining_credits, 5);
    }

    #[test]
    fn test_month_key() {
        assert_eq!(month_key(at(2026, 7)), "2026-07");
    }
}

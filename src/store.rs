use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// Metadata for a generated report artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub id: i64,
    pub kind: String,
    pub file_name: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub filters: serde_json::Value,
    pub statistics: serde_json::Value,
    pub downloads: i64,
    pub last_download_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReportRecord {
    pub kind: String,
    pub file_name: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub filters: serde_json::Value,
    pub statistics: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct ReportListFilter {
    pub kind: Option<String>,
    pub limit: Option<i64>,
}

impl ReportListFilter {
    pub const DEFAULT_LIMIT: i64 = 50;

    pub fn effective_limit(&self) -> i64 {
        self.limit.filter(|limit| *limit > 0).unwrap_or(Self::DEFAULT_LIMIT)
    }
}

/// Persistence of report metadata and download counters.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save(&self, record: NewReportRecord) -> Result<i64>;

    /// Newest first.
    async fn list(&self, filter: &ReportListFilter) -> Result<Vec<ReportRecord>>;

    async fn get(&self, id: i64) -> Result<Option<ReportRecord>>;

    async fn increment_download(&self, id: i64) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<bool>;
}

use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by report generation, both on the synchronous path and
/// inside queued jobs.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Query or persistence failure in the data store.
    #[error("data source error: {0}")]
    DataSource(String),

    /// Artifact rendering failed.
    #[error("render error: {0}")]
    Render(String),

    /// Writing the artifact to the storage directory failed.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The handler panicked; the attempt counts as failed.
    #[error("job handler panicked: {0}")]
    Panicked(String),

    #[error("job timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Terminal: the job failed on every allowed attempt.
    #[error("job failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("job queue is closed")]
    QueueClosed,
}

impl From<sqlx::Error> for ReportError {
    fn from(err: sqlx::Error) -> Self {
        Self::DataSource(err.to_string())
    }
}

impl From<csv::Error> for ReportError {
    fn from(err: csv::Error) -> Self {
        Self::Render(err.to_string())
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Render(err.to_string())
    }
}

pub type Result<T, E = ReportError> = std::result::Result<T, E>;

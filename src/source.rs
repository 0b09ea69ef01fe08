use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ParticipationFilters, ParticipationRecord, StudentRecord};

/// Read access to participation data.
///
/// Implementations derive `status` for every row and apply the status filter
/// after derivation, since status is not a stored column.
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn fetch_participation(
        &self,
        filters: &ParticipationFilters,
    ) -> Result<Vec<ParticipationRecord>>;

    async fn fetch_students(&self) -> Result<Vec<StudentRecord>>;
}

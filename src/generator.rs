use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::error::{ReportError, Result};
use crate::models::ParticipationFilters;
use crate::queue::{ClassReportParams, JobId, JobPayload, JobResult, SyntheticLoadParams};
use crate::render::{render, ReportFormat, ReportMeta};
use crate::source::ReportSource;
use crate::storage::{ArtifactRef, ArtifactStore};
use crate::store::{NewReportRecord, ReportStore};
use crate::summary::{summarize, ReportSummary};
use crate::worker::{JobContext, JobHandler};

const SYNTHETIC_YIELD_EVERY: usize = 5_000;

/// Produces report artifacts for queued jobs.
pub struct ReportGenerator {
    source: Arc<dyn ReportSource>,
    store: Arc<dyn ReportStore>,
    artifacts: ArtifactStore,
}

impl ReportGenerator {
    pub fn new(source: Arc<dyn ReportSource>, store: Arc<dyn ReportStore>, artifacts: ArtifactStore) -> Self {
        Self {
            source,
            store,
            artifacts,
        }
    }

    async fn roster(&self, job_id: JobId) -> Result<(ArtifactRef, serde_json::Value)> {
        let students = self.source.fetch_students().await?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["ID", "Name", "Email"])?;
        for student in &students {
            writer.write_record([student.id.to_string(), student.name.clone(), student.email.clone()])?;
        }
        let bytes = finish_csv(writer)?;

        let file_name = format!("roster-{job_id}.csv");
        let artifact = self.artifacts.write(&file_name, &bytes).await?;
        Ok((artifact, serde_json::json!({ "students": students.len() })))
    }

    async fn class_report(
        &self,
        job_id: JobId,
        params: &ClassReportParams,
    ) -> Result<(ArtifactRef, serde_json::Value)> {
        let filters = ParticipationFilters::for_class(params.class_id);
        let summary = class_summary(self.source.as_ref(), &filters).await?;

        let title = params
            .title
            .clone()
            .unwrap_or_else(|| format!("Class {} workload report", params.class_id));
        let meta = ReportMeta::new(title, filters);
        let bytes = render(params.format, &summary.students, &meta)?;

        let file_name = format!("class-{}-{job_id}.{}", params.class_id, params.format.extension());
        let artifact = self.artifacts.write(&file_name, &bytes).await?;
        Ok((artifact, serde_json::to_value(&summary.meta)?))
    }

    async fn synthetic_load(
        &self,
        job_id: JobId,
        params: &SyntheticLoadParams,
    ) -> Result<(ArtifactRef, serde_json::Value)> {
        let columns = params.column_count.max(1);
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());

        writer.write_record([format!("Title: {}", params.title)])?;
        writer.write_record([format!("Generated at: {}", Utc::now().to_rfc3339())])?;
        writer.write_record([""])?;
        writer.write_record((1..=columns).map(|c| format!("Column_{c}")))?;

        for row in 1..=params.row_count {
            writer.write_record((1..=columns).map(|c| format!("R{row}C{c}")))?;
            if row % SYNTHETIC_YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
        let bytes = finish_csv(writer)?;

        let file_name = format!("load-{job_id}.csv");
        let artifact = self.artifacts.write(&file_name, &bytes).await?;
        Ok((
            artifact,
            serde_json::json!({ "rows": params.row_count, "columns": columns }),
        ))
    }
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|err| ReportError::Render(err.to_string()))
}

#[async_trait]
impl JobHandler for ReportGenerator {
    async fn handle(&self, ctx: &JobContext) -> Result<JobResult> {
        ctx.progress("starting").await;

        let (artifact, statistics, filters) = match &ctx.payload {
            JobPayload::Roster => {
                let (artifact, statistics) = self.roster(ctx.job_id).await?;
                (artifact, statistics, serde_json::json!({}))
            }
            JobPayload::ClassReport(params) => {
                if params.class_id <= 0 {
                    return Err(ReportError::InvalidPayload(format!(
                        "class id must be positive, got {}",
                        params.class_id
                    )));
                }
                let (artifact, statistics) = self.class_report(ctx.job_id, params).await?;
                (artifact, statistics, serde_json::to_value(params)?)
            }
            JobPayload::SyntheticLoad(params) => {
                let (artifact, statistics) = self.synthetic_load(ctx.job_id, params).await?;
                (artifact, statistics, serde_json::to_value(params)?)
            }
        };

        ctx.progress("finalizing").await;

        let saved = self
            .store
            .save(NewReportRecord {
                kind: ctx.payload.kind().to_string(),
                file_name: artifact.file_name.clone(),
                file_path: artifact.path.display().to_string(),
                size_bytes: i64::try_from(artifact.size_bytes).unwrap_or(i64::MAX),
                filters,
                statistics,
            })
            .await;
        let record_id = match saved {
            Ok(id) => id,
            Err(err) => {
                // An artifact without a record is unreachable; drop it.
                if let Err(remove_err) = self.artifacts.remove(&artifact.file_name).await {
                    warn!(file = %artifact.file_name, error = %remove_err, "failed to remove orphaned artifact");
                }
                return Err(err);
            }
        };

        info!(
            job_id = %ctx.job_id,
            attempt = ctx.attempt,
            file = %artifact.file_name,
            size = artifact.size_bytes,
            record_id,
            "report generated"
        );

        Ok(JobResult {
            artifact_ref: artifact.file_name,
            size_bytes: artifact.size_bytes,
            record_id: Some(record_id),
        })
    }
}

/// Synchronous path: fetch, aggregate and summarise in one call.
pub async fn class_summary(source: &dyn ReportSource, filters: &ParticipationFilters) -> Result<ReportSummary> {
    let rows = source.fetch_participation(filters).await?;
    let summary = summarize(&rows);
    info!(
        participations = summary.meta.total_participations,
        students = summary.meta.total_students,
        "report summary built"
    );
    Ok(summary)
}

/// Synchronous path: render statistics for the filters straight to bytes.
pub async fn export(
    source: &dyn ReportSource,
    filters: &ParticipationFilters,
    format: ReportFormat,
    title: &str,
) -> Result<Vec<u8>> {
    let summary = class_summary(source, filters).await?;
    render(format, &summary.students, &ReportMeta::new(title, filters.clone()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::models::StudentRecord;
    use crate::queue::{JobQueue, JobStatus};
    use crate::source::memory::{record, MemorySource};
    use crate::store::memory::MemoryReportStore;
    use crate::store::ReportListFilter;
    use crate::worker::{WorkerPool, WorkerSettings};

    fn class_rows() -> Vec<(i64, crate::models::ParticipationRecord)> {
        vec![
            (1, record(1, true, "01:00:00", Some(7.0))),
            (1, record(1, false, "00:30:00", None)),
            (1, record(2, true, "02:00:00", Some(5.0))),
            (2, record(3, true, "10:00:00", Some(9.0))),
        ]
    }

    fn generator(source: MemorySource, dir: &std::path::Path) -> (Arc<ReportGenerator>, Arc<MemoryReportStore>) {
        let store = Arc::new(MemoryReportStore::default());
        let generator = Arc::new(ReportGenerator::new(
            Arc::new(source),
            store.clone(),
            ArtifactStore::new(dir),
        ));
        (generator, store)
    }

    fn context(payload: JobPayload) -> JobContext {
        JobContext::new(Arc::new(JobQueue::default()), Uuid::new_v4(), payload, 1)
    }

    #[tokio::test]
    async fn class_report_writes_artifact_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, store) = generator(MemorySource::new(class_rows()), dir.path());

        let payload = JobPayload::ClassReport(ClassReportParams {
            class_id: 1,
            format: ReportFormat::Spreadsheet,
            title: None,
        });
        let result = generator.handle(&context(payload)).await.unwrap();

        assert!(result.artifact_ref.starts_with("class-1-"));
        assert!(result.artifact_ref.ends_with(".csv"));
        let contents = std::fs::read_to_string(dir.path().join(&result.artifact_ref)).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert_eq!(result.size_bytes, contents.len() as u64);

        let saved = store.get(result.record_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(saved.kind, "classReport");
        assert_eq!(saved.statistics["totalStudents"], 2);
        assert_eq!(saved.statistics["totalParticipations"], 3);
        assert_eq!(saved.filters["classId"], 1);
    }

    #[tokio::test]
    async fn document_format_uses_markdown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, _) = generator(MemorySource::new(class_rows()), dir.path());

        let payload = JobPayload::ClassReport(ClassReportParams {
            class_id: 2,
            format: ReportFormat::Document,
            title: Some("Term 1".to_string()),
        });
        let result = generator.handle(&context(payload)).await.unwrap();

        assert!(result.artifact_ref.ends_with(".md"));
        let contents = std::fs::read_to_string(dir.path().join(&result.artifact_ref)).unwrap();
        assert!(contents.starts_with("# Term 1"));
        assert!(contents.contains("10:00:00"));
    }

    #[tokio::test]
    async fn invalid_class_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, _) = generator(MemorySource::new(class_rows()), dir.path());

        let payload = JobPayload::ClassReport(ClassReportParams {
            class_id: 0,
            format: ReportFormat::Spreadsheet,
            title: None,
        });
        let err = generator.handle(&context(payload)).await.unwrap_err();
        assert!(matches!(err, ReportError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn roster_lists_students() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MemorySource::default();
        source.students = vec![
            StudentRecord {
                id: 1,
                name: "Avery Lee".to_string(),
                email: "avery@example.com".to_string(),
            },
            StudentRecord {
                id: 2,
                name: "Jules Moreno".to_string(),
                email: "jules@example.com".to_string(),
            },
        ];
        let (generator, store) = generator(source, dir.path());

        let result = generator.handle(&context(JobPayload::Roster)).await.unwrap();
        let contents = std::fs::read_to_string(dir.path().join(&result.artifact_ref)).unwrap();
        assert_eq!(contents, "ID,Name,Email\n1,Avery Lee,avery@example.com\n2,Jules Moreno,jules@example.com\n");

        let listed = store.list(&ReportListFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].statistics["students"], 2);
    }

    #[tokio::test]
    async fn synthetic_load_writes_requested_grid() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, _) = generator(MemorySource::default(), dir.path());

        let payload = JobPayload::SyntheticLoad(SyntheticLoadParams {
            row_count: 12,
            column_count: 3,
            title: "Load".to_string(),
        });
        let result = generator.handle(&context(payload)).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join(&result.artifact_ref)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4 + 12);
        assert_eq!(lines[0], "Title: Load");
        assert_eq!(lines[3], "Column_1,Column_2,Column_3");
        assert_eq!(lines[15], "R12C1,R12C2,R12C3");
    }

    #[tokio::test]
    async fn data_source_failure_is_retried_by_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, store) = generator(MemorySource::new(class_rows()).failing(1), dir.path());

        let settings = WorkerSettings {
            concurrency: 2,
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff: Duration::from_millis(20),
        };
        let queue = Arc::new(JobQueue::new(settings.retry_policy()));
        let pool = WorkerPool::spawn(Arc::clone(&queue), generator, &settings);

        let mut events = queue.subscribe();
        let id = queue
            .enqueue(JobPayload::ClassReport(ClassReportParams {
                class_id: 1,
                format: ReportFormat::Spreadsheet,
                title: None,
            }))
            .await
            .unwrap();
        let terminal = events.wait_terminal().await.unwrap();

        assert_eq!(terminal.job_id, id);
        assert_eq!(terminal.status, JobStatus::Completed);
        assert_eq!(terminal.attempts_made, 2);
        let record_id = terminal.result.unwrap().record_id.unwrap();
        assert!(store.get(record_id).await.unwrap().is_some());
        pool.shutdown().await;
    }

    fn artifact_files(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn retry_settings(max_attempts: u32) -> WorkerSettings {
        WorkerSettings {
            concurrency: 1,
            timeout: Duration::from_secs(30),
            max_attempts,
            backoff: Duration::from_millis(20),
        }
    }

    fn class_one() -> JobPayload {
        JobPayload::ClassReport(ClassReportParams {
            class_id: 1,
            format: ReportFormat::Spreadsheet,
            title: None,
        })
    }

    #[tokio::test]
    async fn retried_save_leaves_a_single_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryReportStore::failing_saves(2));
        let generator = Arc::new(ReportGenerator::new(
            Arc::new(MemorySource::new(class_rows())),
            store.clone(),
            ArtifactStore::new(dir.path()),
        ));

        let settings = retry_settings(3);
        let queue = Arc::new(JobQueue::new(settings.retry_policy()));
        let pool = WorkerPool::spawn(Arc::clone(&queue), generator, &settings);

        let mut events = queue.subscribe();
        let id = queue.enqueue(class_one()).await.unwrap();
        let terminal = events.wait_terminal().await.unwrap();

        assert_eq!(terminal.status, JobStatus::Completed);
        assert_eq!(terminal.attempts_made, 3);
        assert_eq!(store.record_count().await, 1);
        assert_eq!(artifact_files(dir.path()), vec![format!("class-1-{id}.csv")]);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn exhausted_save_failures_remove_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryReportStore::failing_saves(5));
        let generator = Arc::new(ReportGenerator::new(
            Arc::new(MemorySource::new(class_rows())),
            store.clone(),
            ArtifactStore::new(dir.path()),
        ));

        let settings = retry_settings(2);
        let queue = Arc::new(JobQueue::new(settings.retry_policy()));
        let pool = WorkerPool::spawn(Arc::clone(&queue), generator, &settings);

        let mut events = queue.subscribe();
        queue.enqueue(class_one()).await.unwrap();
        let terminal = events.wait_terminal().await.unwrap();

        assert_eq!(terminal.status, JobStatus::Failed);
        assert!(terminal.error.unwrap().message.contains("report_records unavailable"));
        assert_eq!(store.record_count().await, 0);
        assert!(artifact_files(dir.path()).is_empty());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn sync_summary_surfaces_first_failure() {
        let source = MemorySource::new(class_rows()).failing(1);
        let filters = ParticipationFilters::for_class(1);

        let err = class_summary(&source, &filters).await.unwrap_err();
        assert!(matches!(err, ReportError::DataSource(_)));

        let summary = class_summary(&source, &filters).await.unwrap();
        assert_eq!(summary.meta.total_students, 2);
    }

    #[tokio::test]
    async fn export_renders_requested_format() {
        let source = MemorySource::new(class_rows());
        let bytes = export(&source, &ParticipationFilters::for_class(2), ReportFormat::Spreadsheet, "x")
            .await
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().starts_with("3,Student 3,"));
    }
}

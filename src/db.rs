use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{EvaluationStatus, ParticipationFilters, ParticipationRecord, StudentRecord};
use crate::source::ReportSource;
use crate::store::{NewReportRecord, ReportListFilter, ReportRecord, ReportStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        ("Avery Lee", "avery.lee@example.edu"),
        ("Jules Moreno", "jules.moreno@example.edu"),
        ("Kiara Patel", "kiara.patel@example.edu"),
        ("Noah Fischer", "noah.fischer@example.edu"),
    ];
    let classes = vec!["Nursing 2026-A", "Nursing 2026-B"];
    let teachers = vec![
        ("Dr. Helena Costa", "helena.costa@example.edu", "Nursing 2026-A"),
        ("Dr. Marcus Reid", "marcus.reid@example.edu", "Nursing 2026-B"),
    ];
    let activities = vec![
        ("Ward rotation", "shift"),
        ("Clinical simulation", "practice"),
        ("First aid certificate", "certificate"),
        ("Case study seminar", "activity"),
    ];

    for (name, email) in &students {
        sqlx::query(
            r#"
            INSERT INTO workload_reports.students (full_name, email)
            VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
            "#,
        )
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    for name in &classes {
        sqlx::query(
            "INSERT INTO workload_reports.classes (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .execute(pool)
        .await?;
    }

    for (name, email, class_name) in &teachers {
        let teacher_id: i64 = sqlx::query(
            r#"
            INSERT INTO workload_reports.teachers (full_name, email)
            VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(email)
        .fetch_one(pool)
        .await?
        .get("id");

        sqlx::query(
            r#"
            INSERT INTO workload_reports.class_teachers (class_id, teacher_id)
            SELECT id, $2 FROM workload_reports.classes WHERE name = $1
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(class_name)
        .bind(teacher_id)
        .execute(pool)
        .await?;
    }

    for (name, activity_type) in &activities {
        sqlx::query(
            r#"
            INSERT INTO workload_reports.activities (name, activity_type)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET activity_type = EXCLUDED.activity_type
            "#,
        )
        .bind(name)
        .bind(activity_type)
        .execute(pool)
        .await?;
    }

    let participations = vec![
        ("avery.lee@example.edu", "Nursing 2026-A", "Ward rotation", true, Some("06:00:00"), Some(8.5), Some("A")),
        ("avery.lee@example.edu", "Nursing 2026-A", "Clinical simulation", true, Some("03:30:00"), Some(7.0), Some("B")),
        ("avery.lee@example.edu", "Nursing 2026-A", "First aid certificate", false, None, None, None),
        ("jules.moreno@example.edu", "Nursing 2026-A", "Ward rotation", true, Some("05:15:00"), Some(5.5), Some("C")),
        ("jules.moreno@example.edu", "Nursing 2026-A", "Case study seminar", true, Some("01:45:00"), Some(6.0), Some("B")),
        ("kiara.patel@example.edu", "Nursing 2026-B", "Clinical simulation", true, Some("04:00:00"), Some(9.0), Some("A")),
        ("kiara.patel@example.edu", "Nursing 2026-B", "First aid certificate", true, Some("08:00:00"), None, None),
        ("noah.fischer@example.edu", "Nursing 2026-B", "Case study seminar", false, Some("00:00:00"), Some(3.0), Some("D")),
    ];

    for (email, class_name, activity, attended, hours, grade, concept) in participations {
        let result = sqlx::query(
            r#"
            INSERT INTO workload_reports.participations
            (student_id, class_id, activity_id, attended, hours, grade, concept)
            SELECT s.id, c.id, a.id, $4, $5::time, $6::numeric, $7
            FROM workload_reports.students s, workload_reports.classes c, workload_reports.activities a
            WHERE s.email = $1 AND c.name = $2 AND a.name = $3
            ON CONFLICT (student_id, class_id, activity_id) DO NOTHING
            "#,
        )
        .bind(email)
        .bind(class_name)
        .bind(activity)
        .bind(attended)
        .bind(hours)
        .bind(grade)
        .bind(concept)
        .execute(pool)
        .await
        .with_context(|| format!("failed to seed participation for {email}"))?;

        debug!(email, activity, inserted = result.rows_affected(), "seeded participation");
    }

    info!("seed data ready");
    Ok(())
}

/// Participation queries against Postgres.
#[derive(Debug, Clone)]
pub struct PgReportSource {
    pool: PgPool,
}

impl PgReportSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn participation_query(filters: &ParticipationFilters) -> String {
    let mut query = String::from(
        "SELECT s.id AS student_id, s.full_name, s.email, c.name AS class_name, \
         a.name AS activity_name, a.activity_type, p.attended, \
         COALESCE(p.hours::text, '') AS hours, p.grade::float8 AS grade, p.concept \
         FROM workload_reports.participations p \
         JOIN workload_reports.students s ON s.id = p.student_id \
         JOIN workload_reports.classes c ON c.id = p.class_id \
         JOIN workload_reports.activities a ON a.id = p.activity_id",
    );

    let mut clauses = Vec::new();
    let mut placeholder = 0;
    let mut next = || {
        placeholder += 1;
        placeholder
    };

    if filters.class_id.is_some() {
        clauses.push(format!("c.id = ${}", next()));
    }
    if filters.teacher_id.is_some() {
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM workload_reports.class_teachers ct \
             WHERE ct.class_id = c.id AND ct.teacher_id = ${})",
            next()
        ));
    }
    if filters.activity_id.is_some() {
        clauses.push(format!("a.id = ${}", next()));
    }
    if filters.attended.is_some() {
        clauses.push(format!("p.attended = ${}", next()));
    }
    if filters.concept.is_some() {
        clauses.push(format!("p.concept = ${}", next()));
    }

    if !clauses.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&clauses.join(" AND "));
    }
    query.push_str(" ORDER BY s.full_name, p.id");
    query
}

fn participation_from_row(row: &PgRow) -> ParticipationRecord {
    let grade: Option<f64> = row.get("grade");
    ParticipationRecord {
        student_id: row.get("student_id"),
        student_name: row.get("full_name"),
        email: row.get("email"),
        class_name: row.get("class_name"),
        activity_name: row.get("activity_name"),
        activity_type: row.get("activity_type"),
        attended: row.get("attended"),
        duration_text: row.get("hours"),
        grade,
        concept: row.get("concept"),
        status: EvaluationStatus::from_grade(grade),
    }
}

#[async_trait]
impl ReportSource for PgReportSource {
    async fn fetch_participation(
        &self,
        filters: &ParticipationFilters,
    ) -> Result<Vec<ParticipationRecord>> {
        let sql = participation_query(filters);
        let mut query = sqlx::query(&sql);

        if let Some(value) = filters.class_id {
            query = query.bind(value);
        }
        if let Some(value) = filters.teacher_id {
            query = query.bind(value);
        }
        if let Some(value) = filters.activity_id {
            query = query.bind(value);
        }
        if let Some(value) = filters.attended {
            query = query.bind(value);
        }
        if let Some(value) = &filters.concept {
            query = query.bind(value);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let records: Vec<ParticipationRecord> = rows
            .iter()
            .map(participation_from_row)
            .filter(|record| filters.matches_status(record.status))
            .collect();

        debug!(fetched = rows.len(), kept = records.len(), "participation rows loaded");
        Ok(records)
    }

    async fn fetch_students(&self) -> Result<Vec<StudentRecord>> {
        let rows = sqlx::query("SELECT id, full_name, email FROM workload_reports.students ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| StudentRecord {
                id: row.get("id"),
                name: row.get("full_name"),
                email: row.get("email"),
            })
            .collect())
    }
}

/// Report metadata persisted in `workload_reports.report_records`.
#[derive(Debug, Clone)]
pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn report_from_row(row: &PgRow) -> ReportRecord {
    ReportRecord {
        id: row.get("id"),
        kind: row.get("kind"),
        file_name: row.get("file_name"),
        file_path: row.get("file_path"),
        size_bytes: row.get("size_bytes"),
        filters: row.get("filters"),
        statistics: row.get("statistics"),
        downloads: row.get("downloads"),
        last_download_at: row.get("last_download_at"),
        created_at: row.get("created_at"),
    }
}

const REPORT_COLUMNS: &str = "id, kind, file_name, file_path, size_bytes, filters, statistics, \
                              downloads, last_download_at, created_at";

#[async_trait]
impl ReportStore for PgReportStore {
    async fn save(&self, record: NewReportRecord) -> Result<i64> {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO workload_reports.report_records
            (kind, file_name, file_path, size_bytes, filters, statistics)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&record.kind)
        .bind(&record.file_name)
        .bind(&record.file_path)
        .bind(record.size_bytes)
        .bind(&record.filters)
        .bind(&record.statistics)
        .fetch_one(&self.pool)
        .await?
        .get("id");

        Ok(id)
    }

    async fn list(&self, filter: &ReportListFilter) -> Result<Vec<ReportRecord>> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM workload_reports.report_records \
             WHERE ($1::text IS NULL OR kind = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.kind.as_deref())
            .bind(filter.effective_limit())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(report_from_row).collect())
    }

    async fn get(&self, id: i64) -> Result<Option<ReportRecord>> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM workload_reports.report_records WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(report_from_row))
    }

    async fn increment_download(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workload_reports.report_records
            SET downloads = downloads + 1, last_download_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workload_reports.report_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

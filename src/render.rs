use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ParticipationFilters, StudentStatistics};

/// Output format for a statistics artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum ReportFormat {
    #[default]
    Spreadsheet,
    Document,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Spreadsheet => "csv",
            Self::Document => "md",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub filters: ParticipationFilters,
}

impl ReportMeta {
    pub fn new(title: impl Into<String>, filters: ParticipationFilters) -> Self {
        Self {
            title: title.into(),
            generated_at: Utc::now(),
            filters,
        }
    }
}

const SPREADSHEET_HEADERS: [&str; 19] = [
    "ID",
    "Student",
    "Email",
    "Class",
    "Total Hours",
    "Real Hours",
    "Simulated Hours",
    "% Real",
    "% Simulated",
    "Activities (Real)",
    "Activities (Sim)",
    "Shifts",
    "Practices (Real)",
    "Practices (Sim)",
    "Certificates (Real)",
    "Certificates (Sim)",
    "Activities Attended",
    "Attendances",
    "Attendance %",
];

const DOCUMENT_ROWS_PER_PAGE: usize = 25;

pub fn render(
    format: ReportFormat,
    students: &[StudentStatistics],
    meta: &ReportMeta,
) -> Result<Vec<u8>> {
    match format {
        ReportFormat::Spreadsheet => render_spreadsheet(students),
        ReportFormat::Document => Ok(render_document(students, meta).into_bytes()),
    }
}

fn render_spreadsheet(students: &[StudentStatistics]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(SPREADSHEET_HEADERS)?;

    for student in students {
        let categories = &student.categories;
        let participation = &student.participation;
        writer.write_record([
            student.student_id.to_string(),
            student.name.clone(),
            student.email.clone(),
            student.class_name.clone(),
            student.total_duration.clone(),
            student.real_duration.clone(),
            student.simulated_duration.clone(),
            format!("{:.1}", student.percent_real),
            format!("{:.1}", student.percent_simulated),
            categories.activities_real.clone(),
            categories.activities_simulated.clone(),
            categories.shifts.clone(),
            categories.practices_real.clone(),
            categories.practices_simulated.clone(),
            categories.certificates_real.clone(),
            categories.certificates_simulated.clone(),
            participation.activity_count.to_string(),
            participation.attendance_count.to_string(),
            format!("{:.1}", participation.attendance_rate_percent),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|err| crate::error::ReportError::Render(err.to_string()))
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

fn write_table_header(output: &mut String) {
    let _ = writeln!(
        output,
        "| Student | Class | Total | Real | Simulated | % Real | Activities | Attendances | Freq % |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|---|---|");
}

/// Paginated text document; the table header repeats on every page.
fn render_document(students: &[StudentStatistics], meta: &ReportMeta) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {}", meta.title);
    let _ = writeln!(output, "Generated at {}", meta.generated_at.to_rfc3339());
    if let Some(class_id) = meta.filters.class_id {
        let _ = writeln!(output, "Class {class_id}");
    }
    let _ = writeln!(output);

    if students.is_empty() {
        let _ = writeln!(output, "No participation recorded for these filters.");
        return output;
    }

    for (page, chunk) in students.chunks(DOCUMENT_ROWS_PER_PAGE).enumerate() {
        if page > 0 {
            let _ = writeln!(output);
            let _ = writeln!(output, "---");
            let _ = writeln!(output);
        }
        let _ = writeln!(output, "## Page {}", page + 1);
        write_table_header(&mut output);

        for student in chunk {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {:.1}% | {} | {} | {:.1}% |",
                truncate(&student.name, 20),
                truncate(&student.class_name, 15),
                student.total_duration,
                student.real_duration,
                student.simulated_duration,
                student.percent_real,
                student.participation.activity_count,
                student.participation.attendance_count,
                student.participation.attendance_rate_percent
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_by_student;
    use crate::source::memory::record;

    fn students(count: i64) -> Vec<StudentStatistics> {
        let rows: Vec<_> = (1..=count)
            .map(|id| record(id, id % 2 == 0, "02:00:00", Some(7.0)))
            .collect();
        aggregate_by_student(&rows)
    }

    #[test]
    fn spreadsheet_has_header_and_one_line_per_student() {
        let meta = ReportMeta::new("Class report", ParticipationFilters::for_class(1));
        let bytes = render(ReportFormat::Spreadsheet, &students(3), &meta).unwrap();

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        assert_eq!(reader.headers().unwrap().len(), SPREADSHEET_HEADERS.len());
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[0][0], "1");
        assert_eq!(&records[0][4], "02:00:00");
        assert_eq!(&records[0][7], "60.0");
        assert_eq!(&records[1][18], "100.0");
    }

    #[test]
    fn document_repeats_header_per_page() {
        let meta = ReportMeta::new("Workload", ParticipationFilters::for_class(4));
        let bytes = render(ReportFormat::Document, &students(30), &meta).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("# Workload\n"));
        assert!(text.contains("Class 4"));
        assert!(text.contains("## Page 1"));
        assert!(text.contains("## Page 2"));
        assert!(!text.contains("## Page 3"));
        assert_eq!(text.matches("| Student | Class |").count(), 2);
    }

    #[test]
    fn document_truncates_long_names() {
        let mut stats = students(1);
        stats[0].name = "Maximiliano Bartholomew Fontaine".to_string();
        let meta = ReportMeta::new("Workload", ParticipationFilters::default());
        let text = String::from_utf8(render(ReportFormat::Document, &stats, &meta).unwrap()).unwrap();

        assert!(text.contains("| Maximiliano Bartholo |"));
    }

    #[test]
    fn empty_document_says_so() {
        let meta = ReportMeta::new("Workload", ParticipationFilters::default());
        let text = String::from_utf8(render(ReportFormat::Document, &[], &meta).unwrap()).unwrap();
        assert!(text.contains("No participation recorded"));
    }
}

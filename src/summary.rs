use serde::Serialize;

use crate::aggregate::{aggregate_by_student, percent, round1, round2};
use crate::duration::{format_duration, format_duration_secs, parse_duration};
use crate::models::{EvaluationStatus, ParticipationRecord, StudentStatistics};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoursDistribution {
    pub real: String,
    pub simulated: String,
    pub percent_real: f64,
    pub percent_simulated: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryMeta {
    pub total_students: usize,
    pub total_participations: usize,
    pub average_activities_per_student: f64,
    pub average_grade: f64,
    pub attendance_rate_percent: f64,
    pub approved: usize,
    pub failed: usize,
    pub average_hours: String,
    pub hours_distribution: HoursDistribution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub meta: SummaryMeta,
    pub students: Vec<StudentStatistics>,
}

/// Class-level summary over a set of participation rows plus the per-student breakdown.
pub fn summarize(rows: &[ParticipationRecord]) -> ReportSummary {
    let students = aggregate_by_student(rows);
    let total = rows.len();
    let unique = students.len();

    let grades: Vec<f64> = rows.iter().filter_map(|row| row.grade).collect();
    let average_grade = if grades.is_empty() {
        0.0
    } else {
        round2(grades.iter().sum::<f64>() / grades.len() as f64)
    };

    let attended = rows.iter().filter(|row| row.attended).count();
    let approved = rows
        .iter()
        .filter(|row| row.status == EvaluationStatus::Approved)
        .count();
    let failed = rows
        .iter()
        .filter(|row| row.status == EvaluationStatus::Failed)
        .count();

    let average_activities_per_student = if unique == 0 {
        0.0
    } else {
        round1(total as f64 / unique as f64)
    };

    let total_seconds: i64 = students
        .iter()
        .map(|student| parse_duration(&student.total_duration))
        .sum();
    let average_hours = if unique == 0 {
        format_duration(0)
    } else {
        format_duration_secs(total_seconds as f64 / unique as f64)
    };

    let real: i64 = students
        .iter()
        .map(|student| parse_duration(&student.real_duration))
        .sum();
    let simulated: i64 = students
        .iter()
        .map(|student| parse_duration(&student.simulated_duration))
        .sum();
    let combined = (real + simulated) as f64;

    ReportSummary {
        meta: SummaryMeta {
            total_students: unique,
            total_participations: total,
            average_activities_per_student,
            average_grade,
            attendance_rate_percent: percent(attended as f64, total as f64),
            approved,
            failed,
            average_hours,
            hours_distribution: HoursDistribution {
                real: format_duration(real),
                simulated: format_duration(simulated),
                percent_real: percent(real as f64, combined),
                percent_simulated: percent(simulated as f64, combined),
            },
        },
        students,
    }
}

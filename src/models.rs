use std::fmt;

use serde::{Deserialize, Serialize};

/// Evaluation outcome derived from a participation grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationStatus {
    Pending,
    Approved,
    Failed,
}

impl EvaluationStatus {
    pub const PASSING_GRADE: f64 = 6.0;

    pub fn from_grade(grade: Option<f64>) -> Self {
        match grade {
            None => Self::Pending,
            Some(value) if value >= Self::PASSING_GRADE => Self::Approved,
            Some(_) => Self::Failed,
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Approved => write!(f, "Approved"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl std::str::FromStr for EvaluationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown evaluation status `{other}`")),
        }
    }
}

/// One student's participation in one activity, as returned by the data store.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipationRecord {
    pub student_id: i64,
    pub student_name: String,
    pub email: String,
    pub class_name: String,
    pub activity_name: String,
    pub activity_type: String,
    pub attended: bool,
    pub duration_text: String,
    pub grade: Option<f64>,
    pub concept: Option<String>,
    pub status: EvaluationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// Query criteria understood by the report source. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attended: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EvaluationStatus>,
}

impl ParticipationFilters {
    pub fn for_class(class_id: i64) -> Self {
        Self {
            class_id: Some(class_id),
            ..Self::default()
        }
    }

    pub fn matches_status(&self, status: EvaluationStatus) -> bool {
        self.status.map_or(true, |wanted| wanted == status)
    }
}

/// Parses the loose attendance flag accepted from callers.
pub fn parse_attended_flag(value: &str) -> bool {
    matches!(value.trim(), "true" | "Present")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryHours {
    pub activities_real: String,
    pub activities_simulated: String,
    pub shifts: String,
    pub practices_real: String,
    pub practices_simulated: String,
    pub certificates_real: String,
    pub certificates_simulated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationStats {
    pub activity_count: u64,
    pub attendance_count: u64,
    pub attendance_rate_percent: f64,
}

/// Aggregated workload statistics for one student.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatistics {
    pub student_id: i64,
    pub name: String,
    pub email: String,
    pub class_name: String,
    pub total_duration: String,
    pub real_duration: String,
    pub simulated_duration: String,
    pub percent_real: f64,
    pub percent_simulated: f64,
    pub categories: CategoryHours,
    pub participation: ParticipationStats,
}

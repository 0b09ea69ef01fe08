use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::models::{parse_attended_flag, EvaluationStatus, ParticipationFilters};
use crate::queue::DEFAULT_RETAIN_FINISHED;
use crate::worker::WorkerSettings;

#[derive(Debug, Clone, Args)]
pub struct DatabaseArgs {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Args)]
pub struct StorageArgs {
    /// Directory where generated artifacts are written
    #[arg(long, env = "STORAGE_DIR", default_value = "./storage")]
    pub storage_dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    #[arg(long, env = "JOB_CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,
    /// Hard limit for a single job attempt
    #[arg(long, env = "JOB_TIMEOUT_MS", default_value_t = 600_000)]
    pub timeout_ms: u64,
    #[arg(long, env = "JOB_ATTEMPTS", default_value_t = 3)]
    pub attempts: u32,
    /// Base retry delay, multiplied by the attempts made so far
    #[arg(long, env = "JOB_BACKOFF_MS", default_value_t = 15_000)]
    pub backoff_ms: u64,
    /// Completed or failed jobs kept in memory for inspection
    #[arg(long, env = "JOB_RETAIN_FINISHED", default_value_t = DEFAULT_RETAIN_FINISHED)]
    pub retain_finished: usize,
}

impl WorkerArgs {
    pub fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            concurrency: self.concurrency.max(1),
            timeout: Duration::from_millis(self.timeout_ms),
            max_attempts: self.attempts.max(1),
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    #[arg(long)]
    pub class_id: Option<i64>,
    #[arg(long)]
    pub teacher_id: Option<i64>,
    #[arg(long)]
    pub activity_id: Option<i64>,
    /// `true` or `Present` selects attended rows; any other value selects absences
    #[arg(long)]
    pub attended: Option<String>,
    #[arg(long)]
    pub concept: Option<String>,
    /// Pending, Approved or Failed
    #[arg(long)]
    pub status: Option<EvaluationStatus>,
}

impl FilterArgs {
    pub fn filters(&self) -> ParticipationFilters {
        ParticipationFilters {
            class_id: self.class_id,
            teacher_id: self.teacher_id,
            activity_id: self.activity_id,
            attended: self
                .attended
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(parse_attended_flag),
            concept: self.concept.clone().filter(|value| !value.is_empty()),
            status: self.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_settings_clamp_to_one() {
        let args = WorkerArgs {
            concurrency: 0,
            timeout_ms: 250,
            attempts: 0,
            backoff_ms: 10,
            retain_finished: DEFAULT_RETAIN_FINISHED,
        };
        let settings = args.settings();
        assert_eq!(settings.concurrency, 1);
        assert_eq!(settings.max_attempts, 1);
        assert_eq!(settings.timeout, Duration::from_millis(250));
        assert_eq!(settings.retry_policy().delay_for(2), Duration::from_millis(20));
    }

    #[test]
    fn empty_filter_values_are_ignored() {
        let args = FilterArgs {
            attended: Some(String::new()),
            concept: Some(String::new()),
            ..FilterArgs::default()
        };
        assert_eq!(args.filters(), ParticipationFilters::default());

        let args = FilterArgs {
            class_id: Some(2),
            attended: Some("Present".to_string()),
            ..FilterArgs::default()
        };
        let filters = args.filters();
        assert_eq!(filters.class_id, Some(2));
        assert_eq!(filters.attended, Some(true));
    }
}

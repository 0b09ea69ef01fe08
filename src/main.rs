use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod config;
mod db;
mod duration;
mod error;
mod generator;
mod models;
mod queue;
mod render;
mod source;
mod storage;
mod store;
mod summary;
mod worker;

use config::{DatabaseArgs, FilterArgs, StorageArgs, WorkerArgs};
use queue::{ClassReportParams, JobPayload, JobQueue, JobStatus, SyntheticLoadParams};
use render::ReportFormat;
use store::{ReportListFilter, ReportStore};

#[derive(Parser)]
#[command(name = "workload-reports")]
#[command(about = "Student workload statistics and report generation", long_about = None)]
struct Cli {
    #[command(flatten)]
    database: DatabaseArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Print per-student statistics and class totals as JSON
    Summary {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Render statistics straight to a file
    Export {
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long, value_enum, default_value_t = ReportFormat::Spreadsheet)]
        format: ReportFormat,
        #[arg(long, default_value = "Student workload report")]
        title: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Queue a report job and run workers until it finishes
    Generate {
        #[command(flatten)]
        worker: WorkerArgs,
        #[command(flatten)]
        storage: StorageArgs,
        /// Only print the final job snapshot
        #[arg(long)]
        quiet: bool,
        #[command(subcommand)]
        job: JobCommand,
    },
    /// Inspect generated reports
    Reports {
        #[command(subcommand)]
        command: ReportsCommand,
    },
}

#[derive(Subcommand)]
enum JobCommand {
    /// Student roster
    Roster,
    /// Workload statistics for one class
    Class {
        #[arg(long)]
        class_id: i64,
        #[arg(long, value_enum, default_value_t = ReportFormat::Spreadsheet)]
        format: ReportFormat,
        #[arg(long)]
        title: Option<String>,
    },
    /// Large generated spreadsheet for load testing
    Load {
        #[arg(long, default_value_t = 20_000)]
        rows: usize,
        #[arg(long, default_value_t = 10)]
        columns: usize,
        #[arg(long, default_value = "Synthetic load report")]
        title: String,
    },
}

impl JobCommand {
    fn payload(self) -> JobPayload {
        match self {
            Self::Roster => JobPayload::Roster,
            Self::Class {
                class_id,
                format,
                title,
            } => JobPayload::ClassReport(ClassReportParams {
                class_id,
                format,
                title,
            }),
            Self::Load {
                rows,
                columns,
                title,
            } => JobPayload::SyntheticLoad(SyntheticLoadParams {
                row_count: rows,
                column_count: columns,
                title,
            }),
        }
    }
}

#[derive(Subcommand)]
enum ReportsCommand {
    List {
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    Get {
        id: i64,
    },
    /// Copy the artifact out and count the download
    Download {
        id: i64,
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        storage: StorageArgs,
    },
    Delete {
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(cli.database.max_connections)
        .connect(&cli.database.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Summary { filters } => {
            let source = db::PgReportSource::new(pool.clone());
            let summary = generator::class_summary(&source, &filters.filters()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Export {
            filters,
            format,
            title,
            out,
        } => {
            let source = db::PgReportSource::new(pool.clone());
            let bytes = generator::export(&source, &filters.filters(), format, &title).await?;
            tokio::fs::write(&out, &bytes)
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {} ({} bytes).", out.display(), bytes.len());
        }
        Commands::Generate {
            worker,
            storage,
            quiet,
            job,
        } => run_job(pool.clone(), &worker, &storage, quiet, job.payload()).await?,
        Commands::Reports { command } => {
            let store = db::PgReportStore::new(pool.clone());
            run_reports(&store, command).await?;
        }
    }

    Ok(())
}

async fn run_job(
    pool: sqlx::PgPool,
    worker: &WorkerArgs,
    storage: &StorageArgs,
    quiet: bool,
    payload: JobPayload,
) -> anyhow::Result<()> {
    let settings = worker.settings();
    let artifacts = storage::ArtifactStore::new(&storage.storage_dir);
    artifacts
        .ensure_dir()
        .await
        .with_context(|| format!("failed to create {}", artifacts.root().display()))?;
    artifacts
        .sweep_partial()
        .await
        .context("failed to clean partial artifacts")?;

    let handler = Arc::new(generator::ReportGenerator::new(
        Arc::new(db::PgReportSource::new(pool.clone())),
        Arc::new(db::PgReportStore::new(pool)),
        artifacts,
    ));
    let queue = Arc::new(JobQueue::new(settings.retry_policy()).with_retention(worker.retain_finished));

    // Workers start after the subscription exists, so no event for this job is missed.
    let job_id = queue.enqueue(payload).await?;
    let mut events = queue.subscribe_job(job_id);
    let workers = worker::WorkerPool::spawn(Arc::clone(&queue), handler, &settings);

    let terminal = if quiet {
        events.wait_terminal().await
    } else {
        let mut terminal = None;
        while let Some(event) = events.recv().await {
            println!("{}", serde_json::to_string(&event)?);
            if event.status.is_terminal() {
                terminal = Some(event);
                break;
            }
        }
        terminal
    };
    let terminal = terminal.context("job event stream closed before the job finished")?;

    workers.shutdown().await;
    queue.close().await;

    let counts = queue.counts().await;
    info!(
        completed = counts.completed,
        failed = counts.failed,
        waiting = counts.waiting,
        "queue drained"
    );
    if let Some(job) = queue.get(job_id).await {
        println!("{}", serde_json::to_string_pretty(&job)?);
    }

    if terminal.status == JobStatus::Failed {
        let message = terminal
            .error
            .map(|failure| failure.message)
            .unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!("job {job_id} failed: {message}");
    }
    Ok(())
}

async fn run_reports(store: &dyn ReportStore, command: ReportsCommand) -> anyhow::Result<()> {
    match command {
        ReportsCommand::List { kind, limit } => {
            let records = store.list(&ReportListFilter { kind, limit }).await?;
            if records.is_empty() {
                println!("No reports recorded.");
                return Ok(());
            }
            for record in &records {
                println!(
                    "- #{} {} {} ({} bytes, {} downloads, {})",
                    record.id,
                    record.kind,
                    record.file_name,
                    record.size_bytes,
                    record.downloads,
                    record.created_at
                );
            }
        }
        ReportsCommand::Get { id } => match store.get(id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("Report {id} not found."),
        },
        ReportsCommand::Download { id, out, storage } => {
            let record = store
                .get(id)
                .await?
                .with_context(|| format!("report {id} not found"))?;
            let bytes = storage::ArtifactStore::new(&storage.storage_dir)
                .read(&record.file_name)
                .await
                .with_context(|| format!("failed to read {}", record.file_path))?;
            tokio::fs::write(&out, &bytes)
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            store.increment_download(id).await?;
            println!("Report {id} copied to {}.", out.display());
        }
        ReportsCommand::Delete { id } => {
            if store.delete(id).await? {
                println!("Report {id} deleted.");
            } else {
                println!("Report {id} not found.");
            }
        }
    }
    Ok(())
}

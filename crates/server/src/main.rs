//! Sales Insight: restaurant sales analytics with ML factor reports
//!
//! Usage:
//!   sales-insight import-stats exports/stats.csv --restaurants exports/restaurants.csv
//!   sales-insight build-dataset                 # rebuild the merged daily dataset
//!   sales-insight train                         # fit candidates, persist the champion
//!   sales-insight serve --port 8000             # HTTP API
//!   sales-insight report --period 2025-01-01_2025-01-31 --restaurant-id 1
//!   sales-insight worker                        # process dataset refresh jobs

mod config;
mod routes;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::AppConfig;
use engine::{
    dataset_hash, import_platform_stats, import_restaurants, read_dataset, run_worker, train,
    DatasetBuilder, JobQueue, Period, ReportService, SqliteJobQueue, TrainConfig, WorkerConfig,
    WorkerProgress,
};
use persistence::repository::StatsRepository;
use persistence::Database;
use routes::{build_router, AppState};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "sales-insight")]
#[command(about = "Restaurant sales analytics with ML factor reports", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },
    /// Import a platform stats CSV export (enqueues a dataset refresh)
    ImportStats {
        /// Platform stats CSV
        file: PathBuf,
        /// Restaurants CSV (id,name,latitude,longitude) imported first
        #[arg(long)]
        restaurants: Option<PathBuf>,
    },
    /// Rebuild the merged daily dataset
    BuildDataset {
        /// First day (YYYY-MM-DD); defaults to the earliest stored day
        #[arg(long, requires = "end")]
        start: Option<NaiveDate>,
        /// Last day (YYYY-MM-DD); defaults to the latest stored day
        #[arg(long, requires = "start")]
        end: Option<NaiveDate>,
        /// Use cached weather and holidays only
        #[arg(long)]
        offline: bool,
    },
    /// Train candidate models on the merged dataset and persist the champion
    Train,
    /// Print the text report for one restaurant and period
    Report {
        /// YYYY-MM-DD_YYYY-MM-DD
        #[arg(long)]
        period: String,
        #[arg(long)]
        restaurant_id: i64,
        /// Print the JSON summary instead of text
        #[arg(long)]
        json: bool,
    },
    /// Process dataset refresh jobs until Ctrl+C
    Worker {
        /// Seconds between polls of an empty queue
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
        /// Exit once the queue is empty
        #[arg(long)]
        drain: bool,
        /// Use cached weather and holidays only
        #[arg(long)]
        offline: bool,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,sales_insight=debug")
    } else {
        EnvFilter::new("info,engine=info,persistence=info,sales_insight=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(&config, &host, port).await?,
        Commands::ImportStats { file, restaurants } => {
            cmd_import(&config, file, restaurants).await?
        }
        Commands::BuildDataset {
            start,
            end,
            offline,
        } => cmd_build_dataset(&config, start.zip(end), offline).await?,
        Commands::Train => cmd_train(&config).await?,
        Commands::Report {
            period,
            restaurant_id,
            json,
        } => cmd_report(&config, &period, restaurant_id, json).await?,
        Commands::Worker {
            poll_secs,
            drain,
            offline,
        } => cmd_worker(&config, poll_secs, drain, offline).await?,
    }

    Ok(())
}

async fn open_db(config: &AppConfig) -> anyhow::Result<Database> {
    let db = Database::new(&config.db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", config.db_path.display());
    Ok(db)
}

async fn restaurant_names(db: &Database) -> anyhow::Result<BTreeMap<i64, String>> {
    Ok(StatsRepository::new(db.pool())
        .get_restaurants()
        .await?
        .into_iter()
        .map(|r| (r.id, r.name))
        .collect())
}

async fn load_service(config: &AppConfig) -> anyhow::Result<ReportService> {
    let db = open_db(config).await?;
    let names = restaurant_names(&db).await?;
    let dataset = config.dataset_path.clone();
    let artifacts = config.artifact_dir.clone();
    tokio::task::spawn_blocking(move || ReportService::load(&dataset, &artifacts, names)).await?
}

// ============================================================================
// Serve command: Axum web server
// ============================================================================

async fn cmd_serve(config: &AppConfig, host: &str, port: u16) -> anyhow::Result<()> {
    info!("Sales Insight v{} starting...", APP_VERSION);

    let service = load_service(config).await?;
    if !service.model_available() {
        info!("No model artifact yet; section 8 will report ML as unavailable");
    }
    let app = build_router(AppState {
        service: Arc::new(service),
    });

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Sales Insight v{} ===", APP_VERSION);
    println!("API:       http://{}/report", addr);
    println!("Dataset:   {}", config.dataset_path.display());
    println!("Artifacts: {}", config.artifact_dir.display());
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Data commands
// ============================================================================

async fn cmd_import(
    config: &AppConfig,
    file: PathBuf,
    restaurants: Option<PathBuf>,
) -> anyhow::Result<()> {
    let db = open_db(config).await?;
    if let Some(path) = restaurants {
        let n = import_restaurants(db.pool(), &path).await?;
        println!("Restaurants imported: {}", n);
    }
    let rows = import_platform_stats(db.pool(), &file).await?;
    println!("Platform rows upserted: {} (dataset refresh queued)", rows);
    Ok(())
}

async fn cmd_build_dataset(
    config: &AppConfig,
    range: Option<(NaiveDate, NaiveDate)>,
    offline: bool,
) -> anyhow::Result<()> {
    let db = open_db(config).await?;
    let builder = DatasetBuilder::new(
        db.pool_clone(),
        config.sources(offline),
        config.dataset_path.clone(),
    );
    let summary = builder.build(range).await?;
    println!(
        "Dataset written: {} ({} rows, {} restaurants, {} — {})",
        summary.path.display(),
        summary.rows,
        summary.restaurants,
        summary.start,
        summary.end
    );
    println!("SHA-256: {}", summary.sha256);
    Ok(())
}

async fn cmd_train(config: &AppConfig) -> anyhow::Result<()> {
    let dataset = config.dataset_path.clone();
    let artifacts = config.artifact_dir.clone();

    let artifact = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let records = read_dataset(&dataset)
            .with_context(|| format!("reading dataset {}", dataset.display()))?;
        let sha = dataset_hash(&dataset)?;
        Ok(train(&records, &sha, &artifacts, &TrainConfig::default())?)
    })
    .await??;

    let metrics = &artifact.metrics;
    println!("\n=== Training run {} ===", metrics.run_id);
    println!(
        "Rows: {} ({} — {})",
        metrics.rows, metrics.date_start, metrics.date_end
    );
    for c in &metrics.candidates {
        let marker = if c.kind == metrics.champion { "*" } else { " " };
        println!(
            "{} {:<18} MAE {:>14.0}  R² {:>6.3}  (train {}, valid {})",
            marker, c.kind, c.mae, c.r2, c.n_train, c.n_valid
        );
    }
    println!("Champion: {}", metrics.champion);
    Ok(())
}

async fn cmd_report(
    config: &AppConfig,
    period: &str,
    restaurant_id: i64,
    json: bool,
) -> anyhow::Result<()> {
    let period: Period = period.parse()?;
    let service = load_service(config).await?;

    let output = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        if json {
            Ok(serde_json::to_string_pretty(&service.summary(restaurant_id, &period)?)?)
        } else {
            Ok(service.report_text(restaurant_id, &period)?)
        }
    })
    .await??;
    println!("{}", output);
    Ok(())
}

// ============================================================================
// Worker command: dataset refresh queue
// ============================================================================

async fn cmd_worker(
    config: &AppConfig,
    poll_secs: u64,
    drain: bool,
    offline: bool,
) -> anyhow::Result<()> {
    let db = open_db(config).await?;
    let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::new(db.pool_clone()));
    let handler = Arc::new(DatasetBuilder::new(
        db.pool_clone(),
        config.sources(offline),
        config.dataset_path.clone(),
    ));
    let progress = Arc::new(WorkerProgress::new());

    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, stopping worker...");
        progress_for_ctrlc.cancel();
    });

    let worker_config = WorkerConfig {
        poll_interval: Duration::from_secs(poll_secs.max(1)),
        drain,
        ..Default::default()
    };
    run_worker(queue, handler, worker_config, progress).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_carries_a_revision() {
        let rev = APP_VERSION
            .strip_prefix(concat!(env!("CARGO_PKG_VERSION"), "-"))
            .unwrap();
        assert!(!rev.is_empty());
        assert!(!rev.contains(char::is_whitespace));
    }
}

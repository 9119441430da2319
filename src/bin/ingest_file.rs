use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use trip_processor::db::run_migrations;
use trip_processor::ingest::{
    IngestService, MemoryObjectCache, PgBatchSink, Pipeline, PipelineConfig,
};
use trip_processor::models::ProcessFileResponse;
use trip_processor::zones::{PgZoneSource, ZoneCache, cache::DEFAULT_MAX_COST};

#[derive(Parser, Debug)]
#[command(
    name = "ingest-file",
    about = "Load a local NYC trip file (.csv, .txt or .tar.gz) into Postgres"
)]
struct Args {
    /// Postgres connection string; falls back to DB_URL.
    #[arg(long)]
    database_url: Option<String>,

    /// File to ingest. The suffix selects the format.
    path: PathBuf,

    /// Parser workers (defaults to the number of CPUs).
    #[arg(long)]
    parser_workers: Option<usize>,

    #[arg(long, default_value_t = 3)]
    loader_workers: usize,

    #[arg(long, default_value_t = 100)]
    queue_capacity: usize,

    /// Rows per bulk-load transaction.
    #[arg(long, default_value_t = 1000)]
    batch_size: usize,

    /// Apply pending migrations before loading.
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let Some(file_name) = args
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
    else {
        writeln!(io::stderr(), "error: {} is not a file", args.path.display())?;
        std::process::exit(2);
    };

    let database_url = match args.database_url {
        Some(url) => url,
        None => std::env::var("DB_URL")?,
    };
    let pool = PgPoolOptions::new()
        .max_connections(args.loader_workers.max(1) as u32 + 1)
        .connect(&database_url)
        .await?;

    if args.migrate {
        run_migrations(&pool).await?;
    }

    let zones = ZoneCache::new(DEFAULT_MAX_COST);
    let summary = zones.load(&PgZoneSource::new(pool.clone())).await?;
    log::info!("loaded {} zones", summary.loaded);

    let objects = Arc::new(MemoryObjectCache::new());
    objects.insert(file_name.clone(), tokio::fs::read(&args.path).await?);

    let config = PipelineConfig {
        parser_workers: args.parser_workers.unwrap_or_else(num_cpus::get).max(1),
        loader_workers: args.loader_workers.max(1),
        queue_capacity: args.queue_capacity.max(1),
        batch_size: args.batch_size.max(1),
    };
    let shutdown = CancellationToken::new();
    let service = IngestService::new(
        objects,
        Pipeline::new(config, zones, Arc::new(PgBatchSink::new(pool))),
        shutdown.clone(),
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, cancelling ingest");
            shutdown.cancel();
        }
    });

    let report = service
        .process_file(&file_name, &args.path.display().to_string())
        .await?;

    let response = ProcessFileResponse::from(report);
    writeln!(io::stdout(), "{}", serde_json::to_string_pretty(&response)?)?;
    Ok(())
}

//! Bucket Aggregator Binary - one invocation per CDC batch
//!
//! Reads a batch of stream notifications, recounts every affected partition
//! from the `records` table and overwrites its rows in `metric_buckets`.
//! The invocation summary is printed to stdout as JSON.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin bucket_aggregator -- --batch batch.json
//! cat batch.json | cargo run --release --bin bucket_aggregator
//! ```
//!
//! ## Environment Variables
//!
//! - BUCKETFLOW_DB_PATH - SQLite database path (default: data/bucketflow.db)
//! - PARTITION_CONCURRENCY - Partitions processed in parallel (default: 4)
//! - RECORD_PAGE_SIZE - Records per source page (default: 1000)
//! - INVOCATION_TIMEOUT_MS - Deadline for the whole invocation (optional)
//! - RECORD_FILTER - Only count records where `field=value` (optional)
//! - RUST_LOG - Logging level (optional, default: info)

use bucketflow::{AggregatorConfig, CdcBatch, Orchestrator, SqliteBucketSink, SqliteRecordSource};
use std::env;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

fn parse_batch_path_from_args() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    args.iter()
        .position(|x| x == "--batch")
        .and_then(|idx| args.get(idx + 1))
        .filter(|path| path.as_str() != "-")
        .cloned()
}

async fn read_batch(path: Option<&str>) -> Result<String, std::io::Error> {
    match path {
        Some(path) => tokio::fs::read_to_string(path).await,
        None => {
            let mut input = String::new();
            tokio::io::stdin().read_to_string(&mut input).await?;
            Ok(input)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    dotenv::dotenv().ok();

    let config = AggregatorConfig::from_env();
    let batch_path = parse_batch_path_from_args();

    log::info!("🚀 Starting Bucket Aggregator");
    log::info!("   Database: {}", config.db_path);
    log::info!("   Batch: {}", batch_path.as_deref().unwrap_or("<stdin>"));
    log::info!("   Concurrency: {}", config.max_concurrency);
    log::info!("   Page size: {}", config.page_size);
    if let Some(timeout) = config.invocation_timeout {
        log::info!("   Deadline: {}ms", timeout.as_millis());
    }
    if let Some(filter) = &config.record_filter {
        log::info!("   Record filter: {}={}", filter.field, filter.value);
    }

    let input = read_batch(batch_path.as_deref()).await?;
    let batch = CdcBatch::from_json(&input)?;
    log::info!("📥 Received {} notification(s)", batch.len());

    let source = Arc::new(SqliteRecordSource::new(&config.db_path)?);
    let sink = Arc::new(SqliteBucketSink::new(&config.db_path)?);
    let orchestrator = Orchestrator::from_config(&config, source, sink);

    let summary = match orchestrator.run(&batch).await {
        Ok(summary) => summary,
        Err(e) => {
            log::error!("❌ Invocation failed: {}", e);
            return Err(e.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mr::config::{WorkerConfig, DEFAULT_SOCKET};
use mr::worker::Worker;
use mr::KeyValue;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "MapReduce worker running word count", long_about = None)]
struct Args {
    /// Unix socket of the coordinator
    #[clap(short, long, default_value = DEFAULT_SOCKET)]
    socket: PathBuf,
    /// Directory for intermediate and output files, shared with the other workers
    #[clap(short, long, default_value = ".")]
    work_dir: PathBuf,
    /// Identity reported to the coordinator [default: process id]
    #[clap(long)]
    worker_id: Option<u32>,
    /// Milliseconds to wait when no task is available yet
    #[clap(long, default_value_t = 1000)]
    backoff_ms: u64,
    /// Log at debug level
    #[clap(short, long)]
    verbose: bool,
}

fn map_function(_filename: String, contents: String) -> anyhow::Result<Vec<KeyValue>> {
    Ok(contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .map(|word| KeyValue::new(word, "1"))
        .collect())
}

fn reduce_function(key: String, values: Vec<String>) -> anyhow::Result<String> {
    let mut count = 0u64;
    for item in values {
        count += item
            .parse::<u64>()
            .with_context(|| format!("bad count {:?} for {:?}", item, key))?;
    }
    Ok(count.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("mr={0},worker={0}", default_level))),
        )
        .init();

    let mut config = WorkerConfig {
        work_dir: args.work_dir,
        backoff: Duration::from_millis(args.backoff_ms),
        ..WorkerConfig::default()
    };
    if let Some(id) = args.worker_id {
        config.worker_id = id;
    }

    let mut worker = Worker::new(config, map_function, reduce_function);
    worker
        .start(&args.socket)
        .await
        .with_context(|| format!("cannot reach coordinator at {}", args.socket.display()))?;
    info!("{} started", worker);
    let stats = worker.run().await?;
    info!(
        "{} exiting after {} map and {} reduce tasks",
        worker, stats.maps, stats.reduces
    );
    Ok(())
}

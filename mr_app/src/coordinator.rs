use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mr::config::{CoordinatorConfig, DEFAULT_SOCKET};
use mr::coordinator::{self, Coordinator};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "MapReduce coordinator", long_about = None)]
struct Args {
    /// Number of reduce tasks (R)
    #[clap(short, long, default_value_t = 10)]
    reduce: usize,
    /// Unix socket workers connect to
    #[clap(short, long, default_value = DEFAULT_SOCKET)]
    socket: PathBuf,
    /// Seconds a worker may hold a task before it is reassigned
    #[clap(long, default_value_t = 10)]
    lease_timeout_secs: u64,
    /// How often to check whether the job has finished
    #[clap(long, default_value_t = 1000)]
    poll_interval_ms: u64,
    /// Log at debug level
    #[clap(short, long)]
    verbose: bool,
    /// Input files, one map task each
    files: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("mr={0},coordinator={0}", default_level))),
        )
        .init();

    let config = CoordinatorConfig {
        lease_timeout: Duration::from_secs(args.lease_timeout_secs),
    };
    let job = Coordinator::with_config(args.files, args.reduce, config)?;
    info!(
        "starting job with {} map tasks and {} reduce tasks",
        job.n_map(),
        job.n_reduce()
    );

    coordinator::run(job, &args.socket, Duration::from_millis(args.poll_interval_ms))
        .await
        .with_context(|| format!("coordinator on {} failed", args.socket.display()))?;
    info!("all tasks completed, results are in mr-out-*");
    Ok(())
}

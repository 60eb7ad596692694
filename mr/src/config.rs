use std::path::PathBuf;
use std::time::Duration;

use crate::task::WorkerId;

pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_SOCKET: &str = "/var/tmp/mr-coordinator.sock";

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a worker may hold a task before it is handed to someone else.
    pub lease_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: WorkerId,
    /// Directory holding intermediate and output files, shared by every process.
    pub work_dir: PathBuf,
    /// Pause after a `Wait` reply before asking again.
    pub backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            worker_id: std::process::id(),
            work_dir: PathBuf::from("."),
            backoff: DEFAULT_BACKOFF,
        }
    }
}

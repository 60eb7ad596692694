use std::path::Path;

use tarpc::{client, context, tokio_serde::formats::Json};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::partition::run_map;
use crate::rpc::{ReportAck, RpcClient, TaskReply};
use crate::shuffle::run_reduce;
use crate::task::{TaskId, TaskKind};
use crate::{MapFn, ReduceFn};

/// Tasks this worker completed and reported before the job finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub maps: usize,
    pub reduces: usize,
    pub waits: usize,
}

/// Pulls tasks from the coordinator and runs them one at a time.
pub struct Worker {
    config: WorkerConfig,
    client: Option<RpcClient>,
    map_fn: MapFn,
    reduce_fn: ReduceFn,
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Worker {{ id: {}, work_dir: {} }}",
            self.config.worker_id,
            self.config.work_dir.display()
        )
    }
}

impl Worker {
    pub fn new(config: WorkerConfig, map_fn: MapFn, reduce_fn: ReduceFn) -> Self {
        Worker {
            config,
            client: None,
            map_fn,
            reduce_fn,
        }
    }

    /// Uses an already connected client instead of dialing a socket.
    pub fn with_client(mut self, client: RpcClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn id(&self) -> u32 {
        self.config.worker_id
    }

    /// Connects to the coordinator listening on `socket`.
    pub async fn start(&mut self, socket: &Path) -> Result<()> {
        if self.client.is_some() {
            // already have a client running
            return Ok(());
        }

        let mut transport = tarpc::serde_transport::unix::connect(socket, Json::default);
        transport.config_mut().max_frame_length(usize::MAX);

        let client = RpcClient::new(
            client::Config::default(),
            transport.await.map_err(Error::Transport)?,
        )
        .spawn();
        self.client = Some(client);
        info!("worker {} connected to {}", self.id(), socket.display());
        Ok(())
    }

    /// Requests, executes and reports tasks until the coordinator says `Done`.
    ///
    /// Any RPC failure or failed task attempt ends the loop with an error; the
    /// coordinator hands the unfinished task to someone else once the lease
    /// runs out.
    pub async fn run(&self) -> Result<WorkerStats> {
        let client = self.client.as_ref().ok_or_else(|| {
            Error::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "worker is not connected to a coordinator",
            ))
        })?;
        let worker = self.id();
        let mut stats = WorkerStats::default();

        loop {
            let reply = client.request_task(context::current(), worker).await?;
            match reply {
                TaskReply::Done => {
                    info!("worker {} finished: {:?}", worker, stats);
                    return Ok(stats);
                }
                TaskReply::Wait => {
                    debug!("worker {} waiting {:?}", worker, self.config.backoff);
                    stats.waits += 1;
                    sleep(self.config.backoff).await;
                }
                TaskReply::Map(task) => {
                    info!("worker {} running map task {} on {}", worker, task.task_id, task.input);
                    run_map(
                        &self.config.work_dir,
                        task.task_id,
                        &task.input,
                        task.n_reduce,
                        self.map_fn,
                    )?;
                    self.report(client, task.task_id, TaskKind::Map).await?;
                    stats.maps += 1;
                }
                TaskReply::Reduce(task) => {
                    info!("worker {} running reduce task {}", worker, task.task_id);
                    run_reduce(
                        &self.config.work_dir,
                        task.task_id,
                        task.n_map,
                        self.reduce_fn,
                    )?;
                    self.report(client, task.task_id, TaskKind::Reduce).await?;
                    stats.reduces += 1;
                }
            }
        }
    }

    async fn report(&self, client: &RpcClient, task: TaskId, kind: TaskKind) -> Result<()> {
        let ack = client
            .report_complete(context::current(), self.id(), task, kind)
            .await?;
        match ack {
            ReportAck::Accepted => debug!("{} task {} accepted", kind, task),
            ReportAck::AlreadyCompleted => {
                debug!("{} task {} was already completed elsewhere", kind, task)
            }
            ReportAck::UnknownTask => warn!("coordinator does not know {} task {}", kind, task),
            ReportAck::Premature => warn!("coordinator rejected {} task {} as premature", kind, task),
        }
        Ok(())
    }
}

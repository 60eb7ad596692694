use futures::{future, lock::Mutex, prelude::*};
use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tarpc::{
    client, context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::rpc::{MapAssignment, ReduceAssignment, ReportAck, Rpc, RpcClient, TaskReply};
use crate::task::{Task, TaskId, TaskKind, TaskState, WorkerId};

const MAX_CONNECTIONS: usize = 1024;

/// Phase of the job, always derived from the task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Map,
    Reduce,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    pub maps_done: usize,
    pub n_map: usize,
    pub reduces_done: usize,
    pub n_reduce: usize,
}

// a worker's claim on one task
#[derive(Debug, Clone, Copy)]
struct Lease {
    kind: TaskKind,
    task: TaskId,
    leased_at: Instant,
}

/// The task ledger and scheduler. Not synchronized itself; the server wraps
/// it in a single mutex so every operation sees a consistent ledger.
#[derive(Debug)]
pub struct Coordinator {
    map_tasks: Vec<Task>,
    reduce_tasks: Vec<Task>,
    leases: HashMap<WorkerId, Lease>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(files: Vec<String>, n_reduce: usize) -> Result<Self> {
        Self::with_config(files, n_reduce, CoordinatorConfig::default())
    }

    pub fn with_config(
        files: Vec<String>,
        n_reduce: usize,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        if n_reduce == 0 {
            return Err(Error::InvalidJob(
                "the number of reduce tasks must be at least 1".to_string(),
            ));
        }
        let map_tasks = files
            .into_iter()
            .enumerate()
            .map(|(i, file)| Task::new_map(i, file))
            .collect();
        let reduce_tasks = (0..n_reduce).map(Task::new_reduce).collect();
        Ok(Coordinator {
            map_tasks,
            reduce_tasks,
            leases: HashMap::new(),
            config,
        })
    }

    pub fn n_map(&self) -> usize {
        self.map_tasks.len()
    }

    pub fn n_reduce(&self) -> usize {
        self.reduce_tasks.len()
    }

    pub fn task(&self, kind: TaskKind, id: TaskId) -> Option<&Task> {
        self.tasks(kind).get(id)
    }

    fn tasks(&self, kind: TaskKind) -> &Vec<Task> {
        match kind {
            TaskKind::Map => &self.map_tasks,
            TaskKind::Reduce => &self.reduce_tasks,
        }
    }

    fn tasks_mut(&mut self, kind: TaskKind) -> &mut Vec<Task> {
        match kind {
            TaskKind::Map => &mut self.map_tasks,
            TaskKind::Reduce => &mut self.reduce_tasks,
        }
    }

    pub fn phase(&self) -> Phase {
        if !self.map_tasks.iter().all(Task::is_completed) {
            Phase::Map
        } else if !self.reduce_tasks.iter().all(Task::is_completed) {
            Phase::Reduce
        } else {
            Phase::Done
        }
    }

    pub fn is_done(&self) -> bool {
        self.reduce_tasks.iter().all(Task::is_completed)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            phase: self.phase(),
            maps_done: self.map_tasks.iter().filter(|t| t.is_completed()).count(),
            n_map: self.n_map(),
            reduces_done: self.reduce_tasks.iter().filter(|t| t.is_completed()).count(),
            n_reduce: self.n_reduce(),
        }
    }

    pub fn request_task(&mut self, worker: WorkerId) -> TaskReply {
        self.request_task_at(worker, Instant::now())
    }

    /// Hands the first idle task of the current phase to `worker`.
    ///
    /// Expired leases are reclaimed first. Reduce tasks are only handed out
    /// once every map task has completed.
    pub fn request_task_at(&mut self, worker: WorkerId, now: Instant) -> TaskReply {
        self.reclaim_expired(now);

        // a worker asking again while still holding a lease gave up on that task
        if let Some(lease) = self.leases.remove(&worker) {
            warn!(
                "worker {} abandoned {} task {}, returning it to the pool",
                worker, lease.kind, lease.task
            );
            self.release(worker, lease);
        }

        let kind = match self.phase() {
            Phase::Map => TaskKind::Map,
            Phase::Reduce => TaskKind::Reduce,
            Phase::Done => return TaskReply::Done,
        };
        let (n_map, n_reduce) = (self.n_map(), self.n_reduce());

        let Some(task) = self
            .tasks_mut(kind)
            .iter_mut()
            .find(|t| t.state() == TaskState::Idle)
        else {
            debug!("no idle {} task for worker {}, asking it to wait", kind, worker);
            return TaskReply::Wait;
        };

        task.assign(worker, now);
        let id = task.id();
        let reply = match kind {
            TaskKind::Map => TaskReply::Map(MapAssignment {
                task_id: id,
                input: task.input().unwrap_or_default().to_string(),
                n_map,
                n_reduce,
            }),
            TaskKind::Reduce => TaskReply::Reduce(ReduceAssignment {
                task_id: id,
                n_map,
                n_reduce,
            }),
        };
        self.leases.insert(
            worker,
            Lease {
                kind,
                task: id,
                leased_at: now,
            },
        );
        info!("assigned {} task {} to worker {}", kind, id, worker);
        reply
    }

    /// Records that `worker` finished `task`.
    ///
    /// Late and duplicate reports are expected under reassignment and are
    /// acknowledged without changing anything.
    /// A reduce report while the map phase is still open is refused.
    pub fn report_complete(&mut self, worker: WorkerId, task: TaskId, kind: TaskKind) -> ReportAck {
        if task >= self.tasks(kind).len() {
            warn!("worker {} reported unknown {} task {}", worker, kind, task);
            return ReportAck::UnknownTask;
        }
        // reduce output cannot exist before every map has published its files
        if kind == TaskKind::Reduce && self.phase() == Phase::Map {
            warn!(
                "worker {} reported reduce task {} during the map phase, ignoring",
                worker, task
            );
            return ReportAck::Premature;
        }
        let entry = &mut self.tasks_mut(kind)[task];

        if entry.is_completed() {
            debug!(
                "worker {} reported {} task {} which is already completed",
                worker, kind, task
            );
            self.drop_leases_on(kind, task);
            return ReportAck::AlreadyCompleted;
        }

        if entry.assigned_to() != Some(worker) {
            debug!(
                "{} task {} completed by worker {} after losing its lease",
                kind, task, worker
            );
        }
        entry.complete();
        self.drop_leases_on(kind, task);
        info!("worker {} completed {} task {}", worker, kind, task);

        if kind == TaskKind::Map && self.phase() == Phase::Reduce {
            info!("all {} map tasks completed, starting reduce phase", self.n_map());
        } else if self.is_done() {
            info!("all {} reduce tasks completed", self.n_reduce());
        }
        ReportAck::Accepted
    }

    fn reclaim_expired(&mut self, now: Instant) {
        let timeout = self.config.lease_timeout;
        let expired: Vec<(WorkerId, Lease)> = self
            .leases
            .iter()
            .filter(|(_, lease)| now.saturating_duration_since(lease.leased_at) > timeout)
            .map(|(worker, lease)| (*worker, *lease))
            .collect();

        for (worker, lease) in expired {
            self.leases.remove(&worker);
            warn!(
                "lease of worker {} on {} task {} expired after {:?}",
                worker, lease.kind, lease.task, timeout
            );
            self.release(worker, lease);
        }
    }

    fn release(&mut self, worker: WorkerId, lease: Lease) {
        if let Some(task) = self.tasks_mut(lease.kind).get_mut(lease.task) {
            if task.assigned_to() == Some(worker) {
                task.release();
            }
        }
    }

    fn drop_leases_on(&mut self, kind: TaskKind, task: TaskId) {
        self.leases
            .retain(|_, lease| !(lease.kind == kind && lease.task == task));
    }
}

/// RPC front end. Every call takes the shared ledger lock for its whole
/// duration; no I/O happens under it.
#[derive(Clone)]
pub struct CoordinatorServer {
    coordinator: Arc<Mutex<Coordinator>>,
}

impl CoordinatorServer {
    pub fn new(coordinator: Arc<Mutex<Coordinator>>) -> Self {
        CoordinatorServer { coordinator }
    }
}

impl Rpc for CoordinatorServer {
    async fn request_task(self, _: context::Context, worker: WorkerId) -> TaskReply {
        self.coordinator.lock().await.request_task(worker)
    }

    async fn report_complete(
        self,
        _: context::Context,
        worker: WorkerId,
        task: TaskId,
        kind: TaskKind,
    ) -> ReportAck {
        self.coordinator
            .lock()
            .await
            .report_complete(worker, task, kind)
    }

    async fn is_done(self, _: context::Context) -> bool {
        self.coordinator.lock().await.is_done()
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// Serves the coordinator on a Unix socket at `socket` until the listener fails.
pub async fn serve(coordinator: Arc<Mutex<Coordinator>>, socket: &Path) -> Result<()> {
    // a stale socket from an earlier run would make bind fail
    match std::fs::remove_file(socket) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io(socket, e)),
    }

    let mut listener = tarpc::serde_transport::unix::listen(socket, Json::default)
        .await
        .map_err(Error::Transport)?;
    listener.config_mut().max_frame_length(usize::MAX);
    info!("coordinator listening on {}", socket.display());

    listener
        // Ignore accept errors.
        .filter_map(|r| future::ready(r.ok()))
        .map(server::BaseChannel::with_defaults)
        .map(|channel| {
            let server = CoordinatorServer::new(Arc::clone(&coordinator));
            channel.execute(server.serve()).for_each(spawn)
        })
        .buffer_unordered(MAX_CONNECTIONS)
        .for_each(|_| async {})
        .await;

    Ok(())
}

/// Serves `coordinator` and returns once every reduce task has completed.
///
/// Completion is polled every `poll_interval`. The listener stays up for one
/// more interval afterwards so polling workers are told `Done` instead of
/// finding the socket gone.
pub async fn run(coordinator: Coordinator, socket: &Path, poll_interval: Duration) -> Result<()> {
    let coordinator = Arc::new(Mutex::new(coordinator));
    let server = serve(Arc::clone(&coordinator), socket);
    tokio::pin!(server);

    loop {
        tokio::select! {
            res = &mut server => return res,
            _ = sleep(poll_interval) => {
                let progress = coordinator.lock().await.progress();
                debug!("{:?}", progress);
                if progress.phase == Phase::Done {
                    break;
                }
            }
        }
    }

    info!("job finished, shutting down");
    tokio::select! {
        res = &mut server => res?,
        _ = sleep(poll_interval) => {}
    }
    if let Err(e) = std::fs::remove_file(socket) {
        warn!("could not remove {}: {}", socket.display(), e);
    }
    Ok(())
}

/// Serves `coordinator` over an in-memory channel and returns a client for it,
/// for running workers inside the coordinator's own process.
pub fn in_process_client(coordinator: Arc<Mutex<Coordinator>>) -> RpcClient {
    let (client_transport, server_transport) = tarpc::transport::channel::unbounded();
    let channel = server::BaseChannel::with_defaults(server_transport);
    let server = CoordinatorServer::new(coordinator);
    tokio::spawn(channel.execute(server.serve()).for_each(spawn));
    RpcClient::new(client::Config::default(), client_transport).spawn()
}

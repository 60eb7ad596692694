use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskKind, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapAssignment {
    pub task_id: TaskId,
    pub input: String,
    pub n_map: usize,
    pub n_reduce: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceAssignment {
    /// Also the partition index.
    pub task_id: TaskId,
    pub n_map: usize,
    pub n_reduce: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskReply {
    Map(MapAssignment),
    Reduce(ReduceAssignment),
    /// Nothing is assignable right now but the job is not finished.
    Wait,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportAck {
    Accepted,
    AlreadyCompleted,
    UnknownTask,
    /// A reduce task reported before every map task completed; ignored.
    Premature,
}

#[tarpc::service]
pub trait Rpc {
    async fn request_task(worker: WorkerId) -> TaskReply;
    async fn report_complete(worker: WorkerId, task: TaskId, kind: TaskKind) -> ReportAck;
    async fn is_done() -> bool;
}

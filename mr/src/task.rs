use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Opaque worker identity, normally the worker's process id.
pub type WorkerId = u32;

/// Index of a task within its kind: `0..M` for maps, `0..R` for reduces.
pub type TaskId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Map,
    Reduce,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Map => write!(f, "map"),
            TaskKind::Reduce => write!(f, "reduce"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    InProgress,
    Completed,
}

/// One unit of work in the ledger. Created once at job start and never
/// removed; only the state and assignment fields change.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    state: TaskState,
    // input file for a map task, `None` for a reduce task (its id is the partition)
    input: Option<String>,
    assigned_to: Option<WorkerId>,
    assigned_at: Option<Instant>,
}

impl Task {
    pub fn new_map(id: TaskId, input: String) -> Task {
        Task {
            id,
            kind: TaskKind::Map,
            state: TaskState::Idle,
            input: Some(input),
            assigned_to: None,
            assigned_at: None,
        }
    }

    pub fn new_reduce(partition: TaskId) -> Task {
        Task {
            id: partition,
            kind: TaskKind::Reduce,
            state: TaskState::Idle,
            input: None,
            assigned_to: None,
            assigned_at: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn input(&self) -> Option<&str> {
        self.input.as_deref()
    }

    pub fn assigned_to(&self) -> Option<WorkerId> {
        self.assigned_to
    }

    pub fn assigned_at(&self) -> Option<Instant> {
        self.assigned_at
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    pub(crate) fn assign(&mut self, worker: WorkerId, now: Instant) {
        self.state = TaskState::InProgress;
        self.assigned_to = Some(worker);
        self.assigned_at = Some(now);
    }

    /// Returns the task to the pool. A completed task is left alone.
    pub(crate) fn release(&mut self) {
        if self.state == TaskState::InProgress {
            self.state = TaskState::Idle;
            self.assigned_to = None;
            self.assigned_at = None;
        }
    }

    pub(crate) fn complete(&mut self) {
        self.state = TaskState::Completed;
    }
}

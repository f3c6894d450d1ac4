//! The polymorphic task contract (C1).

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ScheduleError;

/// Externally observable job state.
///
/// Only [`JobState::Finished`], [`JobState::Failed`] and [`JobState::Retry`]
/// are terminal for this scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created but not yet popped from the queue.
    Init,
    /// Actively running a pipeline phase.
    InProgress,
    /// Completed all phases successfully.
    Finished,
    /// Failed in a way the coordinator should not retry.
    Failed,
    /// Failed (or was cancelled) in a way the coordinator should retry.
    Retry,
}

impl JobState {
    /// Whether this state is terminal (the task will never run again here).
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed | JobState::Retry)
    }
}

/// A task's cancellation signal and deadline, bound at submission time.
///
/// Deliberately independent of any RPC framework's request context: the
/// transport that produces it is out of scope for this crate.
#[derive(Debug, Clone)]
pub struct TaskContext {
    cancel: CancellationToken,
    deadline: Option<tokio::time::Instant>,
}

impl TaskContext {
    /// A context with no deadline, cancelled only via [`TaskContext::cancel`].
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that auto-cancels after `timeout` elapses, in addition to
    /// being cancellable directly.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(tokio::time::Instant::now() + timeout),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True if cancelled, or if the deadline (if any) has already passed.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| tokio::time::Instant::now() >= d)
    }

    /// The configured deadline, if any.
    pub fn deadline(&self) -> Option<tokio::time::Instant> {
        self.deadline
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Interior-mutable holder for a task's current state and reason string.
///
/// Every [`ScheduleTask`] implementation embeds one of these and exposes it
/// via [`ScheduleTask::state_cell`]; the scheduler core never needs `&mut`
/// access to a task, only shared `&self`/`Arc<dyn ScheduleTask>` access.
#[derive(Debug, Default)]
pub struct TaskStateCell(Mutex<(JobState, String)>);

impl TaskStateCell {
    /// A fresh cell in [`JobState::Init`] with an empty reason.
    pub fn new() -> Self {
        Self(Mutex::new((JobState::Init, String::new())))
    }

    /// Current `(state, reason)` pair.
    pub fn get(&self) -> (JobState, String) {
        self.0.lock().clone()
    }

    /// Overwrite the current state and reason.
    pub fn set(&self, state: JobState, reason: impl Into<String>) {
        *self.0.lock() = (state, reason.into());
    }
}

/// Coarse classification of a task, used to decide batching eligibility.
///
/// Only [`TaskKind::IndexBuild`] tasks are ever placed into a batch. This is
/// a plain enum rather than a downcast-based capability test since the set
/// of kinds this scheduler needs to distinguish is small and fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Eligible for batched, parallel execution with other index-build tasks.
    IndexBuild,
    /// Always run as a singleton.
    Other,
}

/// The uniform unit of scheduled work.
///
/// Implementations are expected to be cheap to clone behind an `Arc` (the
/// scheduler shares task instances between the dispatch loop and the
/// spawned runner task) and to store their mutable state in a
/// [`TaskStateCell`].
#[async_trait]
pub trait ScheduleTask: Send + Sync {
    /// Stable name, expected (but not required) to be unique across
    /// simultaneously-active tasks.
    fn name(&self) -> &str;

    /// Estimated resource weight, in slots. Always `>= 1`.
    fn slot(&self) -> i64;

    /// Cancellation signal and deadline for this task.
    fn context(&self) -> &TaskContext;

    /// The task's mutable state cell.
    fn state_cell(&self) -> &TaskStateCell;

    /// What kind of task this is, for batching eligibility.
    fn kind(&self) -> TaskKind {
        TaskKind::Other
    }

    /// Called synchronously by [`crate::queue::TaskQueue::enqueue`], before
    /// the task is placed in the unissued queue. A failure here is returned
    /// to the submitter unchanged and the task is never enqueued.
    async fn on_enqueue(&self) -> Result<(), ScheduleError> {
        Ok(())
    }

    /// Runs before `execute`. Cheap, serial even in a batch.
    async fn pre_execute(&self) -> Result<(), ScheduleError>;

    /// The (potentially expensive) main phase.
    async fn execute(&self) -> Result<(), ScheduleError>;

    /// Runs after `execute` succeeds. Cheap, serial even in a batch.
    async fn post_execute(&self) -> Result<(), ScheduleError>;

    /// Released working memory after the task reaches a terminal state.
    /// Never called more than once per task.
    fn reset(&self) {}

    /// Convenience accessor for the current state.
    fn state(&self) -> JobState {
        self.state_cell().get().0
    }

    /// Convenience accessor for the current reason string.
    fn reason(&self) -> String {
        self.state_cell().get().1
    }
}

//! Single-task runner (C4): drives one task through
//! `PreExecute -> Execute -> PostExecute`, each guarded by a cancellation
//! check, with a cancellation sentinel classified the same way a pipeline
//! failure would be.

use std::sync::Arc;

use crate::error::ScheduleError;
use crate::event::{EventBus, SchedulerEvent};
use crate::mem_hint::release_os_memory;
use crate::queue::TaskQueue;
use crate::task::{JobState, ScheduleTask};

/// RAII guard that, on drop, removes `task` from `active`, calls its
/// `Reset` hook, and issues the OS-memory hint.
///
/// Rust runs `Drop` during unwinding, so this fires whether the runner
/// returns normally or a phase panics: the caller never needs
/// `std::panic::catch_unwind` to satisfy the "always deregister" guarantee.
struct ActiveGuard<'a> {
    queue: &'a TaskQueue,
    task: Arc<dyn ScheduleTask>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.queue.pop_active(self.task.name());
        self.task.reset();
        release_os_memory();
    }
}

fn cancellation_error(task: &dyn ScheduleTask) -> ScheduleError {
    ScheduleError::Cancelled(format!("task {} context done", task.name()))
}

/// Runs a single task to completion and records its terminal state.
///
/// `task` must already be present in `queue`'s `active` map; the dispatch
/// loop inserts it there as part of its admission decision, before spawning
/// this function, so that slot accounting is correct the instant a task is
/// admitted rather than only once its runner happens to be scheduled.
///
/// The runner never retries internally; the terminal state it records is
/// the only retry signal surfaced to the coordinator. The task's state is
/// set to [`JobState::InProgress`] before the first phase runs, so an
/// observer polling [`ScheduleTask::state`] actually sees that variant
/// rather than jumping straight from `Init` to a terminal state.
pub(crate) async fn run_single(queue: &TaskQueue, events: &EventBus, task: Arc<dyn ScheduleTask>) {
    events.publish(SchedulerEvent::Dispatched {
        names: vec![task.name().to_string()],
        slots: task.slot(),
    });

    let _guard = ActiveGuard {
        queue,
        task: task.clone(),
    };

    task.state_cell().set(JobState::InProgress, "");

    let outcome = run_phases(task.as_ref()).await;
    match outcome {
        Ok(()) => task.state_cell().set(JobState::Finished, ""),
        Err(err) => task.state_cell().set(err.classify(), err.reason()),
    }

    let (state, reason) = task.state_cell().get();
    tracing::info!(task = task.name(), ?state, reason = %reason, "task reached terminal state");
    events.publish(SchedulerEvent::TaskTerminal {
        name: task.name().to_string(),
        state,
        reason,
    });
}

async fn run_phases(task: &dyn ScheduleTask) -> Result<(), ScheduleError> {
    if task.context().is_done() {
        return Err(cancellation_error(task));
    }
    task.pre_execute().await?;

    if task.context().is_done() {
        return Err(cancellation_error(task));
    }
    task.execute().await?;

    if task.context().is_done() {
        return Err(cancellation_error(task));
    }
    task.post_execute().await?;

    Ok(())
}

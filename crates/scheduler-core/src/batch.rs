//! Batch runner (C5): drives a batch of [`TaskKind::IndexBuild`] tasks
//! through a serial `PreExecute` barrier, a parallel `Execute` phase via the
//! configured [`ParallelBuildCollaborator`], and a serial `PostExecute`
//! barrier.
//!
//! The two serial barriers abort differently. A mid-batch `PreExecute`
//! failure means "no subsequent phase runs for any task": none of the
//! batch's other members, whether earlier or later in iteration order, ever
//! reach `execute`, so every one of them is marked `Retry` alongside the
//! failing task's own classified state. A mid-batch `PostExecute` failure is
//! not symmetric: tasks before the failing one already completed all three
//! phases on their own and are marked `Finished` as soon as their own
//! `post_execute` returns; tasks the phase never reached are left exactly as
//! they were, not forced into any terminal state.

use std::sync::Arc;

use crate::collaborator::ParallelBuildCollaborator;
use crate::event::{EventBus, SchedulerEvent};
use crate::mem_hint::release_os_memory;
use crate::queue::TaskQueue;
use crate::task::{JobState, ScheduleTask, TaskContext};

const SIBLING_ABORT_REASON: &str = "sibling task in batch aborted before this task ran";

/// RAII guard mirroring [`crate::runner::run_single`]'s: removes every task
/// in the batch from `active`, resets each, and issues one OS-memory hint
/// for the whole batch on drop.
struct BatchGuard<'a> {
    queue: &'a TaskQueue,
    tasks: Vec<Arc<dyn ScheduleTask>>,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        for task in &self.tasks {
            self.queue.pop_active(task.name());
            task.reset();
        }
        release_os_memory();
    }
}

/// Marks every task in `tasks` other than the one at `except_idx` `Retry`
/// with `reason`. Used on a Pre-phase abort, where no task in the batch —
/// regardless of whether it sits before or after the failing one — ever
/// reaches `execute`.
fn mark_others_retry(tasks: &[Arc<dyn ScheduleTask>], except_idx: usize, reason: &str) {
    for (i, task) in tasks.iter().enumerate() {
        if i != except_idx {
            task.state_cell().set(JobState::Retry, reason);
        }
    }
}

/// Runs a batch of index-build tasks through Pre/Execute/Post and records
/// each task's terminal state. `batch` must be non-empty; every task in it
/// must already be present in `queue`'s `active` map.
pub(crate) async fn run_batch(
    queue: &TaskQueue,
    events: &EventBus,
    collaborator: &dyn ParallelBuildCollaborator,
    batch: Vec<Arc<dyn ScheduleTask>>,
) {
    let names: Vec<String> = batch.iter().map(|t| t.name().to_string()).collect();
    let slots: i64 = batch.iter().map(|t| t.slot()).sum();
    tracing::debug!(?names, slots, "batch admitted");
    events.publish(SchedulerEvent::Dispatched {
        names: names.clone(),
        slots,
    });

    let _guard = BatchGuard {
        queue,
        tasks: batch.clone(),
    };

    for task in &batch {
        task.state_cell().set(JobState::InProgress, "");
    }

    if run_pre_phase(&batch).await && run_execute_phase(collaborator, &batch).await {
        run_post_phase(&batch).await;
    }

    for task in &batch {
        let (state, reason) = task.state_cell().get();
        if state.is_terminal() {
            tracing::info!(task = task.name(), ?state, reason = %reason, "batch task reached terminal state");
            events.publish(SchedulerEvent::TaskTerminal {
                name: task.name().to_string(),
                state,
                reason,
            });
        } else {
            tracing::warn!(task = task.name(), ?state, "batch task left non-terminal: post_execute never ran for it after the batch aborted");
        }
    }
}

/// Serial, all-or-nothing `PreExecute` barrier. Returns `true` if every task
/// passed; on the first failure, classifies that task and marks every other
/// task in the batch `Retry`, then returns `false`.
async fn run_pre_phase(batch: &[Arc<dyn ScheduleTask>]) -> bool {
    for (idx, task) in batch.iter().enumerate() {
        if task.context().is_done() {
            task.state_cell().set(
                JobState::Retry,
                format!("task {} context done before pre_execute", task.name()),
            );
            mark_others_retry(batch, idx, SIBLING_ABORT_REASON);
            return false;
        }
        if let Err(err) = task.pre_execute().await {
            task.state_cell().set(err.classify(), err.reason());
            mark_others_retry(batch, idx, SIBLING_ABORT_REASON);
            return false;
        }
    }
    true
}

/// Parallel `Execute` phase via the collaborator. On failure, every task in
/// the batch is marked `Retry` with the collaborator's failure reason
/// : a batch-level failure carries no information about which
/// individual task was at fault.
async fn run_execute_phase(collaborator: &dyn ParallelBuildCollaborator, batch: &[Arc<dyn ScheduleTask>]) -> bool {
    let batch_ctx = TaskContext::new();
    match collaborator.build_parallel(&batch_ctx, batch).await {
        Ok(()) => true,
        Err(err) => {
            let reason = err.reason();
            for task in batch {
                task.state_cell().set(JobState::Retry, reason.clone());
            }
            false
        }
    }
}

/// Serial `PostExecute` barrier. Each task that completes its own
/// `post_execute` is marked `Finished` immediately, since at that point it
/// has genuinely completed all three phases on its own. On a failure, the
/// failing task gets its classified state and the barrier stops; tasks the
/// phase never reached are left untouched — a Post-phase abort does not
/// force them into any terminal state.
async fn run_post_phase(batch: &[Arc<dyn ScheduleTask>]) {
    for task in batch {
        if task.context().is_done() {
            task.state_cell().set(
                JobState::Retry,
                format!("task {} context done before post_execute", task.name()),
            );
            return;
        }
        match task.post_execute().await {
            Ok(()) => task.state_cell().set(JobState::Finished, ""),
            Err(err) => {
                task.state_cell().set(err.classify(), err.reason());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::NoopParallelBuildCollaborator;
    use crate::error::ScheduleError;
    use crate::task::TaskStateCell;
    use async_trait::async_trait;

    struct ScriptedTask {
        name: String,
        ctx: TaskContext,
        state: TaskStateCell,
        fail_pre: bool,
        fail_execute: bool,
        fail_post: bool,
    }

    impl ScriptedTask {
        fn ok(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                ctx: TaskContext::new(),
                state: TaskStateCell::new(),
                fail_pre: false,
                fail_execute: false,
                fail_post: false,
            })
        }
    }

    #[async_trait]
    impl ScheduleTask for ScriptedTask {
        fn name(&self) -> &str {
            &self.name
        }
        fn slot(&self) -> i64 {
            1
        }
        fn context(&self) -> &TaskContext {
            &self.ctx
        }
        fn state_cell(&self) -> &TaskStateCell {
            &self.state
        }
        async fn pre_execute(&self) -> Result<(), ScheduleError> {
            if self.fail_pre {
                return Err(ScheduleError::KeyNotFound(self.name.clone()));
            }
            Ok(())
        }
        async fn execute(&self) -> Result<(), ScheduleError> {
            if self.fail_execute {
                return Err(ScheduleError::Other("engine overloaded".into()));
            }
            Ok(())
        }
        async fn post_execute(&self) -> Result<(), ScheduleError> {
            if self.fail_post {
                return Err(ScheduleError::UnsupportedByEngine(self.name.clone()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn all_tasks_finish_on_happy_path() {
        let queue = TaskQueue::new();
        let events = EventBus::new(8);
        let collaborator = NoopParallelBuildCollaborator;
        let a = ScriptedTask::ok("a");
        let b = ScriptedTask::ok("b");
        queue.add_active(a.clone());
        queue.add_active(b.clone());

        run_batch(&queue, &events, &collaborator, vec![a.clone(), b.clone()]).await;

        assert_eq!(a.state(), JobState::Finished);
        assert_eq!(b.state(), JobState::Finished);
        assert_eq!(queue.using_slot(), 0);
    }

    #[tokio::test]
    async fn pre_execute_failure_aborts_batch_and_marks_siblings_retry() {
        let queue = TaskQueue::new();
        let events = EventBus::new(8);
        let collaborator = NoopParallelBuildCollaborator;
        let a = Arc::new(ScriptedTask {
            name: "a".into(),
            ctx: TaskContext::new(),
            state: TaskStateCell::new(),
            fail_pre: true,
            fail_execute: false,
            fail_post: false,
        });
        let b = ScriptedTask::ok("b");
        queue.add_active(a.clone());
        queue.add_active(b.clone());

        run_batch(&queue, &events, &collaborator, vec![a.clone(), b.clone()]).await;

        assert_eq!(a.state(), JobState::Failed);
        assert_eq!(b.state(), JobState::Retry);
        assert_eq!(b.reason(), SIBLING_ABORT_REASON);
    }

    /// A task earlier in the batch that already passed its own `pre_execute`
    /// must not be left `Finished` when a later sibling fails `pre_execute`:
    /// it never got to `execute` either, so `Retry` is the only correct
    /// terminal state for it.
    #[tokio::test]
    async fn pre_execute_failure_marks_earlier_sibling_retry_not_finished() {
        let queue = TaskQueue::new();
        let events = EventBus::new(8);
        let collaborator = NoopParallelBuildCollaborator;
        let ok_first = ScriptedTask::ok("ok-first");
        let bad = Arc::new(ScriptedTask {
            name: "bad".into(),
            ctx: TaskContext::new(),
            state: TaskStateCell::new(),
            fail_pre: true,
            fail_execute: false,
            fail_post: false,
        });
        let ok_last = ScriptedTask::ok("ok-last");
        queue.add_active(ok_first.clone());
        queue.add_active(bad.clone());
        queue.add_active(ok_last.clone());

        run_batch(
            &queue,
            &events,
            &collaborator,
            vec![ok_first.clone(), bad.clone(), ok_last.clone()],
        )
        .await;

        assert_eq!(ok_first.state(), JobState::Retry);
        assert_eq!(ok_first.reason(), SIBLING_ABORT_REASON);
        assert_eq!(bad.state(), JobState::Failed);
        assert_eq!(ok_last.state(), JobState::Retry);
        assert_eq!(ok_last.reason(), SIBLING_ABORT_REASON);
    }

    #[tokio::test]
    async fn execute_failure_marks_every_task_retry() {
        let queue = TaskQueue::new();
        let events = EventBus::new(8);
        let collaborator = NoopParallelBuildCollaborator;
        let a = Arc::new(ScriptedTask {
            name: "a".into(),
            ctx: TaskContext::new(),
            state: TaskStateCell::new(),
            fail_pre: false,
            fail_execute: true,
            fail_post: false,
        });
        let b = ScriptedTask::ok("b");
        queue.add_active(a.clone());
        queue.add_active(b.clone());

        run_batch(&queue, &events, &collaborator, vec![a.clone(), b.clone()]).await;

        assert_eq!(a.state(), JobState::Retry);
        assert_eq!(b.state(), JobState::Retry);
    }

    /// A mid-`post_execute` failure is not symmetric with a Pre-phase abort:
    /// the task before the failing one already completed all three phases
    /// and is marked `Finished`; the task after it is left exactly as it
    /// was (non-terminal), not forced to `Retry`.
    #[tokio::test]
    async fn post_execute_failure_leaves_untouched_sibling_non_terminal() {
        let queue = TaskQueue::new();
        let events = EventBus::new(8);
        let collaborator = NoopParallelBuildCollaborator;
        let ok_first = ScriptedTask::ok("ok-first");
        let bad = Arc::new(ScriptedTask {
            name: "bad".into(),
            ctx: TaskContext::new(),
            state: TaskStateCell::new(),
            fail_pre: false,
            fail_execute: false,
            fail_post: true,
        });
        let untouched = ScriptedTask::ok("untouched");
        queue.add_active(ok_first.clone());
        queue.add_active(bad.clone());
        queue.add_active(untouched.clone());

        run_batch(
            &queue,
            &events,
            &collaborator,
            vec![ok_first.clone(), bad.clone(), untouched.clone()],
        )
        .await;

        assert_eq!(ok_first.state(), JobState::Finished);
        assert_eq!(bad.state(), JobState::Failed);
        assert_eq!(untouched.state(), JobState::InProgress);
        assert_eq!(queue.using_slot(), 0);
    }
}

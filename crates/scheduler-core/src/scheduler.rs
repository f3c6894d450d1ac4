//! Lifecycle (C7): the public entry point wiring the queue, dispatch loop,
//! event bus, and the two external collaborators together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborator::{NodeCapacitySource, NoopParallelBuildCollaborator, ParallelBuildCollaborator};
use crate::dispatch::run_dispatch_loop;
use crate::error::ScheduleError;
use crate::event::{EventBus, SchedulerEvent};
use crate::queue::TaskQueue;
use crate::task::ScheduleTask;

/// The slot-admission scheduler.
///
/// Cloning is cheap (every field is an `Arc` or `Clone`-cheap handle), so a
/// `Scheduler` can be shared across the submitters and the owner that calls
/// [`Scheduler::start`]/[`Scheduler::close`] without an extra layer of
/// `Arc<Scheduler>` at call sites that already hold one.
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<TaskQueue>,
    events: Arc<EventBus>,
    capacity: Arc<dyn NodeCapacitySource>,
    collaborator: Arc<dyn ParallelBuildCollaborator>,
    shutdown: CancellationToken,
    loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    closed: Arc<AtomicBool>,
    degraded_reason: Arc<Mutex<Option<String>>>,
}

impl Scheduler {
    /// Builds a scheduler around the given node-capacity source and
    /// parallel-build collaborator. Does not start the dispatch loop;
    /// call [`Scheduler::start`] for that.
    pub fn new(capacity: Arc<dyn NodeCapacitySource>, collaborator: Arc<dyn ParallelBuildCollaborator>) -> Self {
        Self {
            queue: Arc::new(TaskQueue::new()),
            events: Arc::new(EventBus::default()),
            capacity,
            collaborator,
            shutdown: CancellationToken::new(),
            loop_handle: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            degraded_reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Builds a scheduler the same way as [`Scheduler::new`], but accepts
    /// the result of attempting to construct the real parallel-build
    /// collaborator. On `Err`, degrades to [`NoopParallelBuildCollaborator`];
    /// the first call to [`Scheduler::start`] then publishes
    /// [`SchedulerEvent::CollaboratorDegraded`], so a
    /// caller that subscribes between construction and `start` still
    /// observes it. A scheduler whose fast collaborator failed to construct
    /// still runs, just without cross-task parallelism.
    pub fn new_with_fallback(
        capacity: Arc<dyn NodeCapacitySource>,
        collaborator: Result<Arc<dyn ParallelBuildCollaborator>, anyhow::Error>,
    ) -> Self {
        match collaborator {
            Ok(collaborator) => Self::new(capacity, collaborator),
            Err(err) => {
                let scheduler = Self::new(capacity, Arc::new(NoopParallelBuildCollaborator));
                *scheduler.degraded_reason.lock() = Some(err.to_string());
                scheduler
            }
        }
    }

    /// Submits `task`. Runs `task.on_enqueue()` synchronously with respect
    /// to this call; on success the task is appended to `unissued` and the
    /// dispatch loop is woken. See [`TaskQueue::enqueue`].
    pub async fn enqueue(&self, task: Arc<dyn ScheduleTask>) -> Result<(), ScheduleError> {
        self.queue.enqueue(task).await
    }

    /// `(len(unissued), |active non-terminal|)`.
    pub fn get_task_num(&self) -> (usize, usize) {
        self.queue.task_num()
    }

    /// Sum of slots for every task enqueued and not yet removed from
    /// `active`.
    pub fn get_using_slot(&self) -> i64 {
        self.queue.using_slot()
    }

    /// Sum of slots of tasks currently running.
    pub fn get_active_slot(&self) -> i64 {
        self.queue.active_slot()
    }

    /// Subscribes to the scheduler's event stream.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Starts the dispatch loop as a background task, if it isn't already
    /// running. Idempotent: a second call while the loop is running is a
    /// no-op.
    pub fn start(&self) {
        let mut handle = self.loop_handle.lock();
        if handle.is_some() {
            return;
        }
        if let Some(reason) = self.degraded_reason.lock().take() {
            tracing::warn!(%reason, "parallel-build collaborator degraded to sequential fallback");
            self.events.publish(SchedulerEvent::CollaboratorDegraded { reason });
        }
        tracing::info!("starting scheduler");
        let queue = self.queue.clone();
        let events = self.events.clone();
        let capacity = self.capacity.clone();
        let collaborator = self.collaborator.clone();
        let shutdown = self.shutdown.clone();
        *handle = Some(tokio::spawn(async move {
            run_dispatch_loop(queue, events, capacity, collaborator, shutdown).await;
        }));
    }

    /// Signals the dispatch loop to stop, waits for it to return, and
    /// releases the parallel-build collaborator's resources. Idempotent: a
    /// second call is a no-op and returns immediately, so callers don't need
    /// to coordinate who calls `close` first.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("closing scheduler");
        self.shutdown.cancel();

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.collaborator.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::StaticNodeCapacity;
    use crate::error::ScheduleError;
    use crate::task::{JobState, ScheduleTask, TaskContext, TaskStateCell};
    use async_trait::async_trait;
    use std::time::Duration;

    struct PlainTask {
        name: String,
        ctx: TaskContext,
        state: TaskStateCell,
    }

    impl PlainTask {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                ctx: TaskContext::new(),
                state: TaskStateCell::new(),
            })
        }
    }

    #[async_trait]
    impl ScheduleTask for PlainTask {
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
            Ok(())
        }
        async fn execute(&self) -> Result<(), ScheduleError> {
            Ok(())
        }
        async fn post_execute(&self) -> Result<(), ScheduleError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueue_start_run_close_happy_path() {
        let capacity: Arc<dyn NodeCapacitySource> = Arc::new(StaticNodeCapacity::new(8));
        let scheduler = Scheduler::new(capacity, Arc::new(NoopParallelBuildCollaborator));
        scheduler.start();

        let task = PlainTask::new("t1");
        scheduler.enqueue(task.clone()).await.unwrap();

        for _ in 0..200 {
            if task.state() == JobState::Finished {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(task.state(), JobState::Finished);

        scheduler.close().await;
        scheduler.close().await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let capacity: Arc<dyn NodeCapacitySource> = Arc::new(StaticNodeCapacity::new(8));
        let scheduler = Scheduler::new(capacity, Arc::new(NoopParallelBuildCollaborator));
        scheduler.start();
        scheduler.start();
        assert!(scheduler.loop_handle.lock().is_some());
        scheduler.close().await;
    }

    #[tokio::test]
    async fn new_with_fallback_degrades_on_construction_error() {
        let capacity: Arc<dyn NodeCapacitySource> = Arc::new(StaticNodeCapacity::new(8));
        let failing: Result<Arc<dyn ParallelBuildCollaborator>, anyhow::Error> =
            Err(anyhow::anyhow!("collaborator backend unreachable"));
        let scheduler = Scheduler::new_with_fallback(capacity, failing);

        let mut events = scheduler.subscribe_events();
        scheduler.start();
        let task = PlainTask::new("t1");
        scheduler.enqueue(task.clone()).await.unwrap();

        let saw_degraded = tokio::time::timeout(Duration::from_millis(200), async {
            loop {
                if let Ok(SchedulerEvent::CollaboratorDegraded { .. }) = events.recv().await {
                    return true;
                }
            }
        })
        .await
        .unwrap_or(false);
        assert!(saw_degraded);

        scheduler.close().await;
    }
}

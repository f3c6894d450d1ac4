//! Dispatch loop (C6): pops a task off `unissued`, opportunistically grows
//! it into a batch of index-build siblings, waits for the batch (or lone
//! task) to be admitted, and spawns a runner or batch-runner.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::batch;
use crate::collaborator::{NodeCapacitySource, ParallelBuildCollaborator};
use crate::event::{EventBus, SchedulerEvent};
use crate::queue::TaskQueue;
use crate::runner;
use crate::task::{ScheduleTask, TaskKind};

/// Upper bound on how many index-build tasks a single batch collects before
/// being handed to the batch runner.
pub(crate) const MAX_BATCH_SIZE: usize = 16;

/// Interval between node-capacity re-checks while a popped unit is waiting
/// for enough slots to free up.
const ADMISSION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// `true` if admitting a unit weighing `candidate_slot` keeps the node
/// within capacity, or if there is nothing else running right now.
///
/// The `active == 0` branch is the no-active liveness escape:
/// `total - active == total` reduces to "nothing is running", and
/// admitting unconditionally in that case is what keeps a single task
/// heavier than the node's entire reported capacity from deadlocking the
/// node forever.
fn admits(queue: &TaskQueue, capacity: &dyn NodeCapacitySource, candidate_slot: i64) -> bool {
    let active = queue.active_slot();
    if active == 0 {
        return true;
    }
    active + candidate_slot <= capacity.calculate_node_slots()
}

/// Polls [`admits`] every [`ADMISSION_POLL_INTERVAL`] until it's `true`, or
/// until `shutdown` fires. Returns `false` on shutdown.
async fn wait_for_admission(
    queue: &TaskQueue,
    capacity: &dyn NodeCapacitySource,
    candidate_slot: i64,
    shutdown: &CancellationToken,
) -> bool {
    loop {
        if admits(queue, capacity, candidate_slot) {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(ADMISSION_POLL_INTERVAL) => {}
            _ = shutdown.cancelled() => return false,
        }
    }
}

fn spawn_single(queue: &Arc<TaskQueue>, events: &Arc<EventBus>, task: Arc<dyn ScheduleTask>) {
    queue.add_active(task.clone());
    let queue = queue.clone();
    let events = events.clone();
    tokio::spawn(async move {
        runner::run_single(&queue, &events, task).await;
    });
}

/// Runs the dispatch loop until `shutdown` is cancelled.
///
/// Each iteration pops one task, then — only if it's an index-build task —
/// opportunistically grows it into a batch by repeatedly popping the next
/// `unissued` entry while it's also index-build and the batch is under
/// [`MAX_BATCH_SIZE`]. The first non-index-build task encountered during
/// that collection is spawned as a singleton immediately, ahead of whatever
/// is still in `unissued`, rather than being put back — a deliberate design
/// choice, not a bug. Collection carries no admission check of its own;
/// admission is decided once, for the collected unit's total weight, after
/// collection stops. A batch needs at least two members to be run as a
/// batch; a lone index-build task with no eligible sibling runs through the
/// singleton path instead.
pub(crate) async fn run_dispatch_loop(
    queue: Arc<TaskQueue>,
    events: Arc<EventBus>,
    capacity: Arc<dyn NodeCapacitySource>,
    collaborator: Arc<dyn ParallelBuildCollaborator>,
    shutdown: CancellationToken,
) {
    tracing::info!("dispatch loop starting");
    events.publish(SchedulerEvent::LoopStarted);

    'dispatch: loop {
        if shutdown.is_cancelled() {
            break;
        }

        let head = loop {
            if let Some(task) = queue.pop_unissued() {
                break task;
            }
            tokio::select! {
                _ = queue.woken() => continue,
                _ = shutdown.cancelled() => break 'dispatch,
            }
        };

        let mut members = vec![head];
        if members[0].kind() == TaskKind::IndexBuild {
            while members.len() < MAX_BATCH_SIZE && queue.unissued_len() > 0 {
                let Some(next) = queue.pop_unissued() else {
                    break;
                };
                if next.kind() == TaskKind::IndexBuild {
                    members.push(next);
                } else {
                    tracing::debug!(task = next.name(), "non-index-build task popped mid-batch; dispatching immediately");
                    spawn_single(&queue, &events, next);
                    break;
                }
            }
        }

        if members.len() >= 2 {
            let need: i64 = members.iter().map(|t| t.slot()).sum();
            if !wait_for_admission(&queue, capacity.as_ref(), need, &shutdown).await {
                break 'dispatch;
            }
            for task in &members {
                queue.add_active(task.clone());
            }
            tracing::debug!(batch_size = members.len(), need, "dispatching index-build batch");
            let queue = queue.clone();
            let events = events.clone();
            let collaborator = collaborator.clone();
            tokio::spawn(async move {
                batch::run_batch(&queue, &events, collaborator.as_ref(), members).await;
            });
        } else {
            let solo = members.into_iter().next().expect("members always has the popped head");
            if !wait_for_admission(&queue, capacity.as_ref(), solo.slot(), &shutdown).await {
                break 'dispatch;
            }
            tracing::debug!(task = solo.name(), "dispatching singleton task");
            spawn_single(&queue, &events, solo);
        }
    }

    tracing::info!("dispatch loop stopped");
    events.publish(SchedulerEvent::LoopStopped);
}

//! The bounded task queue + active-task tracking map (C2).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ScheduleError;
use crate::task::ScheduleTask;

/// Upper bound on `unissued`.
pub const MAX_TASK_NUM: usize = 1024;

/// Bounded FIFO of pending tasks plus a tracking map of active tasks, with
/// slot accounting.
///
/// Two independent `parking_lot` mutexes guard `unissued` and `active`
/// respectively, so that the dispatch loop (which only ever pops from
/// `unissued` and inserts into `active`) never contends with a runner
/// (which only ever removes from `active`) on the same lock. The one
/// operation that needs both, [`TaskQueue::task_num`], always locks
/// `unissued` before `active` to avoid any possibility of deadlock.
pub struct TaskQueue {
    unissued: Mutex<VecDeque<Arc<dyn ScheduleTask>>>,
    active: Mutex<HashMap<String, Arc<dyn ScheduleTask>>>,
    using_slot: AtomicI64,
    /// Edge-triggered wake signal: producers call `notify_one` (non-blocking,
    /// coalescing), the dispatch loop awaits `notified()`.
    wake: tokio::sync::Notify,
}

impl TaskQueue {
    /// A new, empty queue.
    pub fn new() -> Self {
        Self {
            unissued: Mutex::new(VecDeque::new()),
            active: Mutex::new(HashMap::new()),
            using_slot: AtomicI64::new(0),
            wake: tokio::sync::Notify::new(),
        }
    }

    /// Runs `task.on_enqueue()`, then appends it to the tail of `unissued`
    /// and wakes the dispatch loop.
    ///
    /// On `on_enqueue` failure, the error is returned unchanged and the task
    /// is never enqueued. If `unissued` is already at [`MAX_TASK_NUM`],
    /// returns [`ScheduleError::QueueFull`] without consuming a slot.
    pub async fn enqueue(&self, task: Arc<dyn ScheduleTask>) -> Result<(), ScheduleError> {
        task.on_enqueue().await?;

        {
            let mut unissued = self.unissued.lock();
            if unissued.len() >= MAX_TASK_NUM {
                return Err(ScheduleError::QueueFull);
            }
            unissued.push_back(task.clone());
        }

        self.using_slot.fetch_add(task.slot(), Ordering::SeqCst);
        // Best-effort: a full channel (or, here, an already-pending permit)
        // just means a wake is already on its way.
        self.wake.notify_one();
        Ok(())
    }

    /// Waits until the queue has been woken at least once since the last
    /// call, or returns immediately if a wake is already pending.
    pub async fn woken(&self) {
        self.wake.notified().await;
    }

    /// Removes and returns the head of `unissued`, or `None` if empty.
    /// Does not touch `active` or `using_slot`.
    pub fn pop_unissued(&self) -> Option<Arc<dyn ScheduleTask>> {
        self.unissued.lock().pop_front()
    }

    /// Current length of `unissued`, without popping.
    pub fn unissued_len(&self) -> usize {
        self.unissued.lock().len()
    }

    /// Inserts `task` into `active`, keyed by its name. If a task with the
    /// same name is already active, the previous entry is overwritten and a
    /// collision is logged (duplicate-name policy).
    pub fn add_active(&self, task: Arc<dyn ScheduleTask>) {
        let mut active = self.active.lock();
        if active.insert(task.name().to_string(), task.clone()).is_some() {
            tracing::warn!(task = task.name(), "active task name collision, overwriting");
        }
    }

    /// Removes and returns the entry named `name`, subtracting its slot from
    /// `using_slot`. Logs and returns `None` if no such entry exists; this is
    /// the only path that decrements `using_slot`.
    pub fn pop_active(&self, name: &str) -> Option<Arc<dyn ScheduleTask>> {
        let removed = self.active.lock().remove(name);
        match &removed {
            Some(task) => {
                self.using_slot.fetch_sub(task.slot(), Ordering::SeqCst);
            }
            None => {
                tracing::warn!(task = name, "pop_active called for unknown task name");
            }
        }
        removed
    }

    /// `(len(unissued), |{t in active : state not terminal}|)`, for external
    /// observability. Locks `unissued` before `active`.
    pub fn task_num(&self) -> (usize, usize) {
        let unissued_len = self.unissued.lock().len();
        let active_non_terminal = self
            .active
            .lock()
            .values()
            .filter(|t| !t.state().is_terminal())
            .count();
        (unissued_len, active_non_terminal)
    }

    /// Sum of slots for every task that has been enqueued and not yet
    /// removed from `active` (i.e. still in `unissued` or `active`).
    pub fn using_slot(&self) -> i64 {
        self.using_slot.load(Ordering::SeqCst)
    }

    /// Sum of slots of tasks currently in `active`, recomputed by scan under
    /// lock on every call: this reflects only
    /// tasks whose pipeline is actually in progress, never cached.
    pub fn active_slot(&self) -> i64 {
        self.active.lock().values().map(|t| t.slot()).sum()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

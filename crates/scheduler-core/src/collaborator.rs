//! External collaborators the core consumes: node capacity and the
//! parallel-build backend. Both are out of this crate's scope to implement
//! for real; only the interfaces and trivial fallbacks live here.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ScheduleError;
use crate::task::{ScheduleTask, TaskContext};

/// Reports the current node-wide slot capacity. Implementations may change
/// their answer over time with load and configuration; the scheduler core
/// recomputes it on every admission attempt rather than caching it.
pub trait NodeCapacitySource: Send + Sync {
    /// Current total slot budget for this node.
    fn calculate_node_slots(&self) -> i64;
}

/// A fixed-capacity source, for tests and for deployments that pin a static
/// slot budget instead of deriving one from live resource pressure.
pub struct StaticNodeCapacity(AtomicI64);

impl StaticNodeCapacity {
    /// A capacity source that always reports `slots`.
    pub fn new(slots: i64) -> Self {
        Self(AtomicI64::new(slots))
    }

    /// Updates the reported capacity, e.g. from a background resource
    /// monitor. Takes effect on the next `calculate_node_slots` call.
    pub fn set(&self, slots: i64) {
        self.0.store(slots, Ordering::SeqCst);
    }
}

impl NodeCapacitySource for StaticNodeCapacity {
    fn calculate_node_slots(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives the CPU- and memory-heavy parallel build of a batch of index-build
/// tasks. The concrete index-build routines and the parallel builder's
/// internals are out of scope for this crate; only the interface the batch
/// runner calls through is defined here.
#[async_trait]
pub trait ParallelBuildCollaborator: Send + Sync {
    /// Builds every task in `batch` in parallel. A batch-level failure marks
    /// every task `Retry` with this failure's reason.
    async fn build_parallel(
        &self,
        ctx: &TaskContext,
        batch: &[Arc<dyn ScheduleTask>],
    ) -> Result<(), ScheduleError>;

    /// Releases any resources held by the collaborator. Called once, from
    /// [`crate::scheduler::Scheduler::close`].
    async fn close(&self);
}

/// A collaborator that runs each task's own `execute()` sequentially.
///
/// This is the scheduler's graceful-degradation fallback when the real
/// parallel-build collaborator fails to construct: it keeps batching
/// semantics well-defined (every task in the batch still gets an `Execute`
/// phase) without requiring any actual parallel backend.
pub struct NoopParallelBuildCollaborator;

#[async_trait]
impl ParallelBuildCollaborator for NoopParallelBuildCollaborator {
    async fn build_parallel(
        &self,
        _ctx: &TaskContext,
        batch: &[Arc<dyn ScheduleTask>],
    ) -> Result<(), ScheduleError> {
        for task in batch {
            task.execute().await?;
        }
        Ok(())
    }

    async fn close(&self) {}
}

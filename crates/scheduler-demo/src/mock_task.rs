use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::{ScheduleError, ScheduleTask, TaskContext, TaskKind, TaskStateCell};

/// A fake index-build task: `pre_execute`/`post_execute` are near-instant
/// bookkeeping, `execute` just sleeps for `work` to stand in for the actual
/// CPU/IO-bound index construction this scheduler is meant to gate.
pub struct MockIndexBuildTask {
    name: String,
    slot: i64,
    work: Duration,
    ctx: TaskContext,
    state: TaskStateCell,
}

impl MockIndexBuildTask {
    pub fn new(name: String, slot: i64, work: Duration) -> Self {
        Self {
            name,
            slot,
            work,
            ctx: TaskContext::new(),
            state: TaskStateCell::new(),
        }
    }
}

#[async_trait]
impl ScheduleTask for MockIndexBuildTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn slot(&self) -> i64 {
        self.slot
    }

    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    fn state_cell(&self) -> &TaskStateCell {
        &self.state
    }

    fn kind(&self) -> TaskKind {
        TaskKind::IndexBuild
    }

    async fn pre_execute(&self) -> Result<(), ScheduleError> {
        tracing::debug!(task = self.name(), "pre_execute: validating segment metadata");
        Ok(())
    }

    async fn execute(&self) -> Result<(), ScheduleError> {
        tracing::debug!(task = self.name(), work_ms = self.work.as_millis() as u64, "execute: building index");
        tokio::time::sleep(self.work).await;
        Ok(())
    }

    async fn post_execute(&self) -> Result<(), ScheduleError> {
        tracing::debug!(task = self.name(), "post_execute: publishing index handle");
        Ok(())
    }
}

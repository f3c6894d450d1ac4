//! Shared test double used by the scenario suite in `scenarios.rs`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::{ScheduleError, ScheduleTask, TaskContext, TaskKind, TaskStateCell};

/// A task whose pipeline phases just sleep for a configurable duration,
/// optionally failing at a named phase.
pub struct TimedTask {
    pub name: String,
    pub slot: i64,
    pub kind: TaskKind,
    pub work: Duration,
    pub ctx: TaskContext,
    pub state: TaskStateCell,
    pub fail_at: Option<&'static str>,
    pub execute_starts: Arc<AtomicUsize>,
}

impl TimedTask {
    pub fn new(name: &str, slot: i64, kind: TaskKind, work: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            slot,
            kind,
            work,
            ctx: TaskContext::new(),
            state: TaskStateCell::new(),
            fail_at: None,
            execute_starts: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn failing_at(name: &str, slot: i64, kind: TaskKind, phase: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            slot,
            kind,
            work: Duration::from_millis(0),
            ctx: TaskContext::new(),
            state: TaskStateCell::new(),
            fail_at: Some(phase),
            execute_starts: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl ScheduleTask for TimedTask {
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
        self.kind
    }

    async fn pre_execute(&self) -> Result<(), ScheduleError> {
        if self.fail_at == Some("pre") {
            return Err(ScheduleError::KeyNotFound(self.name.clone()));
        }
        Ok(())
    }

    async fn execute(&self) -> Result<(), ScheduleError> {
        self.execute_starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some("execute") {
            return Err(ScheduleError::Other("build failed".into()));
        }
        tokio::time::sleep(self.work).await;
        Ok(())
    }

    async fn post_execute(&self) -> Result<(), ScheduleError> {
        if self.fail_at == Some("post") {
            return Err(ScheduleError::UnsupportedByEngine(self.name.clone()));
        }
        Ok(())
    }
}

/// Initializes a `tracing` subscriber for test output, once per process.
/// Safe to call from every scenario: `try_init` ignores the "already set"
/// error if another test in the same binary got there first.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `f` until it's `true` or `timeout` elapses, sleeping `step` between
/// checks. Returns whether `f` became true.
pub async fn wait_until(timeout: Duration, step: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(step).await;
    }
}

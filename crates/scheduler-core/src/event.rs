//! Structured event stream, for callers that want more than log lines.
//!
//! Every state transition worth logging is also published here, broadcast
//! style, so a caller embedding this scheduler in a larger service can drive
//! its own telemetry off the same call sites instead of scraping `tracing`
//! output.

use crate::task::JobState;

/// A scheduler-level event.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// The dispatch loop has started.
    LoopStarted,
    /// The dispatch loop has returned (shutdown signaled).
    LoopStopped,
    /// A task was popped from `unissued` and handed to a runner, either
    /// alone or as part of a batch.
    Dispatched {
        /// Task names dispatched together (length 1 for a singleton).
        names: Vec<String>,
        /// Total slots requested for this dispatch.
        slots: i64,
    },
    /// A task reached a terminal state.
    TaskTerminal {
        /// The task's name.
        name: String,
        /// The terminal state reached.
        state: JobState,
        /// The human-readable reason, if any.
        reason: String,
    },
    /// The parallel-build collaborator failed to construct; the scheduler
    /// is degrading to single-task execution only.
    CollaboratorDegraded {
        /// The construction failure's message.
        reason: String,
    },
}

/// Multi-producer/multi-consumer event bus, backed by `tokio::sync::broadcast`.
///
/// Late subscribers simply miss earlier events rather than blocking
/// publication, which is the right tradeoff for an observability
/// side-channel.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    /// A new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to the event stream. Events published before a subscriber
    /// attaches are not replayed to it.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A no-op if there are currently no subscribers.
    pub fn publish(&self, event: SchedulerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

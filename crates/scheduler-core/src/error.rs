//! Error classifier (C3) and the unified scheduler error type (C9).

use crate::task::JobState;

/// Every failure shape this scheduler core needs to reason about: the five
/// pipeline-failure shapes, plus the two submission-time failures a
/// submitter can see.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ScheduleError {
    /// The task's context was done (cancelled, or past its deadline) when a
    /// phase checked it.
    #[error("task cancelled: {0}")]
    Cancelled(String),

    /// The object store reported that a key the task needed does not exist.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The index engine cannot build this kind of index at all.
    #[error("unsupported by index engine: {0}")]
    UnsupportedByEngine(String),

    /// The index engine reported a sentinel "finished" condition that the
    /// caller treats as an unconditional success (e.g. an idempotent no-op
    /// rebuild of an already-compact index).
    #[error("engine reported finished: {0}")]
    EnginePretendedFinished(String),

    /// Any other failure. Classified as [`JobState::Retry`] by default: the
    /// classifier is deliberately optimistic about failures it doesn't
    /// recognize.
    #[error("{0}")]
    Other(String),

    /// `Enqueue` rejected the task because `unissued` is already at
    /// `maxTaskNum`. Never reaches the pipeline; never classified.
    #[error("task queue is full")]
    QueueFull,
}

impl ScheduleError {
    /// Maps a pipeline failure to its terminal job state.
    ///
    /// Calling this on [`ScheduleError::QueueFull`] is a programming error:
    /// that variant only ever reaches a submitter, never a task's state.
    pub fn classify(&self) -> JobState {
        match self {
            ScheduleError::Cancelled(_) => JobState::Retry,
            ScheduleError::KeyNotFound(_) => JobState::Failed,
            ScheduleError::UnsupportedByEngine(_) => JobState::Failed,
            ScheduleError::EnginePretendedFinished(_) => JobState::Finished,
            ScheduleError::Other(_) => JobState::Retry,
            ScheduleError::QueueFull => JobState::Retry,
        }
    }

    /// Human-readable reason string to attach to the task's terminal state.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_maps_every_failure_shape_to_its_terminal_state() {
        assert_eq!(
            ScheduleError::Cancelled("ctx done".into()).classify(),
            JobState::Retry
        );
        assert_eq!(
            ScheduleError::KeyNotFound("obj/1".into()).classify(),
            JobState::Failed
        );
        assert_eq!(
            ScheduleError::UnsupportedByEngine("IVF_PQ".into()).classify(),
            JobState::Failed
        );
        assert_eq!(
            ScheduleError::EnginePretendedFinished("already compact".into()).classify(),
            JobState::Finished
        );
        assert_eq!(
            ScheduleError::Other("transient io error".into()).classify(),
            JobState::Retry
        );
    }
}

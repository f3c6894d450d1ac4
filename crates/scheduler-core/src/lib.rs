//! Slot-admission task scheduler for index-build workloads.
//!
//! A node admits a task when the sum of slots already in use plus the
//! candidate's own weight fits under a node-wide capacity figure recomputed
//! on every admission attempt, with one liveness escape: a task heavier than
//! the entire node budget is still admitted the instant nothing else is
//! running, so an oversized task can never deadlock the node.
//!
//! [`Scheduler`] is the entry point: build one with a
//! [`collaborator::NodeCapacitySource`] and a
//! [`collaborator::ParallelBuildCollaborator`], call [`Scheduler::start`],
//! then [`Scheduler::enqueue`] tasks implementing [`task::ScheduleTask`].

#![deny(unsafe_code)]
#![deny(unreachable_pub)]

mod batch;
pub mod collaborator;
mod dispatch;
pub mod error;
pub mod event;
mod mem_hint;
pub mod queue;
mod runner;
pub mod scheduler;
pub mod task;

pub use collaborator::{NodeCapacitySource, ParallelBuildCollaborator, StaticNodeCapacity};
pub use error::ScheduleError;
pub use event::{EventBus, SchedulerEvent};
pub use queue::TaskQueue;
pub use scheduler::Scheduler;
pub use task::{JobState, ScheduleTask, TaskContext, TaskKind, TaskStateCell};

//! Demonstrates the slot-admission scheduler against a handful of mock
//! index-build tasks, so the admission and batching behavior can be watched
//! end to end without a real vector index engine attached.

mod mock_task;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use scheduler_core::collaborator::{NoopParallelBuildCollaborator, StaticNodeCapacity};
use scheduler_core::{NodeCapacitySource, ParallelBuildCollaborator, Scheduler, SchedulerEvent};
use scheduler_support::BuildParallelParams;

use crate::mock_task::MockIndexBuildTask;

/// Runs a scripted batch of mock index-build tasks through the scheduler.
#[derive(Debug, Clone, Parser)]
#[command(name = "scheduler-demo", version, about)]
struct Cli {
    /// Number of mock tasks to submit.
    #[arg(long, env = "SCHEDULER_DEMO_TASKS", default_value_t = 6)]
    tasks: u32,

    /// Node-wide slot capacity to admit against.
    #[arg(long, env = "SCHEDULER_DEMO_CAPACITY", default_value_t = 4)]
    capacity: i64,

    /// Slot weight charged to each mock task.
    #[arg(long, env = "SCHEDULER_DEMO_TASK_SLOTS", default_value_t = 2)]
    task_slots: i64,

    /// Simulated per-task build duration, in milliseconds.
    #[arg(long, env = "SCHEDULER_DEMO_WORK_MS", default_value_t = 150)]
    work_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let params = BuildParallelParams::load(scheduler_support::default_params_path().ok().as_deref())
        .unwrap_or_default();

    if !params.enable {
        tracing::warn!("build-parallel collaborator disabled by configuration; this demo only ever runs sequentially");
    }
    let capacity: Arc<dyn NodeCapacitySource> = Arc::new(StaticNodeCapacity::new(cli.capacity));
    let collaborator: Arc<dyn ParallelBuildCollaborator> = Arc::new(NoopParallelBuildCollaborator);

    let scheduler = Scheduler::new(capacity, collaborator);
    let mut events = scheduler.subscribe_events();
    scheduler.start();

    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());

    let mut tasks = Vec::new();
    for i in 0..cli.tasks {
        let task = Arc::new(MockIndexBuildTask::new(
            format!("index-build-{i}"),
            cli.task_slots,
            Duration::from_millis(cli.work_ms),
        ));
        scheduler.enqueue(task.clone()).await?;
        tasks.push(task);
    }
    println!(
        "submitted {} tasks, capacity={} slots, {} slots each",
        cli.tasks, cli.capacity, cli.task_slots
    );

    let mut finished = 0usize;
    loop {
        if finished >= tasks.len() {
            break;
        }
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("ctrl-c received, closing scheduler without waiting for remaining tasks");
                break;
            }
            evt = events.recv() => {
                match evt {
                    Ok(SchedulerEvent::TaskTerminal { name, state, reason }) => {
                        finished += 1;
                        if reason.is_empty() {
                            println!("{name}: {state:?} ({finished}/{})", tasks.len());
                        } else {
                            println!("{name}: {state:?} ({finished}/{}) — {reason}", tasks.len());
                        }
                    }
                    Ok(SchedulerEvent::Dispatched { names, slots }) => {
                        println!("dispatched {names:?} ({slots} slots)");
                    }
                    Ok(SchedulerEvent::CollaboratorDegraded { reason }) => {
                        eprintln!("warning: collaborator degraded: {reason}");
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    scheduler.close().await;
    println!("scheduler closed");
    Ok(())
}

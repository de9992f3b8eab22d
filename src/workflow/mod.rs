//! Workflow runs, their task graph and the scheduler that drives them

mod graph;
mod scheduler;
mod types;

pub use graph::TaskGraph;
pub use scheduler::Scheduler;
pub use types::{
    Goal, RunStatus, Severity, Task, TaskSpec, TaskStatus, TransitionRecord, WorkflowRun,
};

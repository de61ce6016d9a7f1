//! Runtime system
//!
//! Invocation dispatch, the cooperative scheduler, and process isolation
//! for device runs.

pub mod invoker;
pub mod process;
pub mod scheduler;

pub use invoker::{invoke, invoke_hw, invoke_hw_default, BoundInvocation, InvokeMode, TaskFn};
pub use process::{ProcessRunner, RunnerState};
pub use scheduler::{CoopScheduler, JoinHandle, Scheduler, SchedulerStats};

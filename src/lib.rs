//! cosim: task invocation and execution-mode dispatch
//!
//! A parent [`Task`] instantiates child task instances. Each child runs as
//! a plain call, as a cooperatively scheduled unit (one runs at a time), or, via
//! [`invoke_hw`], against an accelerator device in an isolated process.
//!
//! # Example
//!
//! ```no_run
//! use cosim::{InvokeMode, Seq, Task};
//!
//! fn worker(id: usize, scale: f32) {
//!     println!("worker {} x{}", id, scale);
//! }
//!
//! Task::new().invoke_n(InvokeMode::Join, 4, worker, (Seq::new(), 2.0f32));
//! ```

#![warn(rust_2018_idioms)]

// Public modules
pub mod accessor;
pub mod device;
pub mod error;
pub mod mmap;
pub mod runtime;
pub mod task;

// Utility modules
pub mod util;

// Re-exports
pub use accessor::{Accessor, DeviceAccessor, DeviceArgs, Seq, TaskArgs};
pub use device::{
    install_runtime, DeviceInstance, DeviceParam, DeviceRuntime, DeviceState, EmulatedRuntime,
    KernelArgs, ScalarValue,
};
pub use error::{DeviceError, InvokeError};
pub use mmap::{Direction, Mmap};
pub use runtime::{
    invoke, invoke_hw, invoke_hw_default, BoundInvocation, CoopScheduler, InvokeMode, JoinHandle,
    Scheduler, TaskFn,
};
pub use task::Task;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "cosim";

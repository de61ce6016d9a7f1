//! Error types
//!
//! Device and invocation errors are ordinary values. Process-control
//! failures are not: they go through [`fatal!`](crate::fatal) and abort.

use std::path::PathBuf;

use crate::device::DeviceState;

/// Errors reported by a device runtime or device instance.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// No kernel is known for the given bitstream.
    #[error("Unknown bitstream: {}", .0.display())]
    UnknownBitstream(PathBuf),

    /// A device phase was requested out of order.
    #[error("Device phase violation: cannot {op} in state {state:?}")]
    Phase {
        /// Requested operation.
        op: &'static str,
        /// State the instance was in.
        state: DeviceState,
    },

    /// Arguments were not bound at contiguous indices starting at 0.
    #[error("Argument index gap: expected index {expected}, got {got}")]
    ArgumentGap {
        /// Next index the instance expected.
        expected: usize,
        /// Index that was actually bound.
        got: usize,
    },

    /// The kernel itself reported a failure.
    #[error("Kernel failed: {0}")]
    Kernel(String),
}

/// Errors returned by the in-process hardware invocation path.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// Device runtime failure.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Log a diagnostic and abort the process.
///
/// Used for failures after which device state can no longer be trusted.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let msg = ::std::format!($($arg)*);
        ::tracing::error!("{}", msg);
        ::std::eprintln!("cosim: fatal: {}", msg);
        ::std::process::abort()
    }};
}

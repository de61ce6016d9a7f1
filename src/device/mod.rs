//! Device runtime boundary
//!
//! A [`DeviceRuntime`] turns a bitstream path into a [`DeviceInstance`];
//! the instance is driven through the fixed sequence
//! `set_*_arg* → write_to_device → exec → read_from_device → finish`,
//! after which `compute_time_ns` reports on-device time.

pub mod emulated;

pub use emulated::{EmulatedRuntime, Kernel, KernelArgs};

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::DeviceError;
use crate::mmap::{Element, Mmap, RawBuffer};

/// Execution state of a device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Opened from a bitstream, nothing bound.
    Constructed,
    /// At least one argument bound.
    ArgumentsBound,
    /// Input buffers transferred.
    MemoryWritten,
    /// Kernel has run.
    Executing,
    /// Output buffers transferred back.
    MemoryRead,
    /// Done; timing is valid.
    Finished,
}

/// A scalar register value with its declared width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl ScalarValue {
    /// Integer view, if this is an integer or bool register.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ScalarValue::Bool(v) => Some(v as i64),
            ScalarValue::I8(v) => Some(v as i64),
            ScalarValue::I16(v) => Some(v as i64),
            ScalarValue::I32(v) => Some(v as i64),
            ScalarValue::I64(v) => Some(v),
            ScalarValue::U8(v) => Some(v as i64),
            ScalarValue::U16(v) => Some(v as i64),
            ScalarValue::U32(v) => Some(v as i64),
            ScalarValue::U64(v) => Some(v as i64),
            ScalarValue::F32(_) | ScalarValue::F64(_) => None,
        }
    }

    /// Floating-point view, if this is a float register.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ScalarValue::F32(v) => Some(v as f64),
            ScalarValue::F64(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ScalarValue {
                #[inline]
                fn from(v: $ty) -> Self {
                    ScalarValue::$variant(v)
                }
            }
        )*
    };
}

impl_scalar_from!(
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

/// An argument as bound to a device instance.
#[derive(Debug, Clone)]
pub enum BoundArg {
    /// Register value.
    Scalar(ScalarValue),
    /// Host buffer handle.
    Buffer(RawBuffer),
}

impl BoundArg {
    /// The scalar value, if this is a scalar.
    pub fn scalar(&self) -> Option<ScalarValue> {
        match self {
            BoundArg::Scalar(v) => Some(*v),
            BoundArg::Buffer(_) => None,
        }
    }
}

/// One live binding between a bitstream and a device.
pub trait DeviceInstance {
    /// Bind a scalar parameter by position.
    fn set_scalar_arg(
        &mut self,
        index: usize,
        value: ScalarValue,
    );

    /// Bind a buffer parameter by position.
    fn set_buffer_arg(
        &mut self,
        index: usize,
        buffer: RawBuffer,
    );

    /// Transfer input buffers to the device.
    fn write_to_device(&mut self) -> Result<(), DeviceError>;

    /// Run the kernel.
    fn exec(&mut self) -> Result<(), DeviceError>;

    /// Transfer output buffers back to the host.
    fn read_from_device(&mut self) -> Result<(), DeviceError>;

    /// Wait for the device to settle.
    fn finish(&mut self) -> Result<(), DeviceError>;

    /// On-device execution time. Meaningful after `finish`.
    fn compute_time_ns(&self) -> i64;

    /// Current execution state.
    fn state(&self) -> DeviceState;

    /// Arguments bound so far, by index.
    fn bound_args(&self) -> Vec<Option<BoundArg>>;
}

/// Factory for device instances.
pub trait DeviceRuntime: Send + Sync {
    /// Open a new instance from a bitstream.
    fn open(
        &self,
        bitstream: &Path,
    ) -> Result<Box<dyn DeviceInstance>, DeviceError>;
}

/// Parameter types that can be bound to a device register or buffer slot.
pub trait DeviceParam {
    /// Bind `self` at `index`.
    fn bind_to(
        self,
        instance: &mut dyn DeviceInstance,
        index: usize,
    );
}

macro_rules! impl_scalar_param {
    ($($ty:ty),* $(,)?) => {
        $(
            impl DeviceParam for $ty {
                #[inline]
                fn bind_to(
                    self,
                    instance: &mut dyn DeviceInstance,
                    index: usize,
                ) {
                    instance.set_scalar_arg(index, ScalarValue::from(self));
                }
            }
        )*
    };
}

impl_scalar_param!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl<T: Element> DeviceParam for Mmap<T> {
    #[inline]
    fn bind_to(
        self,
        instance: &mut dyn DeviceInstance,
        index: usize,
    ) {
        instance.set_buffer_arg(index, self.raw());
    }
}

static RUNTIME: Lazy<RwLock<Arc<dyn DeviceRuntime>>> =
    Lazy::new(|| RwLock::new(Arc::new(EmulatedRuntime::new())));

/// Install the process-wide device runtime used by
/// [`invoke_hw_default`](crate::runtime::invoker::invoke_hw_default).
pub fn install_runtime(runtime: Arc<dyn DeviceRuntime>) {
    *RUNTIME.write() = runtime;
}

/// The process-wide device runtime.
pub fn runtime() -> Arc<dyn DeviceRuntime> {
    RUNTIME.read().clone()
}

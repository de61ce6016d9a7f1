//! Software-emulated device runtime
//!
//! Kernels are plain Rust closures registered under a name; a bitstream
//! path selects its kernel by file stem (`build/vadd.xclbin` → `vadd`).
//! Buffers are staged into device-side copies so that transfer direction
//! is honored exactly as on hardware.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::debug;

use super::{BoundArg, DeviceInstance, DeviceRuntime, DeviceState, ScalarValue};
use crate::error::DeviceError;
use crate::mmap::{Element, RawBuffer};

/// A registered kernel body.
pub type Kernel = Arc<dyn Fn(&mut KernelArgs<'_>) -> Result<(), String> + Send + Sync>;

enum Slot {
    Scalar(ScalarValue),
    Buffer { host: RawBuffer, device: Vec<u8> },
}

/// Arguments as the kernel sees them: scalars by value, buffers as the
/// device-side copies.
pub struct KernelArgs<'a> {
    slots: &'a mut [Option<Slot>],
}

impl KernelArgs<'_> {
    /// Number of argument slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no arguments are bound.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Scalar at `index`.
    pub fn scalar(
        &self,
        index: usize,
    ) -> Option<ScalarValue> {
        match self.slots.get(index)? {
            Some(Slot::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    /// Device copy of the buffer at `index`, decoded as `T`.
    pub fn buffer<T: Element>(
        &self,
        index: usize,
    ) -> Option<Vec<T>> {
        match self.slots.get(index)? {
            Some(Slot::Buffer { device, .. }) => {
                let size = std::mem::size_of::<T>();
                let n = device.len() / size;
                let out = (0..n)
                    .map(|i| unsafe {
                        std::ptr::read_unaligned(device.as_ptr().add(i * size) as *const T)
                    })
                    .collect();
                Some(out)
            }
            _ => None,
        }
    }

    /// Overwrite the device copy of the buffer at `index`.
    ///
    /// Returns false if `index` is not a buffer.
    pub fn write_buffer<T: Element>(
        &mut self,
        index: usize,
        data: &[T],
    ) -> bool {
        match self.slots.get_mut(index) {
            Some(Some(Slot::Buffer { device, .. })) => {
                let size = std::mem::size_of::<T>();
                let n = data.len().min(device.len() / size);
                for (i, value) in data.iter().take(n).enumerate() {
                    unsafe {
                        std::ptr::write_unaligned(device.as_mut_ptr().add(i * size) as *mut T, *value);
                    }
                }
                true
            }
            _ => false,
        }
    }
}

/// Runtime that executes registered software kernels.
#[derive(Default)]
pub struct EmulatedRuntime {
    kernels: RwLock<HashMap<String, Kernel>>,
}

impl EmulatedRuntime {
    /// Create a runtime with no kernels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `kernel` under `name`, replacing any previous one.
    pub fn register<F>(
        &self,
        name: impl Into<String>,
        kernel: F,
    ) where
        F: Fn(&mut KernelArgs<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.kernels.write().insert(name.into(), Arc::new(kernel));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_kernel<F>(
        self,
        name: impl Into<String>,
        kernel: F,
    ) -> Self
    where
        F: Fn(&mut KernelArgs<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.register(name, kernel);
        self
    }

    /// Whether a kernel is registered under `name`.
    pub fn has_kernel(
        &self,
        name: &str,
    ) -> bool {
        self.kernels.read().contains_key(name)
    }
}

impl fmt::Debug for EmulatedRuntime {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let names: Vec<String> = self.kernels.read().keys().cloned().collect();
        f.debug_struct("EmulatedRuntime").field("kernels", &names).finish()
    }
}

impl DeviceRuntime for EmulatedRuntime {
    fn open(
        &self,
        bitstream: &Path,
    ) -> Result<Box<dyn DeviceInstance>, DeviceError> {
        let name = bitstream
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| DeviceError::UnknownBitstream(bitstream.to_path_buf()))?;
        let kernel = self
            .kernels
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownBitstream(bitstream.to_path_buf()))?;
        debug!("opened emulated instance for kernel `{}`", name);
        Ok(Box::new(EmulatedInstance::new(name.to_string(), kernel)))
    }
}

/// Instance created by [`EmulatedRuntime`].
pub struct EmulatedInstance {
    name: String,
    kernel: Kernel,
    slots: SmallVec<[Option<Slot>; 8]>,
    next_index: usize,
    deferred: Option<DeviceError>,
    state: DeviceState,
    elapsed: Duration,
}

impl EmulatedInstance {
    fn new(
        name: String,
        kernel: Kernel,
    ) -> Self {
        Self {
            name,
            kernel,
            slots: SmallVec::new(),
            next_index: 0,
            deferred: None,
            state: DeviceState::Constructed,
            elapsed: Duration::ZERO,
        }
    }

    /// Kernel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn bind(
        &mut self,
        index: usize,
        slot: Slot,
    ) {
        if !matches!(self.state, DeviceState::Constructed | DeviceState::ArgumentsBound) {
            self.deferred.get_or_insert(DeviceError::Phase {
                op: "set argument",
                state: self.state,
            });
            return;
        }
        if index != self.next_index {
            self.deferred.get_or_insert(DeviceError::ArgumentGap {
                expected: self.next_index,
                got: index,
            });
        }
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(slot);
        self.next_index = index + 1;
        self.state = DeviceState::ArgumentsBound;
    }

    fn expect_state(
        &self,
        op: &'static str,
        allowed: &[DeviceState],
    ) -> Result<(), DeviceError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DeviceError::Phase {
                op,
                state: self.state,
            })
        }
    }
}

impl DeviceInstance for EmulatedInstance {
    fn set_scalar_arg(
        &mut self,
        index: usize,
        value: ScalarValue,
    ) {
        self.bind(index, Slot::Scalar(value));
    }

    fn set_buffer_arg(
        &mut self,
        index: usize,
        buffer: RawBuffer,
    ) {
        self.bind(
            index,
            Slot::Buffer {
                host: buffer,
                device: Vec::new(),
            },
        );
    }

    fn write_to_device(&mut self) -> Result<(), DeviceError> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        self.expect_state(
            "write to device",
            &[DeviceState::Constructed, DeviceState::ArgumentsBound],
        )?;
        for slot in self.slots.iter_mut().flatten() {
            if let Slot::Buffer { host, device } = slot {
                *device = if host.direction().to_device() {
                    host.read_bytes()
                } else {
                    vec![0u8; host.byte_len()]
                };
            }
        }
        self.state = DeviceState::MemoryWritten;
        Ok(())
    }

    fn exec(&mut self) -> Result<(), DeviceError> {
        self.expect_state("exec", &[DeviceState::MemoryWritten])?;
        let mut args = KernelArgs {
            slots: &mut self.slots,
        };
        let tic = Instant::now();
        let result = (self.kernel)(&mut args);
        self.elapsed = tic.elapsed();
        self.state = DeviceState::Executing;
        debug!("kernel `{}` ran for {:?}", self.name, self.elapsed);
        result.map_err(DeviceError::Kernel)
    }

    fn read_from_device(&mut self) -> Result<(), DeviceError> {
        self.expect_state("read from device", &[DeviceState::Executing])?;
        for slot in self.slots.iter().flatten() {
            if let Slot::Buffer { host, device } = slot {
                if host.direction().from_device() {
                    host.write_bytes(device);
                }
            }
        }
        self.state = DeviceState::MemoryRead;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DeviceError> {
        self.expect_state("finish", &[DeviceState::MemoryRead])?;
        self.state = DeviceState::Finished;
        Ok(())
    }

    fn compute_time_ns(&self) -> i64 {
        i64::try_from(self.elapsed.as_nanos()).unwrap_or(i64::MAX)
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn bound_args(&self) -> Vec<Option<BoundArg>> {
        self.slots
            .iter()
            .map(|slot| {
                slot.as_ref().map(|s| match s {
                    Slot::Scalar(v) => BoundArg::Scalar(*v),
                    Slot::Buffer { host, .. } => BoundArg::Buffer(host.clone()),
                })
            })
            .collect()
    }
}

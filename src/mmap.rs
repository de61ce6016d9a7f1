//! Shared anonymous memory
//!
//! Host buffers handed to a device, and the timing cell used by the
//! process runner, live in `MAP_SHARED | MAP_ANONYMOUS` mappings so that a
//! forked child writes into the same physical pages the parent reads.

use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use parking_lot::Mutex;

/// A raw shared anonymous mapping. Unmapped on drop.
pub struct SharedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// The region is plain memory; every typed view takes its own lock.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Map `len` zero-filled bytes shared between this process and any
    /// child forked after the call.
    pub fn allocate(len: usize) -> io::Result<Self> {
        // mmap rejects zero-length mappings
        let len = len.max(1);
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    /// Mapped length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length requests are rounded up to one byte.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

impl fmt::Debug for SharedRegion {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SharedRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// One shared 8-byte integer.
///
/// Written once by a forked child, read once by the parent after `waitpid`.
#[derive(Debug)]
pub struct SharedCell {
    region: SharedRegion,
}

impl SharedCell {
    /// Map a new cell initialized to zero.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            region: SharedRegion::allocate(std::mem::size_of::<i64>())?,
        })
    }

    /// Store a value.
    #[inline]
    pub fn write(
        &self,
        value: i64,
    ) {
        unsafe { ptr::write_volatile(self.region.as_ptr() as *mut i64, value) }
    }

    /// Load the value.
    #[inline]
    pub fn read(&self) -> i64 {
        unsafe { ptr::read_volatile(self.region.as_ptr() as *const i64) }
    }
}

/// Transfer direction of a buffer argument, seen from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device only.
    ReadOnly,
    /// Device to host only.
    WriteOnly,
    /// Both ways.
    ReadWrite,
}

impl Direction {
    /// Whether the host copy is sent to the device before execution.
    #[inline]
    pub fn to_device(&self) -> bool {
        matches!(self, Direction::ReadOnly | Direction::ReadWrite)
    }

    /// Whether the device copy is brought back after execution.
    #[inline]
    pub fn from_device(&self) -> bool {
        matches!(self, Direction::WriteOnly | Direction::ReadWrite)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Element types that may live in an [`Mmap`]. All-zero bytes must be a
/// valid value.
pub trait Element: sealed::Sealed + Copy + Send + Sync + 'static {}

macro_rules! impl_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {}
        )*
    };
}

impl_element!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

struct BufferInner {
    region: SharedRegion,
    bytes: usize,
    direction: Direction,
    lock: Mutex<()>,
}

/// Untyped handle to a shared buffer, as seen by a device.
#[derive(Clone)]
pub struct RawBuffer {
    inner: Arc<BufferInner>,
}

impl RawBuffer {
    /// Buffer size in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.inner.bytes
    }

    /// Transfer direction.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Copy the host contents out.
    pub fn read_bytes(&self) -> Vec<u8> {
        let _guard = self.inner.lock.lock();
        let mut out = vec![0u8; self.inner.bytes];
        unsafe {
            ptr::copy_nonoverlapping(self.inner.region.as_ptr(), out.as_mut_ptr(), self.inner.bytes);
        }
        out
    }

    /// Overwrite the host contents. Extra input is ignored, missing input
    /// leaves the tail untouched.
    pub fn write_bytes(
        &self,
        data: &[u8],
    ) {
        let _guard = self.inner.lock.lock();
        let n = data.len().min(self.inner.bytes);
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.inner.region.as_ptr(), n);
        }
    }
}

impl fmt::Debug for RawBuffer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("RawBuffer")
            .field("bytes", &self.inner.bytes)
            .field("direction", &self.inner.direction)
            .finish()
    }
}

/// Typed host buffer argument backed by shared memory.
///
/// Cloning clones the handle; all clones see the same elements.
pub struct Mmap<T: Element> {
    raw: RawBuffer,
    len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> Mmap<T> {
    fn allocate(
        direction: Direction,
        len: usize,
    ) -> io::Result<Self> {
        let bytes = len.checked_mul(std::mem::size_of::<T>()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} elements of {} bytes overflow usize", len, std::mem::size_of::<T>()),
            )
        })?;
        let region = SharedRegion::allocate(bytes)?;
        Ok(Self {
            raw: RawBuffer {
                inner: Arc::new(BufferInner {
                    region,
                    bytes,
                    direction,
                    lock: Mutex::new(()),
                }),
            },
            len,
            _marker: PhantomData,
        })
    }

    /// Zero-filled buffer of `len` elements.
    pub fn zeroed(
        direction: Direction,
        len: usize,
    ) -> io::Result<Self> {
        Self::allocate(direction, len)
    }

    /// Buffer initialized from `data`.
    pub fn from_slice(
        direction: Direction,
        data: &[T],
    ) -> io::Result<Self> {
        let buf = Self::allocate(direction, data.len())?;
        buf.with_mut(|dst| dst.copy_from_slice(data));
        Ok(buf)
    }

    /// Input buffer for the device.
    pub fn read_only(data: &[T]) -> io::Result<Self> {
        Self::from_slice(Direction::ReadOnly, data)
    }

    /// Output buffer filled by the device.
    pub fn write_only(len: usize) -> io::Result<Self> {
        Self::zeroed(Direction::WriteOnly, len)
    }

    /// Buffer transferred both ways.
    pub fn read_write(data: &[T]) -> io::Result<Self> {
        Self::from_slice(Direction::ReadWrite, data)
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Transfer direction.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.raw.direction()
    }

    /// Untyped view for device binding.
    #[inline]
    pub fn raw(&self) -> RawBuffer {
        self.raw.clone()
    }

    /// Run `f` over the elements.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&[T]) -> R,
    ) -> R {
        let _guard = self.raw.inner.lock.lock();
        let slice = unsafe {
            std::slice::from_raw_parts(self.raw.inner.region.as_ptr() as *const T, self.len)
        };
        f(slice)
    }

    /// Run `f` over the elements mutably.
    pub fn with_mut<R>(
        &self,
        f: impl FnOnce(&mut [T]) -> R,
    ) -> R {
        let _guard = self.raw.inner.lock.lock();
        let slice = unsafe {
            std::slice::from_raw_parts_mut(self.raw.inner.region.as_ptr() as *mut T, self.len)
        };
        f(slice)
    }

    /// Copy the elements out.
    pub fn to_vec(&self) -> Vec<T> {
        self.with(|s| s.to_vec())
    }
}

impl<T: Element> Clone for Mmap<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            len: self.len,
            _marker: PhantomData,
        }
    }
}

impl<T: Element> fmt::Debug for Mmap<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Mmap")
            .field("len", &self.len)
            .field("direction", &self.direction())
            .finish()
    }
}

//! Invoker
//!
//! Turns a task function plus caller arguments into a [`BoundInvocation`]
//! and dispatches it by [`InvokeMode`]; also hosts the hardware entry point
//! that drives a device instance, in-process or behind a fork.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::accessor::{DeviceArgs, TaskArgs};
use crate::device::{self, DeviceRuntime};
use crate::error::{DeviceError, InvokeError};
use crate::runtime::process::ProcessRunner;
use crate::runtime::scheduler::{JoinHandle, Scheduler};

/// How a child is instantiated relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InvokeMode {
    /// Run now, on the caller's stack, bypassing the scheduler.
    Sequential,
    /// Schedule; the parent scope waits for it on exit.
    #[default]
    Join,
    /// Schedule; nobody waits for it.
    Detach,
}

impl InvokeMode {
    /// Decode the packed form: positive is sequential, zero is join,
    /// negative is detach.
    #[inline]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            r if r > 0 => InvokeMode::Sequential,
            0 => InvokeMode::Join,
            _ => InvokeMode::Detach,
        }
    }

    /// Encode into the packed form.
    #[inline]
    pub fn as_raw(&self) -> i32 {
        match self {
            InvokeMode::Sequential => 1,
            InvokeMode::Join => 0,
            InvokeMode::Detach => -1,
        }
    }
}

impl fmt::Display for InvokeMode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            InvokeMode::Sequential => write!(f, "sequential"),
            InvokeMode::Join => write!(f, "join"),
            InvokeMode::Detach => write!(f, "detach"),
        }
    }
}

impl FromStr for InvokeMode {
    type Err = String;

    /// Accepts a mode name or its packed integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(InvokeMode::Sequential),
            "join" => Ok(InvokeMode::Join),
            "detach" => Ok(InvokeMode::Detach),
            other => other
                .parse::<i32>()
                .map(InvokeMode::from_raw)
                .map_err(|_| format!("invalid invoke mode `{}`", s)),
        }
    }
}

/// A task function callable with parameter tuple `Params`.
///
/// Implemented for every `Fn(P0, ..., Pn)` returning `()`, so a task
/// function with any other return type is rejected at compile time.
pub trait TaskFn<Params>: Clone + Send + 'static {
    /// Call with unpacked parameters.
    fn call(
        &self,
        params: Params,
    );
}

impl<F> TaskFn<()> for F
where
    F: Fn() + Clone + Send + 'static,
{
    #[inline]
    fn call(
        &self,
        _params: (),
    ) {
        self()
    }
}

macro_rules! impl_task_fn {
    ($($param:ident $value:ident),+) => {
        impl<F, $($param),+> TaskFn<($($param,)+)> for F
        where
            F: Fn($($param),+) + Clone + Send + 'static,
        {
            #[inline]
            fn call(
                &self,
                params: ($($param,)+),
            ) {
                let ($($value,)+) = params;
                self($($value),+)
            }
        }
    };
}

impl_task_fn!(P0 p0);
impl_task_fn!(P0 p0, P1 p1);
impl_task_fn!(P0 p0, P1 p1, P2 p2);
impl_task_fn!(P0 p0, P1 p1, P2 p2, P3 p3);
impl_task_fn!(P0 p0, P1 p1, P2 p2, P3 p3, P4 p4);
impl_task_fn!(P0 p0, P1 p1, P2 p2, P3 p3, P4 p4, P5 p5);
impl_task_fn!(P0 p0, P1 p1, P2 p2, P3 p3, P4 p4, P5 p5, P6 p6);
impl_task_fn!(P0 p0, P1 p1, P2 p2, P3 p3, P4 p4, P5 p5, P6 p6, P7 p7);

/// A deferred, zero-argument unit of work.
///
/// Owns the task function and one accessor-produced copy of every
/// parameter. Runs exactly once.
pub struct BoundInvocation {
    name: String,
    call: Box<dyn FnOnce() + Send>,
}

impl BoundInvocation {
    /// Capture `func` with already-accessed `params`.
    pub fn new<F, P>(
        name: impl Into<String>,
        func: F,
        params: P,
    ) -> Self
    where
        F: TaskFn<P>,
        P: Send + 'static,
    {
        Self {
            name: name.into(),
            call: Box::new(move || func.call(params)),
        }
    }

    /// Wrap an arbitrary closure.
    pub fn from_fn<F>(
        name: impl Into<String>,
        f: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name: name.into(),
            call: Box::new(f),
        }
    }

    /// Diagnostic name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute, consuming the unit.
    #[inline]
    pub fn run(self) {
        (self.call)()
    }
}

impl fmt::Debug for BoundInvocation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("BoundInvocation").field("name", &self.name).finish()
    }
}

/// Bind `args` through their accessors and dispatch by `mode`.
///
/// Returns a handle only for [`InvokeMode::Join`].
pub fn invoke<F, P, A>(
    scheduler: &dyn Scheduler,
    mode: InvokeMode,
    name: &str,
    func: F,
    args: &mut A,
) -> Option<JoinHandle>
where
    F: TaskFn<P>,
    P: Send + 'static,
    A: TaskArgs<P>,
{
    let unit = BoundInvocation::new(name, func, args.access_all());
    match mode {
        InvokeMode::Sequential => {
            debug!("running `{}` sequentially", name);
            unit.run();
            None
        }
        InvokeMode::Join => scheduler.schedule(false, unit),
        InvokeMode::Detach => {
            // Detached units have no handle to hand back.
            let _ = scheduler.schedule(true, unit);
            None
        }
    }
}

/// Hardware entry point.
///
/// Without a bitstream the function runs once as a software simulation and
/// wall-clock time is returned. With a bitstream the arguments are bound to
/// a fresh device instance at indices `0..n` and the device time is
/// returned; if `run_in_new_process` is set this happens in a forked child
/// and any failure there aborts the caller.
pub fn invoke_hw<F, P, A>(
    runtime: &dyn DeviceRuntime,
    run_in_new_process: bool,
    func: F,
    bitstream: Option<&Path>,
    mut args: A,
) -> Result<i64, InvokeError>
where
    F: TaskFn<P>,
    A: DeviceArgs<P>,
{
    let Some(bitstream) = bitstream.filter(|p| !p.as_os_str().is_empty()) else {
        info!("running software simulation");
        let params = args.access_all();
        let tic = Instant::now();
        func.call(params);
        return Ok(nanos(tic.elapsed()));
    };

    if run_in_new_process {
        let ns = ProcessRunner::new().run(|| run_on_device(runtime, bitstream, &mut args));
        Ok(ns)
    } else {
        Ok(run_on_device(runtime, bitstream, &mut args)?)
    }
}

/// [`invoke_hw`] against the process-wide runtime.
pub fn invoke_hw_default<F, P, A>(
    run_in_new_process: bool,
    func: F,
    bitstream: Option<&Path>,
    args: A,
) -> Result<i64, InvokeError>
where
    F: TaskFn<P>,
    A: DeviceArgs<P>,
{
    let runtime = device::runtime();
    invoke_hw(runtime.as_ref(), run_in_new_process, func, bitstream, args)
}

/// Open, bind, write, exec, read, finish; return device nanoseconds.
pub(crate) fn run_on_device<P, A>(
    runtime: &dyn DeviceRuntime,
    bitstream: &Path,
    args: &mut A,
) -> Result<i64, DeviceError>
where
    A: DeviceArgs<P>,
{
    let mut instance = runtime.open(bitstream)?;
    let bound = args.bind_all(instance.as_mut());
    debug!("bound {} arguments for {}", bound, bitstream.display());
    instance.write_to_device()?;
    instance.exec()?;
    instance.read_from_device()?;
    instance.finish()?;
    let ns = instance.compute_time_ns();
    info!("{} finished in {} ns of device time", bitstream.display(), ns);
    Ok(ns)
}

fn nanos(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX)
}

//! Parent task scopes
//!
//! A [`Task`] is a parent scope that instantiates child task instances.
//! It does no computation itself; it decides how each child runs and waits
//! for the joined ones when the scope ends.
//!
//! ```no_run
//! use cosim::{Seq, Task, InvokeMode};
//!
//! fn load(id: u32, len: u64) { let _ = (id, len); }
//! fn drain(id: u32) { let _ = id; }
//!
//! Task::new()
//!     .invoke_n(InvokeMode::Join, 4, load, (Seq::new(), 1024u64))
//!     .invoke_mode(InvokeMode::Detach, drain, (0u32,));
//! // all four `load` children have run here; `drain` may not have
//! ```
//!
//! A task is moved only by its owner and never cloned, so exactly one
//! scope is responsible for each joined child.

use std::any;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::accessor::TaskArgs;
use crate::runtime::invoker::{self, InvokeMode, TaskFn};
use crate::runtime::scheduler::{self, JoinHandle, Scheduler};
use crate::util::config;

/// A parent scope owning child invocations.
pub struct Task {
    scheduler: Arc<dyn Scheduler>,
    mode_override: Option<InvokeMode>,
    joined: Vec<JoinHandle>,
    children: usize,
}

impl Task {
    /// A scope on the current thread's scheduler, with the configured mode
    /// override (if any).
    pub fn new() -> Self {
        let mut task = Self::with_scheduler(scheduler::current());
        task.mode_override = config::global().mode_override();
        task
    }

    /// A scope on `scheduler`, without mode override.
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            mode_override: None,
            joined: Vec::new(),
            children: 0,
        }
    }

    /// Force every child of this scope into `mode`.
    pub fn with_mode_override(
        mut self,
        mode: InvokeMode,
    ) -> Self {
        self.mode_override = Some(mode);
        self
    }

    /// Active mode override.
    #[inline]
    pub fn mode_override(&self) -> Option<InvokeMode> {
        self.mode_override
    }

    /// Children instantiated so far, in any mode.
    #[inline]
    pub fn children(&self) -> usize {
        self.children
    }

    /// Joined children that have not finished yet.
    pub fn joined_pending(&self) -> usize {
        self.joined.iter().filter(|h| !h.is_finished()).count()
    }

    /// Instantiate one joined child.
    pub fn invoke<F, P, A>(
        &mut self,
        func: F,
        args: A,
    ) -> &mut Self
    where
        F: TaskFn<P>,
        P: Send + 'static,
        A: TaskArgs<P>,
    {
        self.invoke_with(InvokeMode::Join, 1, "", func, args)
    }

    /// Instantiate one joined child with a diagnostic name.
    pub fn invoke_named<F, P, A>(
        &mut self,
        name: &str,
        func: F,
        args: A,
    ) -> &mut Self
    where
        F: TaskFn<P>,
        P: Send + 'static,
        A: TaskArgs<P>,
    {
        self.invoke_with(InvokeMode::Join, 1, name, func, args)
    }

    /// Instantiate one child in `mode`.
    pub fn invoke_mode<F, P, A>(
        &mut self,
        mode: InvokeMode,
        func: F,
        args: A,
    ) -> &mut Self
    where
        F: TaskFn<P>,
        P: Send + 'static,
        A: TaskArgs<P>,
    {
        self.invoke_with(mode, 1, "", func, args)
    }

    /// Instantiate `count` children in `mode`.
    pub fn invoke_n<F, P, A>(
        &mut self,
        mode: InvokeMode,
        count: usize,
        func: F,
        args: A,
    ) -> &mut Self
    where
        F: TaskFn<P>,
        P: Send + 'static,
        A: TaskArgs<P>,
    {
        self.invoke_with(mode, count, "", func, args)
    }

    /// Canonical form: instantiate `count` children of `func` in `mode`.
    ///
    /// Every replica takes its own pass through the accessors, so a
    /// [`Seq`](crate::Seq) argument advances once per replica.
    pub fn invoke_with<F, P, A>(
        &mut self,
        mode: InvokeMode,
        count: usize,
        name: &str,
        func: F,
        mut args: A,
    ) -> &mut Self
    where
        F: TaskFn<P>,
        P: Send + 'static,
        A: TaskArgs<P>,
    {
        let mode = self.mode_override.unwrap_or(mode);
        let name = if name.is_empty() {
            any::type_name::<F>()
        } else {
            name
        };
        for _ in 0..count {
            let handle = invoker::invoke(
                self.scheduler.as_ref(),
                mode,
                name,
                func.clone(),
                &mut args,
            );
            self.children += 1;
            if let Some(handle) = handle {
                self.joined.push(handle);
            }
        }
        self
    }

    /// Wait for every joined child instantiated so far. Panics if one of
    /// them panicked.
    pub fn join(&mut self) {
        if self.joined.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.joined);
        debug!("joining {} children", handles.len());
        self.scheduler.join(&handles);
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // Running siblings while unwinding could panic again and abort.
        if std::thread::panicking() {
            return;
        }
        self.join();
    }
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("mode_override", &self.mode_override)
            .field("children", &self.children)
            .field("joined_pending", &self.joined_pending())
            .finish()
    }
}

//! Process isolation for hardware runs
//!
//! A [`ProcessRunner`] maps one shared 8-byte cell, forks, lets the child
//! drive the device and publish its timing through the cell, and blocks
//! the parent in `waitpid` until the child is gone. The fork/wait pair is
//! the only synchronization; the cell is written once and read once.
//!
//! There is no timeout: a hung child hangs the parent.

use std::io;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::error::DeviceError;
use crate::fatal;
use crate::mmap::SharedCell;

/// Exit status of a child whose work returned an error.
pub const EXIT_DEVICE_ERROR: i32 = 1;
/// Exit status of a child whose work panicked.
pub const EXIT_PANIC: i32 = 101;

/// Runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Constructed,
    MemoryAllocated,
    Forked,
    ParentWaiting,
    ChildRunning,
    ParentDone,
    ChildExited,
}

/// One isolated device run.
#[derive(Debug)]
pub struct ProcessRunner {
    state: RunnerState,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    /// A runner that has not allocated or forked yet.
    pub fn new() -> Self {
        Self {
            state: RunnerState::Constructed,
        }
    }

    /// Current state.
    pub fn state(&self) -> RunnerState {
        self.state
    }

    fn transition(
        &mut self,
        next: RunnerState,
    ) {
        debug!("process runner: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run `work` in a forked child and return the value it produced.
    ///
    /// Aborts the calling process if the cell cannot be mapped, the fork
    /// fails, or the child does not exit normally with status 0.
    pub fn run<W>(
        mut self,
        work: W,
    ) -> i64
    where
        W: FnOnce() -> Result<i64, DeviceError>,
    {
        let cell = match SharedCell::new() {
            Ok(cell) => cell,
            Err(err) => fatal!("cannot map shared result cell: {}", err),
        };
        self.transition(RunnerState::MemoryAllocated);

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            fatal!("fork failed: {}", io::Error::last_os_error());
        }
        self.transition(RunnerState::Forked);

        if pid == 0 {
            self.transition(RunnerState::ChildRunning);
            self.run_child(&cell, work);
        }

        self.transition(RunnerState::ParentWaiting);
        let status = wait_for(pid);
        if !libc::WIFEXITED(status) {
            if libc::WIFSIGNALED(status) {
                fatal!(
                    "isolated child {} was killed by signal {}",
                    pid,
                    libc::WTERMSIG(status)
                );
            }
            fatal!("isolated child {} terminated abnormally (status {:#x})", pid, status);
        }
        let code = libc::WEXITSTATUS(status);
        if code != libc::EXIT_SUCCESS {
            fatal!("isolated child {} exited with status {}", pid, code);
        }

        let ns = cell.read();
        drop(cell);
        self.transition(RunnerState::ParentDone);
        ns
    }

    fn run_child<W>(
        mut self,
        cell: &SharedCell,
        work: W,
    ) -> !
    where
        W: FnOnce() -> Result<i64, DeviceError>,
    {
        let code = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(Ok(ns)) => {
                cell.write(ns);
                libc::EXIT_SUCCESS
            }
            Ok(Err(err)) => {
                error!("device invocation failed in isolated child: {}", err);
                EXIT_DEVICE_ERROR
            }
            Err(_) => {
                error!("device invocation panicked in isolated child");
                EXIT_PANIC
            }
        };
        self.transition(RunnerState::ChildExited);
        // _exit: the parent's buffered stdio and atexit handlers are not ours.
        unsafe { libc::_exit(code) }
    }
}

fn wait_for(pid: libc::pid_t) -> libc::c_int {
    let mut status: libc::c_int = 0;
    loop {
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret == pid {
            return status;
        }
        let err = io::Error::last_os_error();
        if ret < 0 && err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        fatal!("waitpid({}) failed: {}", pid, err);
    }
}

//! Scheduled units and their completion handles.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicU8, AtomicUsize, Ordering},
    Arc,
};

use crate::runtime::invoker::BoundInvocation;

/// Unique identifier of a scheduled unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(pub usize);

impl UnitId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Unit({})", self.0)
    }
}

/// Unit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Waiting in the run queue.
    Ready = 0,
    /// Currently executing.
    Running = 1,
    /// Returned.
    Finished = 2,
    /// Unwound out of its body.
    Panicked = 3,
}

impl UnitState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => UnitState::Running,
            2 => UnitState::Finished,
            3 => UnitState::Panicked,
            _ => UnitState::Ready,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug)]
struct UnitShared {
    id: UnitId,
    name: String,
    state: AtomicU8,
}

/// Completion handle for a joined unit.
#[derive(Debug, Clone)]
pub struct JoinHandle {
    shared: Arc<UnitShared>,
}

impl JoinHandle {
    /// Unit id.
    #[inline]
    pub fn id(&self) -> UnitId {
        self.shared.id
    }

    /// Diagnostic name of the unit.
    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> UnitState {
        UnitState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Whether the unit is done, normally or not.
    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), UnitState::Finished | UnitState::Panicked)
    }

    /// Whether the unit panicked.
    #[inline]
    pub fn is_panicked(&self) -> bool {
        self.state() == UnitState::Panicked
    }
}

/// A bound invocation sitting in a run queue.
pub struct ScheduledUnit {
    shared: Arc<UnitShared>,
    detached: bool,
    unit: BoundInvocation,
}

impl ScheduledUnit {
    /// Wrap `unit` under `id`.
    pub fn new(
        id: UnitId,
        detached: bool,
        unit: BoundInvocation,
    ) -> Self {
        Self {
            shared: Arc::new(UnitShared {
                id,
                name: unit.name().to_string(),
                state: AtomicU8::new(UnitState::Ready.as_u8()),
            }),
            detached,
            unit,
        }
    }

    /// Unit id.
    #[inline]
    pub fn id(&self) -> UnitId {
        self.shared.id
    }

    /// Diagnostic name of the unit.
    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether the owner gave up joining this unit.
    #[inline]
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// A completion handle sharing this unit's state.
    #[inline]
    pub fn handle(&self) -> JoinHandle {
        JoinHandle {
            shared: self.shared.clone(),
        }
    }

    /// Execute the unit, updating its state around the call. Returns
    /// false if the body panicked; the panic does not propagate.
    pub fn run(self) -> bool {
        self.shared.state.store(UnitState::Running.as_u8(), Ordering::SeqCst);
        let unit = self.unit;
        let completed = panic::catch_unwind(AssertUnwindSafe(move || unit.run())).is_ok();
        let state = if completed {
            UnitState::Finished
        } else {
            UnitState::Panicked
        };
        self.shared.state.store(state.as_u8(), Ordering::SeqCst);
        completed
    }
}

impl fmt::Debug for ScheduledUnit {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ScheduledUnit")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("detached", &self.detached)
            .finish()
    }
}

/// Generator for unit ids.
#[derive(Debug, Default)]
pub struct UnitIdGenerator {
    next_id: AtomicUsize,
}

impl UnitIdGenerator {
    /// Create a new generator starting at 0.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next id.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> UnitId {
        UnitId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

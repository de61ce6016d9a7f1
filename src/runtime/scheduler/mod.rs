//! Cooperative scheduler
//!
//! The invoker only needs two things from a scheduler: enqueue a unit
//! (optionally detached) and wait for a set of joined units. [`Scheduler`]
//! is that seam; [`CoopScheduler`] is the implementation used to emulate
//! concurrent hardware modules in software.
//!
//! Every unit runs on its own OS thread, so it has its own stack and can be
//! suspended anywhere. A baton guarded by one mutex and condition variable
//! lets exactly one context run at a time: a unit, or an outside thread that
//! is driving the scheduler. Yield points and joins pass the baton on;
//! nothing runs in parallel.
//!
//! Waiting in [`Scheduler::join`] only hands the baton to joined units and
//! to contexts that are already running. Detached units start at a yield
//! point, from [`Scheduler::run_until_idle`], or when nothing else can make
//! progress.

pub mod queue;
pub mod unit;


pub use queue::{ContextId, RunQueue, Runnable};
pub use unit::{JoinHandle, ScheduledUnit, UnitId, UnitIdGenerator, UnitState};

use std::cell::{Cell, RefCell};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error};

use crate::fatal;
use crate::runtime::invoker::BoundInvocation;

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total units scheduled.
    pub scheduled: AtomicUsize,
    /// Units scheduled detached.
    pub detached: AtomicUsize,
    /// Units that ran to completion.
    pub completed: AtomicUsize,
    /// Yields that switched to another context.
    pub yields: AtomicUsize,
    /// Most units started and not yet finished at once.
    pub peak_live: AtomicUsize,
}

impl SchedulerStats {
    /// Record a scheduled unit.
    #[inline]
    pub fn record_scheduled(
        &self,
        detached: bool,
    ) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        if detached {
            self.detached.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Record a completed unit.
    #[inline]
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a yield that switched contexts.
    #[inline]
    pub fn record_yield(&self) {
        self.yields.fetch_add(1, Ordering::SeqCst);
    }

    /// Update the peak number of live units.
    #[inline]
    pub fn update_live(
        &self,
        current: usize,
    ) {
        self.peak_live.fetch_max(current, Ordering::SeqCst);
    }

    /// Units scheduled so far.
    #[inline]
    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Units completed so far.
    #[inline]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// The scheduler collaborator consumed by the invoker.
pub trait Scheduler: Send + Sync {
    /// Enqueue a unit. Joined units return a handle; detached units never
    /// report completion.
    fn schedule(
        &self,
        detach: bool,
        unit: BoundInvocation,
    ) -> Option<JoinHandle>;

    /// Return once every handle is finished. Panics if one of them
    /// panicked.
    fn join(
        &self,
        handles: &[JoinHandle],
    );

    /// Suspend the caller and let the next runnable context go first.
    /// Returns false, without suspending, if nothing else is runnable.
    fn yield_now(&self) -> bool;

    /// Keep yielding until nothing else is runnable. Returns how many units
    /// finished meanwhile.
    fn run_until_idle(&self) -> usize;

    /// Number of units that have not started.
    fn pending(&self) -> usize;

    /// Scheduler statistics.
    fn stats(&self) -> &SchedulerStats;
}

static CONTEXT_IDS: AtomicUsize = AtomicUsize::new(0);

fn next_context() -> ContextId {
    CONTEXT_IDS.fetch_add(1, Ordering::SeqCst)
}

/// A context parked in `join`.
#[derive(Debug)]
struct Blocked {
    context: ContextId,
    handles: Vec<JoinHandle>,
}

#[derive(Debug, Default)]
struct Core {
    queue: RunQueue,
    /// Context allowed to run; `None` while no thread drives the scheduler.
    holder: Option<ContextId>,
    blocked: Vec<Blocked>,
    live: usize,
}

impl Core {
    /// Move every waiter whose handles are all finished to the ready queue.
    fn wake_waiters(&mut self) {
        let (done, waiting): (Vec<_>, Vec<_>) = self
            .blocked
            .drain(..)
            .partition(|b| b.handles.iter().all(JoinHandle::is_finished));
        self.blocked = waiting;
        for waiter in done {
            self.queue.push_resume(waiter.context);
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    core: Mutex<Core>,
    baton: Condvar,
    ids: UnitIdGenerator,
    stats: SchedulerStats,
}

/// Cooperative scheduler giving each unit its own stack.
///
/// Clones share the same queue and units.
#[derive(Debug, Default, Clone)]
pub struct CoopScheduler {
    shared: Arc<Shared>,
}

impl CoopScheduler {
    /// Create an empty scheduler.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Units queued detached that have not started.
    pub fn detached_pending(&self) -> usize {
        self.shared.core.lock().queue.detached_len()
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    /// Whether the calling thread is one of this scheduler's units.
    fn on_unit_thread(&self) -> bool {
        UNIT_OF.with(Cell::get) == Some(self.key())
    }

    /// Wait for the baton to be free or already ours, then hold it.
    fn acquire(
        &self,
        core: &mut MutexGuard<'_, Core>,
        me: ContextId,
    ) {
        while core.holder.is_some_and(|holder| holder != me) {
            self.shared.baton.wait(core);
        }
        core.holder = Some(me);
    }

    /// Wait until the baton is handed to `me`.
    fn park(
        &self,
        core: &mut MutexGuard<'_, Core>,
        me: ContextId,
    ) {
        while core.holder != Some(me) {
            self.shared.baton.wait(core);
        }
    }

    /// An outside thread stops driving the scheduler. Units keep the baton.
    fn release(
        &self,
        core: &mut MutexGuard<'_, Core>,
        me: ContextId,
    ) {
        if !self.on_unit_thread() && core.holder == Some(me) {
            core.holder = None;
            self.shared.baton.notify_all();
        }
    }

    /// Hand the baton to `next`, starting its thread if it is a new unit.
    fn hand_off(
        &self,
        core: &mut MutexGuard<'_, Core>,
        next: Option<Runnable>,
    ) {
        match next {
            Some(Runnable::Resume(context)) => core.holder = Some(context),
            Some(Runnable::Start(unit)) => {
                let context = next_context();
                core.holder = Some(context);
                core.live += 1;
                self.shared.stats.update_live(core.live);
                self.spawn(context, unit);
            }
            None => {
                let stuck = core
                    .blocked
                    .iter()
                    .flat_map(|b| b.handles.iter())
                    .find(|h| !h.is_finished());
                if let Some(waiting) = stuck {
                    fatal!(
                        "deadlock: joined unit {} ({}) is {:?} but nothing is runnable",
                        waiting.id(),
                        waiting.name(),
                        waiting.state()
                    );
                }
                core.holder = None;
            }
        }
        self.shared.baton.notify_all();
    }

    fn spawn(
        &self,
        context: ContextId,
        unit: ScheduledUnit,
    ) {
        let id = unit.id();
        let scheduler = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}#{}", unit.name(), id.inner()))
            .spawn(move || scheduler.run_unit(context, unit));
        if let Err(err) = spawned {
            fatal!("cannot start a thread for {}: {}", id, err);
        }
    }

    /// Body of a unit thread.
    fn run_unit(
        self,
        context: ContextId,
        unit: ScheduledUnit,
    ) {
        CONTEXT.with(|c| c.set(Some(context)));
        UNIT_OF.with(|u| u.set(Some(self.key())));
        set_current(Arc::new(self.clone()));
        self.park(&mut self.shared.core.lock(), context);

        debug!("running {:?}", unit);
        let handle = unit.handle();
        if !unit.run() {
            error!("{} ({}) panicked", handle.id(), handle.name());
        }
        self.shared.stats.record_completed();

        let mut core = self.shared.core.lock();
        core.live -= 1;
        core.wake_waiters();
        let next = core.queue.pop();
        self.hand_off(&mut core, next);
    }
}

impl Scheduler for CoopScheduler {
    fn schedule(
        &self,
        detach: bool,
        unit: BoundInvocation,
    ) -> Option<JoinHandle> {
        let scheduled = ScheduledUnit::new(self.shared.ids.next(), detach, unit);
        let handle = (!detach).then(|| scheduled.handle());
        debug!("scheduled {:?}", scheduled);
        self.shared.stats.record_scheduled(detach);
        self.shared.core.lock().queue.push(scheduled);
        handle
    }

    fn join(
        &self,
        handles: &[JoinHandle],
    ) {
        if !handles.iter().all(JoinHandle::is_finished) {
            let me = this_context();
            let mut core = self.shared.core.lock();
            self.acquire(&mut core, me);
            if !handles.iter().all(JoinHandle::is_finished) {
                core.blocked.push(Blocked {
                    context: me,
                    handles: handles.to_vec(),
                });
                let next = core.queue.pop();
                self.hand_off(&mut core, next);
                self.park(&mut core, me);
            }
            self.release(&mut core, me);
        }
        if let Some(failed) = handles.iter().find(|h| h.is_panicked()) {
            panic!("joined unit {} ({}) panicked", failed.id(), failed.name());
        }
    }

    fn yield_now(&self) -> bool {
        let me = this_context();
        let mut core = self.shared.core.lock();
        self.acquire(&mut core, me);
        let next = core.queue.pop();
        let switched = next.is_some();
        if switched {
            core.queue.push_resume(me);
            self.hand_off(&mut core, next);
            self.park(&mut core, me);
            self.shared.stats.record_yield();
        }
        self.release(&mut core, me);
        switched
    }

    fn run_until_idle(&self) -> usize {
        let before = self.shared.stats.completed();
        while self.yield_now() {}
        self.shared.stats.completed() - before
    }

    fn pending(&self) -> usize {
        self.shared.core.lock().queue.unstarted()
    }

    fn stats(&self) -> &SchedulerStats {
        &self.shared.stats
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn Scheduler>>> = const { RefCell::new(None) };
    static CONTEXT: Cell<Option<ContextId>> = const { Cell::new(None) };
    static UNIT_OF: Cell<Option<usize>> = const { Cell::new(None) };
}

/// The calling thread's context id.
fn this_context() -> ContextId {
    CONTEXT.with(|c| match c.get() {
        Some(id) => id,
        None => {
            let id = next_context();
            c.set(Some(id));
            id
        }
    })
}

/// The scheduler of the current thread, created on first use.
pub fn current() -> Arc<dyn Scheduler> {
    CURRENT.with(|cell| {
        cell.borrow_mut()
            .get_or_insert_with(|| Arc::new(CoopScheduler::new()) as Arc<dyn Scheduler>)
            .clone()
    })
}

/// Replace the current thread's scheduler, returning the previous one.
pub fn set_current(scheduler: Arc<dyn Scheduler>) -> Option<Arc<dyn Scheduler>> {
    CURRENT.with(|cell| cell.borrow_mut().replace(scheduler))
}

/// Yield point on the current thread's scheduler.
pub fn yield_now() -> bool {
    current().yield_now()
}

/// Yield on the current thread's scheduler until nothing else is runnable,
/// detached units included.
pub fn run_until_idle() -> usize {
    current().run_until_idle()
}

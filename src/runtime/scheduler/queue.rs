//! Run queue for the cooperative scheduler
//!
//! Two FIFOs. `ready` holds joined units that have not started and
//! suspended contexts waiting to resume; `detached` holds detached units
//! that have not started. Detached work is only picked when nothing is
//! ready, so waiting on joined children never starts a detached one.
//!
//! The queue itself is not locked; it lives inside the scheduler's baton
//! mutex.

use std::collections::VecDeque;

use super::unit::ScheduledUnit;

/// Identifies one thread of control driving a scheduler.
pub type ContextId = usize;

/// Something that can be handed the baton.
#[derive(Debug)]
pub enum Runnable {
    /// A unit that has not run yet.
    Start(ScheduledUnit),
    /// A context suspended at a yield point or a join.
    Resume(ContextId),
}

/// The scheduler's run queue.
#[derive(Debug, Default)]
pub struct RunQueue {
    ready: VecDeque<Runnable>,
    detached: VecDeque<ScheduledUnit>,
}

impl RunQueue {
    /// Create a new empty queue.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a unit that has not started.
    pub fn push(
        &mut self,
        unit: ScheduledUnit,
    ) {
        if unit.is_detached() {
            self.detached.push_back(unit);
        } else {
            self.ready.push_back(Runnable::Start(unit));
        }
    }

    /// Queue a suspended context.
    #[inline]
    pub fn push_resume(
        &mut self,
        context: ContextId,
    ) {
        self.ready.push_back(Runnable::Resume(context));
    }

    /// Next thing to run: the ready queue first, then the oldest detached
    /// unit.
    pub fn pop(&mut self) -> Option<Runnable> {
        self.ready
            .pop_front()
            .or_else(|| self.detached.pop_front().map(Runnable::Start))
    }

    /// Number of queued entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.ready.len() + self.detached.len()
    }

    /// Whether nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.detached.is_empty()
    }

    /// Units that have not started yet.
    pub fn unstarted(&self) -> usize {
        let joined = self
            .ready
            .iter()
            .filter(|r| matches!(r, Runnable::Start(_)))
            .count();
        joined + self.detached.len()
    }

    /// Detached units that have not started yet.
    #[inline]
    pub fn detached_len(&self) -> usize {
        self.detached.len()
    }
}

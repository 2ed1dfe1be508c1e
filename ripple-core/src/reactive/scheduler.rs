//! Scheduler
//!
//! The scheduler owns the notion of a tick: the unit of batched
//! propagation. Writes queue the written cell's subscriber set; one flush
//! later runs every distinct subscribed effect once.
//!
//! # Algorithm
//!
//! 1. `enqueue` adds a subscriber set to the queued collection. The first
//!    addition schedules a flush.
//! 2. A flush moves the queued collection into the active collection and
//!    walks it in insertion order. Sets are resolved against live
//!    membership at that point, not when they were queued.
//! 3. Within a flush an effect runs only if it is live, still subscribed,
//!    and has not run in this flush already. Derived recompute effects are
//!    also skipped when they already saw the set's current version. An effect
//!    that ran already but is stale again is carried over to the next flush.
//! 4. Writes made by effects during a flush are queued for the next flush.
//!    Derived cells that change while recomputing append their subscriber
//!    set to the active collection instead: that is the same tick's
//!    propagation, not a new write.
//!
//! There is no topological ordering. Derived cells stay consistent because
//! a read of a dirty derived cell recomputes it on the spot.
//!
//! # Driving the Scheduler
//!
//! Nothing runs a scheduled flush on its own. It runs at the next
//! `tick().await`, `flush()` or `settle()`, whichever comes first. A host
//! event loop calls `flush()` once per turn.

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use super::subscriber::{EffectId, SubscriberSet};
use crate::error::{EffectPanic, FlushError};

/// Flush passes `settle` allows before giving up.
pub const DEFAULT_SETTLE_PASSES: usize = 100;

/// Which flush a subscriber set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Batch {
    /// The flush currently running, if any; otherwise the next one.
    Current,
    /// The next flush.
    Next,
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

#[derive(Default)]
struct Scheduler {
    /// Sets being delivered by the running flush.
    active: IndexMap<u64, Rc<SubscriberSet>>,
    /// Sets waiting for the next flush.
    queued: IndexMap<u64, Rc<SubscriberSet>>,
    processed: HashSet<EffectId>,
    /// Index of the next active set to deliver.
    cursor: usize,
    flushing: bool,
    /// Number of completed flushes.
    completed: u64,
    /// Ticks polled while a flush was running.
    waiters: Vec<Waker>,
}

impl Scheduler {
    fn enqueue(&mut self, set: &Rc<SubscriberSet>, batch: Batch) {
        let id = set.id();

        if batch == Batch::Current && self.flushing {
            match self.active.get_index_of(&id) {
                // Already delivered in this pass; fall through to the next one.
                Some(index) if index < self.cursor => {}
                Some(_) => return,
                None => {
                    self.active.insert(id, Rc::clone(set));
                    return;
                }
            }
        }

        let was_idle = self.queued.is_empty();
        self.queued.entry(id).or_insert_with(|| Rc::clone(set));
        if was_idle {
            trace!(set = id, "flush scheduled");
        }
    }

    fn begin(&mut self) -> bool {
        if self.flushing || self.queued.is_empty() {
            return false;
        }
        self.active = mem::take(&mut self.queued);
        self.cursor = 0;
        self.flushing = true;
        true
    }

    fn next_set(&mut self) -> Option<Rc<SubscriberSet>> {
        let (_, set) = self.active.get_index(self.cursor)?;
        let set = Rc::clone(set);
        self.cursor += 1;
        Some(set)
    }

    fn finish(&mut self) -> IndexMap<u64, Rc<SubscriberSet>> {
        self.processed.clear();
        self.cursor = 0;
        self.flushing = false;
        self.completed += 1;
        mem::take(&mut self.active)
    }

    /// The flush a tick requested now has to wait for.
    fn tick_target(&self) -> u64 {
        match (self.flushing, self.queued.is_empty()) {
            (true, false) => self.completed + 2,
            (true, true) | (false, false) => self.completed + 1,
            (false, true) => self.completed,
        }
    }
}

pub(crate) fn enqueue(set: &Rc<SubscriberSet>, batch: Batch) {
    SCHEDULER.with(|scheduler| scheduler.borrow_mut().enqueue(set, batch));
}

/// Check if writes are waiting for a flush.
pub fn is_flush_scheduled() -> bool {
    SCHEDULER.with(|scheduler| !scheduler.borrow().queued.is_empty())
}

/// Check if a flush is running.
pub fn is_flushing() -> bool {
    SCHEDULER.with(|scheduler| scheduler.borrow().flushing)
}

fn completed_flushes() -> u64 {
    SCHEDULER.with(|scheduler| scheduler.borrow().completed)
}

/// Run one flush pass, if one is scheduled.
///
/// Every effect gets its own panic boundary: a panicking effect does not
/// stop the pass. Panics are collected and returned once the pass is over.
/// Calling this from inside a running flush does nothing.
pub fn flush() -> Result<(), FlushError> {
    if !SCHEDULER.with(|scheduler| scheduler.borrow_mut().begin()) {
        return Ok(());
    }

    let mut failures = Vec::new();
    let mut invoked = 0usize;

    while let Some(set) = SCHEDULER.with(|scheduler| scheduler.borrow_mut().next_set()) {
        for effect in set.subscribers() {
            let id = effect.id();
            let Some(seen) = set.seen_by(id) else {
                continue;
            };
            if !effect.is_live() {
                continue;
            }
            let stale = seen < set.version();

            let processed =
                SCHEDULER.with(|scheduler| scheduler.borrow().processed.contains(&id));
            if processed {
                if stale {
                    enqueue(&set, Batch::Next);
                }
                continue;
            }
            // A recompute effect that already caught up was refreshed by a read.
            if !stale && effect.is_recompute() {
                continue;
            }
            SCHEDULER.with(|scheduler| scheduler.borrow_mut().processed.insert(id));

            invoked += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| effect.run())) {
                let failure = EffectPanic::from_payload(id, payload);
                warn!(effect = %id, message = %failure.message, "effect panicked during flush");
                failures.push(failure);
            }
        }
    }

    let (delivered, waiters) = SCHEDULER.with(|scheduler| {
        let mut scheduler = scheduler.borrow_mut();
        (scheduler.finish(), mem::take(&mut scheduler.waiters))
    });
    debug!(
        sets = delivered.len(),
        invoked,
        rescheduled = is_flush_scheduled(),
        "flush complete"
    );
    drop(delivered);
    for waker in waiters {
        waker.wake();
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(FlushError::EffectsPanicked(failures))
    }
}

/// Flush until nothing is scheduled, using [`DEFAULT_SETTLE_PASSES`].
pub fn settle() -> Result<(), FlushError> {
    settle_with_limit(DEFAULT_SETTLE_PASSES)
}

/// Flush until nothing is scheduled, at most `max_passes` times.
///
/// Fails with [`FlushError::Unsettled`] if effects keep writing to their own
/// dependencies. Panics from all passes are reported together.
pub fn settle_with_limit(max_passes: usize) -> Result<(), FlushError> {
    if is_flushing() {
        return Ok(());
    }

    let mut failures = Vec::new();
    for _ in 0..max_passes {
        if !is_flush_scheduled() {
            break;
        }
        if let Err(err) = flush() {
            match err {
                FlushError::EffectsPanicked(panics) => failures.extend(panics),
                other => return Err(other),
            }
        }
    }

    if is_flush_scheduled() {
        return Err(FlushError::Unsettled { passes: max_passes });
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(FlushError::EffectsPanicked(failures))
    }
}

/// Returns a future that resolves after the pending flush has completed.
///
/// If no flush is pending, it resolves immediately. If nothing else has run
/// the flush by the time the future is polled, polling runs it. Polled from
/// inside a running flush, it stays pending until that flush completes.
///
/// ```rust
/// # async fn demo() -> Result<(), ripple_core::FlushError> {
/// use ripple_core::{create_signal, tick};
///
/// let (_count, set_count) = create_signal(0);
/// set_count.set(1);
/// tick().await?;
/// # Ok(())
/// # }
/// ```
pub fn tick() -> Tick {
    let target = SCHEDULER.with(|scheduler| scheduler.borrow().tick_target());
    Tick { target }
}

/// Future returned by [`tick`].
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Tick {
    target: u64,
}

impl Future for Tick {
    type Output = Result<(), FlushError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut failures = Vec::new();
        while completed_flushes() < self.target && is_flush_scheduled() && !is_flushing() {
            if let Err(err) = flush() {
                match err {
                    FlushError::EffectsPanicked(panics) => failures.extend(panics),
                    other => return Poll::Ready(Err(other)),
                }
            }
        }

        if completed_flushes() < self.target && is_flushing() {
            SCHEDULER.with(|scheduler| {
                scheduler.borrow_mut().waiters.push(cx.waker().clone());
            });
            return Poll::Pending;
        }

        if failures.is_empty() {
            Poll::Ready(Ok(()))
        } else {
            Poll::Ready(Err(FlushError::EffectsPanicked(failures)))
        }
    }
}

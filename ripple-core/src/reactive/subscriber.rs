//! Subscriber types for the reactive system.
//!
//! A subscriber is an effect that read a signal (or derived cell) while it
//! was the active tracking context. Every cell owns one [`SubscriberSet`];
//! every effect owns the [`Subscription`] handles that take it out again.
//!
//! # Generations
//!
//! An effect rebuilds its dependency set on every run. Each run carries a
//! fresh generation number, and a read stamps the subscriber entry with it.
//! A handle only removes the entry it created if the entry still carries
//! the handle's generation, so releasing the previous run's handles after a
//! run drops exactly the dependencies that were not read again.
//!
//! # Versions
//!
//! Every set has a version counter that moves on each write to the cell it
//! belongs to. A read records the version the subscriber saw. The scheduler
//! skips subscribers that already saw the latest version, which is how one
//! write never runs the same effect twice through a diamond.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::context::{untrack, ReactiveContext};
use super::effect::EffectNode;

/// Unique identifier for an effect.
///
/// Every effect (user effects and the recompute effects owned by derived
/// cells) gets one when created. Subscriber sets are keyed by it, which is
/// what keeps them free of duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

/// Teardown returned by an on-subscribe hook.
///
/// Runs when the subscriber count of the cell drops back to zero.
pub type Cleanup = Box<dyn FnOnce()>;

pub(crate) type SubscribeHook = Box<dyn Fn() -> Option<Cleanup>>;

/// Counter for generating unique subscriber set IDs.
static SET_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

struct Subscriber {
    effect: Rc<EffectNode>,
    /// Run generation of the effect that last read the cell.
    generation: u64,
    /// Version of the set observed by that read.
    seen: u64,
}

/// The subscribers of one reactive cell.
pub(crate) struct SubscriberSet {
    id: u64,
    version: Cell<u64>,
    entries: RefCell<IndexMap<EffectId, Subscriber>>,
    on_subscribe: Option<SubscribeHook>,
    /// Set once the hook has returned; cleared when the set empties.
    attached: Cell<bool>,
    cleanup: RefCell<Option<Cleanup>>,
}

impl SubscriberSet {
    pub(crate) fn new(on_subscribe: Option<SubscribeHook>) -> Rc<Self> {
        Rc::new(Self {
            id: SET_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            version: Cell::new(0),
            entries: RefCell::new(IndexMap::new()),
            on_subscribe,
            attached: Cell::new(false),
            cleanup: RefCell::new(None),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.get()
    }

    pub(crate) fn bump_version(&self) {
        self.version.set(self.version.get() + 1);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Register the active tracking context, if any, as a subscriber.
    ///
    /// Reading twice in the same run is a no-op. The on-subscribe hook runs
    /// untracked, after the entry is in place, on the 0 -> 1 transition. A
    /// hook that panicked is retried by the next tracked read.
    pub(crate) fn track(self: &Rc<Self>) {
        let Some(tracker) = ReactiveContext::current() else {
            return;
        };
        let effect_id = tracker.effect.id();

        let restamped = {
            let mut entries = self.entries.borrow_mut();
            let version = self.version.get();
            match entries.get_mut(&effect_id) {
                Some(entry) => {
                    entry.seen = version;
                    let restamped = entry.generation != tracker.generation;
                    entry.generation = tracker.generation;
                    restamped
                }
                None => {
                    entries.insert(
                        effect_id,
                        Subscriber {
                            effect: Rc::clone(&tracker.effect),
                            generation: tracker.generation,
                            seen: version,
                        },
                    );
                    true
                }
            }
        };

        if restamped {
            ReactiveContext::track(Subscription {
                set: Rc::downgrade(self),
                effect: effect_id,
                generation: tracker.generation,
            });
        }

        if !self.attached.get() {
            if let Some(hook) = &self.on_subscribe {
                let cleanup = untrack(hook);
                if self.len() == 0 {
                    // Emptied while the hook ran.
                    if let Some(cleanup) = cleanup {
                        cleanup();
                    }
                } else {
                    *self.cleanup.borrow_mut() = cleanup;
                    self.attached.set(true);
                }
            }
        }
    }

    /// Remove a subscriber.
    ///
    /// With `Some(generation)` the entry is only removed if it still carries
    /// that generation. Runs the cleanup on the 1 -> 0 transition.
    fn remove(&self, effect: EffectId, generation: Option<u64>) {
        let emptied = {
            let mut entries = self.entries.borrow_mut();
            let matches = entries
                .get(&effect)
                .is_some_and(|entry| generation.map_or(true, |g| entry.generation == g));
            if !matches {
                return;
            }
            entries.shift_remove(&effect);
            entries.is_empty()
        };

        if emptied {
            self.attached.set(false);
            let cleanup = self.cleanup.borrow_mut().take();
            if let Some(cleanup) = cleanup {
                cleanup();
            }
        }
    }

    /// Snapshot of the subscribed effects in insertion order.
    pub(crate) fn subscribers(&self) -> Vec<Rc<EffectNode>> {
        self.entries
            .borrow()
            .values()
            .map(|entry| Rc::clone(&entry.effect))
            .collect()
    }

    /// Version last seen by `effect`, or `None` if it is no longer subscribed.
    pub(crate) fn seen_by(&self, effect: EffectId) -> Option<u64> {
        self.entries.borrow().get(&effect).map(|entry| entry.seen)
    }

    /// Tell every subscriber that the cell is about to change.
    ///
    /// Only derived recompute effects react; they mark their cell dirty and
    /// pass the call on to their own subscribers.
    pub(crate) fn invalidate(&self) {
        for effect in self.subscribers() {
            effect.invalidate();
        }
    }
}

impl fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("id", &self.id)
            .field("version", &self.version.get())
            .field("subscriber_count", &self.len())
            .finish()
    }
}

/// Handle to one entry in a [`SubscriberSet`].
///
/// Holds the set weakly: the back-reference is only used to remove the
/// effect, never to read the cell.
#[derive(Debug)]
pub(crate) struct Subscription {
    set: Weak<SubscriberSet>,
    effect: EffectId,
    generation: u64,
}

impl Subscription {
    /// Remove the entry if no later run has claimed it.
    pub(crate) fn release(&self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.effect, Some(self.generation));
        }
    }

    /// Remove the entry unconditionally.
    pub(crate) fn cancel(&self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.effect, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{create_effect, flush, Signal};

    #[test]
    fn effect_ids_are_unique() {
        let id1 = EffectId::new();
        let id2 = EffectId::new();
        let id3 = EffectId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn repeated_reads_register_once() {
        let signal = Signal::new(1);

        let reader = signal.clone();
        let effect = create_effect(move || {
            reader.get();
            reader.get();
            reader.get();
        });

        assert_eq!(signal.subscriber_count(), 1);
        assert_eq!(effect.dependency_count(), 1);
        effect.unsubscribe();
    }

    #[test]
    fn rerun_keeps_dependencies_read_again() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let signal = Signal::with_on_subscribe(0, move || {
            calls_clone.set(calls_clone.get() + 1);
            None
        });

        let reader = signal.clone();
        let effect = create_effect(move || {
            reader.get();
        });
        assert_eq!(calls.get(), 1);

        for value in 1..5 {
            signal.set(value);
            flush().unwrap();
        }

        // The previous run's handles must not have emptied the set.
        assert_eq!(effect.run_count(), 5);
        assert_eq!(signal.subscriber_count(), 1);
        assert_eq!(calls.get(), 1);
        effect.unsubscribe();
    }

    #[test]
    fn cancelled_subscription_runs_cleanup_once() {
        let cleanups = Rc::new(Cell::new(0));
        let cleanups_clone = cleanups.clone();
        let signal = Signal::with_on_subscribe(0, move || {
            let cleanups = cleanups_clone.clone();
            Some(Box::new(move || cleanups.set(cleanups.get() + 1)) as Cleanup)
        });

        let reader = signal.clone();
        let effect = create_effect(move || {
            reader.get();
        });

        effect.unsubscribe();
        effect.unsubscribe();
        assert_eq!(cleanups.get(), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }
}

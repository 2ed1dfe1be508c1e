//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its callback immediately, as the
//!    active tracking context, to establish its initial dependencies.
//!
//! 2. When any dependency is written, the scheduler re-runs the same
//!    callback on the next flush. The effect never re-runs itself.
//!
//! 3. Every run tracks its dependencies from scratch. Subscriptions from
//!    the previous run are released once the run completes, so a dependency
//!    that was not read again is dropped.
//!
//! # Lifetime
//!
//! An effect stays live until [`Effect::unsubscribe`] is called, even if
//! every handle to it is dropped: the cells it reads keep it alive. After
//! unsubscribing it is inert and will not run again, including for writes
//! already waiting in the current tick.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::context::{ReactiveContext, Subscriptions};
use super::subscriber::EffectId;

pub(crate) struct EffectNode {
    id: EffectId,
    callback: Box<dyn Fn()>,
    /// Called synchronously when an upstream cell is written.
    on_invalidate: Option<Box<dyn Fn()>>,
    subscriptions: RefCell<Subscriptions>,
    generation: Cell<u64>,
    live: Cell<bool>,
    runs: Cell<usize>,
}

impl EffectNode {
    fn new(callback: Box<dyn Fn()>, on_invalidate: Option<Box<dyn Fn()>>) -> Rc<Self> {
        Rc::new(Self {
            id: EffectId::new(),
            callback,
            on_invalidate,
            subscriptions: RefCell::new(Subscriptions::new()),
            generation: Cell::new(0),
            live: Cell::new(true),
            runs: Cell::new(0),
        })
    }

    pub(crate) fn id(&self) -> EffectId {
        self.id
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.get()
    }

    /// Whether this is the recompute effect of a derived cell.
    pub(crate) fn is_recompute(&self) -> bool {
        self.on_invalidate.is_some()
    }

    /// Run the callback as the active tracking context.
    pub(crate) fn run(self: &Rc<Self>) {
        if !self.live.get() {
            return;
        }

        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let ctx = ReactiveContext::enter(Rc::clone(self), generation);
        (self.callback)();
        let current = ctx.exit();

        let previous = self.subscriptions.replace(current);
        for subscription in &previous {
            subscription.release();
        }
        self.runs.set(self.runs.get() + 1);

        // Unsubscribed from inside its own run: drop what this run joined.
        if !self.live.get() {
            self.cancel_all();
        }
    }

    /// Keep the subscriptions of a run that did not complete.
    pub(crate) fn adopt(&self, partial: Subscriptions) {
        if !self.live.get() {
            for subscription in &partial {
                subscription.cancel();
            }
            return;
        }
        self.subscriptions.borrow_mut().extend(partial);
    }

    pub(crate) fn invalidate(&self) {
        if !self.live.get() {
            return;
        }
        if let Some(on_invalidate) = &self.on_invalidate {
            on_invalidate();
        }
    }

    /// Returns `false` if the effect was already inert.
    pub(crate) fn unsubscribe(&self) -> bool {
        if !self.live.replace(false) {
            return false;
        }
        self.cancel_all();
        true
    }

    fn cancel_all(&self) {
        let subscriptions = self.subscriptions.take();
        for subscription in &subscriptions {
            subscription.cancel();
        }
    }
}

/// Unsubscribes an effect whose first run panicked.
struct InertOnUnwind<'a>(&'a EffectNode);

impl Drop for InertOnUnwind<'_> {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

/// A reactive callback that re-runs when the cells it read change.
///
/// # Example
///
/// ```rust
/// use ripple_core::{create_effect, create_signal, flush};
///
/// let (count, set_count) = create_signal(0);
///
/// let effect = create_effect(move || {
///     println!("Count is: {}", count.get());
/// });
///
/// set_count.set(5);
/// flush().unwrap(); // Prints: "Count is: 5"
/// effect.unsubscribe();
/// ```
#[derive(Clone)]
pub struct Effect {
    node: Rc<EffectNode>,
}

impl Effect {
    /// Create a new effect and run it once.
    ///
    /// A panic in this first run propagates to the caller; the effect is
    /// left inert.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::spawn(Box::new(callback), None)
    }

    /// Create an effect that also reacts to upstream invalidation.
    pub(crate) fn with_invalidate<F, I>(callback: F, on_invalidate: I) -> Self
    where
        F: Fn() + 'static,
        I: Fn() + 'static,
    {
        Self::spawn(Box::new(callback), Some(Box::new(on_invalidate)))
    }

    fn spawn(callback: Box<dyn Fn()>, on_invalidate: Option<Box<dyn Fn()>>) -> Self {
        let node = EffectNode::new(callback, on_invalidate);

        let guard = InertOnUnwind(&node);
        node.run();
        std::mem::forget(guard);

        Self { node }
    }

    /// Run the callback now, outside the scheduler.
    pub(crate) fn rerun(&self) {
        self.node.run();
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> EffectId {
        self.node.id
    }

    /// Stop the effect.
    ///
    /// Removes it from every cell it subscribed to. Calling this more than
    /// once has no further effect.
    pub fn unsubscribe(&self) {
        if self.node.unsubscribe() {
            trace!(effect = %self.node.id, "effect unsubscribed");
        }
    }

    /// Check if the effect can still run.
    pub fn is_live(&self) -> bool {
        self.node.is_live()
    }

    /// Get the number of times the callback has completed.
    pub fn run_count(&self) -> usize {
        self.node.runs.get()
    }

    /// Get the number of cells the last run subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.node.subscriptions.borrow().len()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.node.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Creates a reactive callback.
///
/// The callback runs once immediately, then again on every flush in which a
/// cell it read has changed, until the returned effect is unsubscribed.
pub fn create_effect<F>(callback: F) -> Effect
where
    F: Fn() + 'static,
{
    Effect::new(callback)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    use crate::reactive::{flush, Signal};
    use crate::FlushError;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Rc::new(Cell::new(0));
        let run_count_clone = run_count.clone();

        let effect = create_effect(move || {
            run_count_clone.set(run_count_clone.get() + 1);
        });

        // Effect should have run once on creation
        assert_eq!(run_count.get(), 1);
        assert_eq!(effect.run_count(), 1);
        effect.unsubscribe();
    }

    #[test]
    fn effect_reruns_only_on_flush() {
        let signal = Signal::new(0);
        let observed = Rc::new(Cell::new(-1));

        let reader = signal.clone();
        let observed_clone = observed.clone();
        let effect = create_effect(move || observed_clone.set(reader.get()));
        assert_eq!(observed.get(), 0);

        signal.set(7);
        assert_eq!(observed.get(), 0);

        flush().unwrap();
        assert_eq!(observed.get(), 7);
        assert_eq!(effect.run_count(), 2);
        effect.unsubscribe();
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let signal = Signal::new(0);

        let reader = signal.clone();
        let effect = create_effect(move || {
            reader.get();
        });
        assert!(effect.is_live());

        effect.unsubscribe();
        effect.unsubscribe();
        assert!(!effect.is_live());
        assert_eq!(signal.subscriber_count(), 0);
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn unsubscribe_before_flush_skips_pending_run() {
        let signal = Signal::new(0);

        let reader = signal.clone();
        let effect = create_effect(move || {
            reader.get();
        });

        signal.set(1);
        effect.unsubscribe();
        flush().unwrap();

        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn unsubscribed_mid_flush_does_not_run_later_in_that_flush() {
        let signal = Signal::new(0);
        let victim_slot: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));

        let reader = signal.clone();
        let slot = victim_slot.clone();
        let killer = create_effect(move || {
            if reader.get() > 0 {
                if let Some(victim) = slot.borrow().as_ref() {
                    victim.unsubscribe();
                }
            }
        });

        let reader = signal.clone();
        let victim = create_effect(move || {
            reader.get();
        });
        *victim_slot.borrow_mut() = Some(victim.clone());

        signal.set(1);
        flush().unwrap();

        assert_eq!(killer.run_count(), 2);
        assert_eq!(victim.run_count(), 1);
        assert!(!victim.is_live());
        assert_eq!(signal.subscriber_count(), 1);
        killer.unsubscribe();
    }

    #[test]
    fn stale_dependency_is_dropped() {
        let use_a = Signal::new(true);
        let a = Signal::new(0);
        let b = Signal::new(0);

        let (use_a_r, a_r, b_r) = (use_a.clone(), a.clone(), b.clone());
        let effect = create_effect(move || {
            if use_a_r.get() {
                a_r.get();
            } else {
                b_r.get();
            }
        });
        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 0);

        use_a.set(false);
        flush().unwrap();

        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
        assert_eq!(effect.dependency_count(), 2);

        // Writing the dropped dependency no longer runs the effect
        a.set(1);
        flush().unwrap();
        assert_eq!(effect.run_count(), 2);
        effect.unsubscribe();
    }

    #[test]
    fn panic_on_creation_propagates_and_leaves_effect_inert() {
        let signal = Signal::new(0);

        let reader = signal.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(move || {
            create_effect(move || {
                reader.get();
                panic!("boom");
            })
        }));

        assert!(result.is_err());
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn panic_during_flush_is_isolated() {
        let signal = Signal::new(0);
        let healthy_runs = Rc::new(Cell::new(0));

        let reader = signal.clone();
        let failing = create_effect(move || {
            if reader.get() > 0 {
                panic!("cannot handle positive values");
            }
        });

        let reader = signal.clone();
        let healthy_runs_clone = healthy_runs.clone();
        let healthy = create_effect(move || {
            reader.get();
            healthy_runs_clone.set(healthy_runs_clone.get() + 1);
        });

        signal.set(1);
        let err = flush().unwrap_err();

        match err {
            FlushError::EffectsPanicked(panics) => {
                assert_eq!(panics.len(), 1);
                assert_eq!(panics[0].effect, failing.id());
                assert!(panics[0].message.contains("positive"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(healthy_runs.get(), 2);

        // The failed effect keeps its subscriptions and runs on the next write
        assert!(failing.is_live());
        signal.set(0);
        flush().unwrap();
        assert_eq!(healthy_runs.get(), 3);

        failing.unsubscribe();
        healthy.unsubscribe();
    }
}

//! Reactive Context
//!
//! The reactive context tracks which effect is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! it can register the running effect as a subscriber without the caller
//! doing anything.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing effect.
//! Running an effect pushes an entry holding the effect and the
//! subscriptions collected so far; the entry is popped when the run
//! completes. Derived cells run their recompute effect while another
//! effect is reading them, so contexts nest.
//!
//! The stack is never exposed to callers. Only [`ReactiveContext::is_active`]
//! and [`ReactiveContext::current_effect`] are public, for inspection.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;

use super::effect::EffectNode;
use super::subscriber::{EffectId, Subscription};

/// Subscriptions collected during one effect run.
pub(crate) type Subscriptions = SmallVec<[Subscription; 4]>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
struct ContextEntry {
    effect: Rc<EffectNode>,
    generation: u64,
    subscriptions: Subscriptions,
}

/// The effect currently tracking reads, with its run generation.
pub(crate) struct Tracker {
    pub(crate) effect: Rc<EffectNode>,
    pub(crate) generation: u64,
}

/// Guard that pops the context when dropped.
///
/// A normal run ends with [`ReactiveContext::exit`], which hands back the
/// collected subscriptions. If the effect panics, the guard is dropped
/// during unwinding instead and gives the partial subscriptions to the
/// effect so that unsubscribing still reaches every set it joined.
pub struct ReactiveContext {
    effect_id: EffectId,
    exited: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given effect run.
    pub(crate) fn enter(effect: Rc<EffectNode>, generation: u64) -> Self {
        let effect_id = effect.id();
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                effect,
                generation,
                subscriptions: SmallVec::new(),
            });
        });

        Self {
            effect_id,
            exited: false,
        }
    }

    /// Check if there is an active reactive context.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the ID of the effect currently tracking reads, if any.
    pub fn current_effect() -> Option<EffectId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|entry| entry.effect.id()))
    }

    pub(crate) fn current() -> Option<Tracker> {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().last().map(|entry| Tracker {
                effect: Rc::clone(&entry.effect),
                generation: entry.generation,
            })
        })
    }

    /// Record a subscription made by the current effect.
    pub(crate) fn track(subscription: Subscription) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                entry.subscriptions.push(subscription);
            }
        });
    }

    /// Leave the context, returning the subscriptions collected in it.
    pub(crate) fn exit(mut self) -> Subscriptions {
        self.exited = true;
        self.pop()
            .map(|entry| entry.subscriptions)
            .unwrap_or_default()
    }

    fn pop(&self) -> Option<ContextEntry> {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());
        if let Some(entry) = &popped {
            debug_assert_eq!(
                entry.effect.id(),
                self.effect_id,
                "ReactiveContext mismatch: expected {}, got {}",
                self.effect_id,
                entry.effect.id()
            );
        }
        popped
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        if let Some(entry) = self.pop() {
            entry.effect.adopt(entry.subscriptions);
        }
    }
}

/// Run `f` with no active tracking context.
///
/// Reads inside `f` do not subscribe the surrounding effect.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _suspended = Suspended::new();
    f()
}

/// Holds the context stack aside while untracked code runs.
struct Suspended {
    saved: Vec<ContextEntry>,
}

impl Suspended {
    fn new() -> Self {
        let saved = CONTEXT_STACK.with(|stack| std::mem::take(&mut *stack.borrow_mut()));
        Self { saved }
    }
}

impl Drop for Suspended {
    fn drop(&mut self) {
        let saved = std::mem::take(&mut self.saved);
        let leftover =
            CONTEXT_STACK.with(|stack| std::mem::replace(&mut *stack.borrow_mut(), saved));
        debug_assert!(leftover.is_empty(), "untracked code left a context entered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::reactive::{create_effect, Signal};

    #[test]
    fn context_is_inactive_outside_effects() {
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_effect().is_none());
    }

    #[test]
    fn context_tracks_running_effect() {
        let observed = Rc::new(Cell::new(None));
        let observed_clone = observed.clone();

        let effect = create_effect(move || {
            observed_clone.set(ReactiveContext::current_effect());
        });

        assert_eq!(observed.get(), Some(effect.id()));

        // Context should be cleaned up after the run
        assert!(!ReactiveContext::is_active());
        effect.unsubscribe();
    }

    #[test]
    fn nested_contexts() {
        let inner_seen = Rc::new(Cell::new(None));
        let outer_after = Rc::new(Cell::new(None));

        let inner_seen_clone = inner_seen.clone();
        let outer_after_clone = outer_after.clone();
        let outer = create_effect(move || {
            let inner_seen = inner_seen_clone.clone();
            let inner = create_effect(move || {
                inner_seen.set(ReactiveContext::current_effect());
            });
            // After the inner run, the outer effect is current again
            outer_after_clone.set(ReactiveContext::current_effect());
            assert_ne!(Some(inner.id()), ReactiveContext::current_effect());
            inner.unsubscribe();
        });

        assert!(inner_seen.get().is_some());
        assert_ne!(inner_seen.get(), Some(outer.id()));
        assert_eq!(outer_after.get(), Some(outer.id()));
        assert!(ReactiveContext::current_effect().is_none());
        outer.unsubscribe();
    }

    #[test]
    fn untrack_hides_the_context() {
        let signal = Signal::new(0);

        let reader = signal.clone();
        let effect = create_effect(move || {
            untrack(|| {
                assert!(!ReactiveContext::is_active());
                reader.get();
            });
            assert!(ReactiveContext::is_active());
        });

        assert_eq!(signal.subscriber_count(), 0);
        assert_eq!(effect.dependency_count(), 0);
        effect.unsubscribe();
    }
}

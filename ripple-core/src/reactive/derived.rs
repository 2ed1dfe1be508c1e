//! Derived Implementation
//!
//! A Derived cell is a read-only value computed from other signals or
//! derived cells. Internally it is a signal (holding the cached value and
//! the subscriber set) plus, while observed, an effect that recomputes it.
//!
//! # Hot and Cold
//!
//! Each cell is a two-state machine:
//!
//! - **Cold** (no subscribers): nothing is cached and nothing upstream is
//!   subscribed. Every read calls the computation directly.
//!
//! - **Hot** (at least one subscriber): a recompute effect exists. It keeps
//!   the cache current and, when the computed value differs from the
//!   cached one, notifies the cell's own subscribers. Reads return the cache.
//!
//! The transitions ride on the internal signal's subscription hook: the
//! 0 -> 1 transition creates the recompute effect, 1 -> 0 unsubscribes it
//! and drops the cache. The recompute effect exists if and only if the cell
//! is hot.
//!
//! # Staleness
//!
//! A signal write marks every hot derived cell downstream of it dirty,
//! synchronously. Reading a dirty cell reruns its recompute effect before
//! returning, so a pull is always current and an effect reading several
//! levels of a chain never sees a mix of old and new values.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::debug;

use super::context::untrack;
use super::effect::Effect;
use super::signal::{Signal, SignalGet};
use super::subscriber::Cleanup;

/// Observable state of a derived cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedState {
    /// Not observed. Reads recompute.
    Cold,
    /// Observed. Reads return the cached value.
    Hot,
}

enum Phase {
    Cold,
    Hot { effect: Effect, dirty: bool },
}

struct DerivedInner<T> {
    calculate: Box<dyn Fn() -> T>,
    /// Cached value and subscribers. The cache is `None` while cold.
    signal: Signal<Option<T>>,
    phase: RefCell<Phase>,
    /// Number of times `calculate` ran.
    computations: Cell<usize>,
}

impl<T: Clone + PartialEq + 'static> DerivedInner<T> {
    fn compute(&self) -> T {
        self.computations.set(self.computations.get() + 1);
        (self.calculate)()
    }

    fn warm(self: &Rc<Self>) {
        let recompute = Rc::downgrade(self);
        let invalidate = Rc::downgrade(self);
        let effect = Effect::with_invalidate(
            move || {
                if let Some(inner) = recompute.upgrade() {
                    inner.recompute();
                }
            },
            move || {
                if let Some(inner) = invalidate.upgrade() {
                    inner.invalidate();
                }
            },
        );

        *self.phase.borrow_mut() = Phase::Hot {
            effect,
            dirty: false,
        };
        debug!(signal = self.signal.id(), "derived cell hot");
    }

    fn cool(&self) {
        let previous = self.phase.replace(Phase::Cold);
        if let Phase::Hot { effect, .. } = previous {
            effect.unsubscribe();
        }
        self.signal.replace_quiet(None);
        debug!(signal = self.signal.id(), "derived cell cold");
    }

    /// Body of the recompute effect.
    fn recompute(&self) {
        let value = self.compute();

        if let Phase::Hot { dirty, .. } = &mut *self.phase.borrow_mut() {
            *dirty = false;
        }

        let cached = self.signal.with_untracked(|cached| match cached {
            None => None,
            Some(cached) => Some(*cached != value),
        });
        match cached {
            // First fill after warming: the reader gets this value directly.
            None => self.signal.replace_quiet(Some(value)),
            Some(true) => self.signal.publish(Some(value)),
            Some(false) => {}
        }
    }

    fn invalidate(&self) {
        let newly_dirty = match &mut *self.phase.borrow_mut() {
            Phase::Hot { dirty, .. } if !*dirty => {
                *dirty = true;
                true
            }
            _ => false,
        };
        if newly_dirty {
            self.signal.subscribers().invalidate();
        }
    }

    fn refresh(&self) {
        let stale = match &*self.phase.borrow() {
            Phase::Hot { effect, dirty: true } => Some(effect.clone()),
            _ => None,
        };
        if let Some(effect) = stale {
            effect.rerun();
        }
    }

    fn read(&self) -> T {
        match self.signal.with_untracked(Clone::clone) {
            Some(value) => value,
            None => untrack(|| self.compute()),
        }
    }

    fn state(&self) -> DerivedState {
        match &*self.phase.borrow() {
            Phase::Cold => DerivedState::Cold,
            Phase::Hot { .. } => DerivedState::Hot,
        }
    }
}

/// A read-only reactive cell computed from other cells.
///
/// # Example
///
/// ```rust
/// use ripple_core::{create_derived, create_signal};
///
/// let (count, set_count) = create_signal(1);
/// let doubled = create_derived(move || count.get() * 2);
///
/// assert_eq!(doubled.get(), 2);
/// set_count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Derived<T> {
    inner: Rc<DerivedInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Derived<T> {
    /// Create a derived cell. Nothing is computed until it is read.
    pub fn new<F>(calculate: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &Weak<DerivedInner<T>>| {
            let weak = weak.clone();
            DerivedInner {
                calculate: Box::new(calculate),
                signal: Signal::with_on_subscribe(None, move || {
                    let inner = weak.upgrade()?;
                    inner.warm();
                    let weak = Rc::downgrade(&inner);
                    Some(Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.cool();
                        }
                    }) as Cleanup)
                }),
                phase: RefCell::new(Phase::Cold),
                computations: Cell::new(0),
            }
        });

        Self { inner }
    }

    /// Get the current value.
    ///
    /// If called while an effect is running, this also subscribes it, which
    /// makes the cell hot.
    pub fn get(&self) -> T {
        self.inner.refresh();
        self.inner.signal.subscribers().track();
        self.inner.read()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.refresh();
        self.inner.read()
    }

    /// Get the hot/cold state.
    pub fn state(&self) -> DerivedState {
        self.inner.state()
    }

    /// Check if the cell is observed.
    pub fn is_hot(&self) -> bool {
        self.state() == DerivedState::Hot
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.signal.subscriber_count()
    }

    /// Get the number of times the computation has run.
    pub fn computation_count(&self) -> usize {
        self.inner.computations.get()
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Debug + 'static> Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.signal.id())
            .field("state", &self.state())
            .field("cached", &self.inner.signal.with_untracked(Clone::clone))
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> SignalGet<T> for Derived<T> {
    fn get(&self) -> T {
        Derived::get(self)
    }

    fn get_untracked(&self) -> T {
        Derived::get_untracked(self)
    }
}

/// Creates a derived cell whose value is computed from other cells.
pub fn create_derived<T, F>(calculate: F) -> Derived<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Derived::new(calculate)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

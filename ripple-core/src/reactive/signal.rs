//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which effects depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while an effect is running, the signal
//!    registers that effect as a subscriber.
//!
//! 2. When a signal is written, the new value is visible to reads
//!    immediately, and the signal's subscriber set is queued with the
//!    scheduler. Subscribers run on the next flush, once per flush no matter
//!    how many writes happened before it.
//!
//! 3. Writes never compare against the old value: setting the same value
//!    again still notifies.
//!
//! # Subscription Hooks
//!
//! [`Signal::with_on_subscribe`] attaches a hook that runs when the first
//! subscriber arrives and may return a cleanup that runs when the last one
//! leaves. This lets a signal attach to an outside data source lazily.
//! Derived cells use the same hook to switch between hot and cold.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use super::scheduler::{self, Batch};
use super::subscriber::{Cleanup, SubscriberSet};

/// Read access shared by signals and derived cells.
///
/// This is the getter contract: anything that can be read reactively.
/// The store adapter accepts any implementor.
pub trait SignalGet<T> {
    /// Read the value, subscribing the running effect.
    fn get(&self) -> T;

    /// Read the value without subscribing anything.
    fn get_untracked(&self) -> T;
}

/// A reactive signal holding a value of type `T`.
///
/// Cloning a signal produces another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use ripple_core::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (queues subscribers for the next flush)
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T> {
    set: Rc<SubscriberSet>,
    value: Rc<RefCell<T>>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            set: SubscriberSet::new(None),
            value: Rc::new(RefCell::new(value)),
        }
    }

    /// Create a signal with a hook for the 0 -> 1 subscriber transition.
    ///
    /// The cleanup returned by the hook, if any, runs on the 1 -> 0
    /// transition. Intermediate subscribers do not trigger either.
    pub fn with_on_subscribe<F>(value: T, on_subscribe: F) -> Self
    where
        F: Fn() -> Option<Cleanup> + 'static,
    {
        Self {
            set: SubscriberSet::new(Some(Box::new(on_subscribe))),
            value: Rc::new(RefCell::new(value)),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.set.id()
    }

    /// Get the current value.
    ///
    /// If called while an effect is running, this also subscribes it.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.set.track();
        self.value.borrow().clone()
    }

    /// Borrow the current value, subscribing the running effect.
    ///
    /// The signal must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.set.track();
        f(&self.value.borrow())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }

    /// Borrow the current value without tracking dependencies.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Set a new value and queue subscribers for the next flush.
    pub fn set(&self, value: T) {
        *self.value.borrow_mut() = value;
        self.notify();
    }

    /// Update the value in place and queue subscribers.
    ///
    /// The signal must not be read from inside `f`.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        f(&mut self.value.borrow_mut());
        self.notify();
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.set.len()
    }

    /// Split into a read half and a write half.
    pub fn split(self) -> (ReadSignal<T>, WriteSignal<T>) {
        (ReadSignal(self.clone()), WriteSignal(self))
    }

    fn notify(&self) {
        self.set.bump_version();
        self.set.invalidate();
        scheduler::enqueue(&self.set, Batch::Next);
    }

    /// Store a recomputed value and notify within the running flush.
    pub(crate) fn publish(&self, value: T) {
        *self.value.borrow_mut() = value;
        self.set.bump_version();
        scheduler::enqueue(&self.set, Batch::Current);
    }

    /// Store a value without notifying anyone.
    pub(crate) fn replace_quiet(&self, value: T) {
        *self.value.borrow_mut() = value;
    }

    pub(crate) fn subscribers(&self) -> &Rc<SubscriberSet> {
        &self.set
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            set: Rc::clone(&self.set),
            value: Rc::clone(&self.value),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &*self.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<T: Clone + 'static> SignalGet<T> for Signal<T> {
    fn get(&self) -> T {
        Signal::get(self)
    }

    fn get_untracked(&self) -> T {
        Signal::get_untracked(self)
    }
}

/// The read half of a signal.
pub struct ReadSignal<T>(Signal<T>);

impl<T: 'static> ReadSignal<T> {
    /// Get the current value, subscribing the running effect.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.0.get()
    }

    /// Borrow the current value, subscribing the running effect.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.0.with(f)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.0.get_untracked()
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.0.subscriber_count()
    }
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Debug + 'static> Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: Clone + 'static> SignalGet<T> for ReadSignal<T> {
    fn get(&self) -> T {
        self.0.get()
    }

    fn get_untracked(&self) -> T {
        self.0.get_untracked()
    }
}

/// The write half of a signal.
pub struct WriteSignal<T>(Signal<T>);

impl<T: 'static> WriteSignal<T> {
    /// Replace the value and queue subscribers for the next flush.
    pub fn set(&self, value: T) {
        self.0.set(value);
    }

    /// Modify the value in place and queue subscribers for the next flush.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        self.0.update(f);
    }
}

impl<T> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Debug + 'static> Debug for WriteSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Creates a reactive signal and initialises it with a value.
///
/// Returns a getter and a setter.
pub fn create_signal<T: 'static>(initial: T) -> (ReadSignal<T>, WriteSignal<T>) {
    Signal::new(initial).split()
}

/// Like [`create_signal`], with a hook for the first subscriber.
///
/// See [`Signal::with_on_subscribe`].
pub fn create_signal_with<T, F>(initial: T, on_subscribe: F) -> (ReadSignal<T>, WriteSignal<T>)
where
    T: 'static,
    F: Fn() -> Option<Cleanup> + 'static,
{
    Signal::with_on_subscribe(initial, on_subscribe).split()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

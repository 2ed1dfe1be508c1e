//! Store Adapter
//!
//! Bridges reactive getters to the subscription-store convention used by
//! component frameworks: a store holds a value, calls each subscriber with
//! the current value on subscribe and again on every change, and starts its
//! data source on the first subscriber and stops it after the last.
//!
//! The adapter only uses the public getter and effect contracts of the
//! reactive core.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::reactive::{create_effect, untrack, Cleanup, SignalGet};

type Start<T> = Box<dyn Fn(StoreSetter<T>) -> Option<Cleanup>>;

struct StoreInner<T> {
    value: RefCell<T>,
    subscribers: RefCell<IndexMap<u64, Rc<dyn Fn(&T)>>>,
    next_id: Cell<u64>,
    start: Start<T>,
    stop: RefCell<Option<Cleanup>>,
}

impl<T: Clone + PartialEq + 'static> StoreInner<T> {
    fn set(&self, value: T) {
        if *self.value.borrow() == value {
            return;
        }
        *self.value.borrow_mut() = value.clone();

        let subscribers: Vec<_> = self.subscribers.borrow().values().cloned().collect();
        for subscriber in subscribers {
            subscriber(&value);
        }
    }

    fn remove(&self, id: u64) {
        let emptied = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.shift_remove(&id).is_some() && subscribers.is_empty()
        };
        if emptied {
            let stop = self.stop.borrow_mut().take();
            if let Some(stop) = stop {
                stop();
            }
        }
    }
}

/// Write access handed to a store's start function.
pub struct StoreSetter<T> {
    inner: Weak<StoreInner<T>>,
}

impl<T: Clone + PartialEq + 'static> StoreSetter<T> {
    /// Store a value and call subscribers if it changed.
    pub fn set(&self, value: T) {
        if let Some(inner) = self.inner.upgrade() {
            inner.set(value);
        }
    }
}

impl<T> Clone for StoreSetter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

/// A readable store.
pub struct Readable<T> {
    inner: Rc<StoreInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Readable<T> {
    /// Create a store with an initial value and a start function.
    ///
    /// `start` runs when the first subscriber arrives and receives a setter;
    /// the cleanup it returns runs when the last subscriber leaves.
    pub fn new<F>(initial: T, start: F) -> Self
    where
        F: Fn(StoreSetter<T>) -> Option<Cleanup> + 'static,
    {
        Self {
            inner: Rc::new(StoreInner {
                value: RefCell::new(initial),
                subscribers: RefCell::new(IndexMap::new()),
                next_id: Cell::new(0),
                start: Box::new(start),
                stop: RefCell::new(None),
            }),
        }
    }

    /// Subscribe to the store.
    ///
    /// `run` is called right away with the current value and then with
    /// every new value until the subscription is dropped with
    /// [`StoreSubscription::unsubscribe`].
    pub fn subscribe<F>(&self, run: F) -> StoreSubscription<T>
    where
        F: Fn(&T) + 'static,
    {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);

        let run: Rc<dyn Fn(&T)> = Rc::new(run);
        let first = {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            subscribers.insert(id, Rc::clone(&run));
            subscribers.len() == 1
        };
        if first {
            let stop = (self.inner.start)(StoreSetter {
                inner: Rc::downgrade(&self.inner),
            });
            *self.inner.stop.borrow_mut() = stop;
        }

        let current = self.inner.value.borrow().clone();
        run(&current);

        StoreSubscription {
            store: Rc::downgrade(&self.inner),
            id,
            active: Cell::new(true),
        }
    }

    /// Get the last stored value.
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }
}

impl<T> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug> Debug for Readable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readable")
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.inner.subscribers.borrow().len())
            .finish()
    }
}

/// Handle returned by [`Readable::subscribe`].
pub struct StoreSubscription<T> {
    store: Weak<StoreInner<T>>,
    id: u64,
    active: Cell<bool>,
}

impl<T: Clone + PartialEq + 'static> StoreSubscription<T> {
    /// Stop receiving values. Calling this more than once does nothing.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.remove(self.id);
        }
    }
}

/// Turn a reactive getter into a readable store.
///
/// The getter is read once, untracked, for the initial value. The first
/// store subscriber starts an effect that forwards every new value into the
/// store; the last unsubscribe stops it.
pub fn to_store<T, G>(getter: G) -> Readable<T>
where
    T: Clone + PartialEq + 'static,
    G: SignalGet<T> + 'static,
{
    let initial = untrack(|| getter.get());
    let getter = Rc::new(getter);

    Readable::new(initial, move |setter| {
        let getter = Rc::clone(&getter);
        let effect = create_effect(move || setter.set(getter.get()));
        Some(Box::new(move || effect.unsubscribe()) as Cleanup)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::reactive::{create_derived, create_signal, flush, Signal};

    #[test]
    fn store_reads_getter_eagerly() {
        let (count, _set_count) = create_signal(3);
        let store = to_store(count.clone());

        assert_eq!(store.get(), 3);
        assert_eq!(store.subscriber_count(), 0);
        assert_eq!(count.subscriber_count(), 0);
    }

    #[test]
    fn subscribers_receive_current_and_new_values() {
        let (count, set_count) = create_signal(1);
        let store = to_store(count.clone());

        let received = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let subscription = store.subscribe(move |value| received_clone.borrow_mut().push(*value));
        assert_eq!(*received.borrow(), vec![1]);
        assert_eq!(count.subscriber_count(), 1);

        set_count.set(2);
        flush().unwrap();
        set_count.set(2);
        flush().unwrap();
        set_count.set(5);
        flush().unwrap();

        assert_eq!(*received.borrow(), vec![1, 2, 5]);
        subscription.unsubscribe();
    }

    #[test]
    fn effect_lives_while_store_is_observed() {
        let count = Signal::new(0);
        let reader = count.clone();
        let doubled = create_derived(move || reader.get() * 2);
        let store = to_store(doubled.clone());

        let first = store.subscribe(|_| {});
        let second = store.subscribe(|_| {});
        assert!(doubled.is_hot());

        first.unsubscribe();
        assert!(doubled.is_hot());

        second.unsubscribe();
        second.unsubscribe();
        assert!(!doubled.is_hot());
        assert_eq!(count.subscriber_count(), 0);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn custom_start_and_stop() {
        let stops = Rc::new(Cell::new(0));
        let stops_clone = stops.clone();
        let store = Readable::new(0, move |setter| {
            setter.set(10);
            let stops = stops_clone.clone();
            Some(Box::new(move || stops.set(stops.get() + 1)) as Cleanup)
        });

        let seen = Rc::new(Cell::new(0));
        let seen_clone = seen.clone();
        let subscription = store.subscribe(move |value| seen_clone.set(*value));
        assert_eq!(seen.get(), 10);

        subscription.unsubscribe();
        assert_eq!(stops.get(), 1);
    }
}

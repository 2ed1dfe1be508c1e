//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, derived cells,
//! and effects, plus the scheduler that batches their propagation.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal is read while
//! an effect is running, the signal registers that effect as a subscriber.
//! When the signal is written, its subscribers are queued for the next flush.
//!
//! ## Derived Cells
//!
//! A Derived cell is a read-only value computed from other cells. While
//! nobody observes it, it is cold and recomputes on every read. Once an
//! effect reads it, it turns hot: the value is cached and pushed to
//! subscribers when it changes.
//!
//! ## Effects
//!
//! An Effect is a side-effecting callback. It runs once when created and
//! again on every flush in which a cell it read has changed, until it is
//! unsubscribed.
//!
//! ## Ticks
//!
//! Writes are synchronous, notification is deferred. All writes made in one
//! synchronous turn are delivered by a single flush, which runs each
//! affected effect once.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to detect
//! dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, register the dependency. Everything is
//! single-threaded: handles are `Rc`-based and each thread has its own
//! engine.

mod context;
mod derived;
mod effect;
mod scheduler;
mod signal;
mod subscriber;

pub use context::{untrack, ReactiveContext};
pub use derived::{create_derived, Derived, DerivedState};
pub use effect::{create_effect, Effect};
pub use scheduler::{
    flush, is_flush_scheduled, is_flushing, settle, settle_with_limit, tick, Tick,
    DEFAULT_SETTLE_PASSES,
};
pub use signal::{create_signal, create_signal_with, ReadSignal, Signal, SignalGet, WriteSignal};
pub use subscriber::{Cleanup, EffectId};

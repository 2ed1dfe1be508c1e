//! Ripple Core
//!
//! This crate provides the core runtime for Ripple, a fine-grained
//! reactivity engine. It implements:
//!
//! - Reactive primitives (signals, derived cells, effects)
//! - Automatic dependency tracking on read
//! - A batching scheduler that delivers each tick's writes in one flush
//! - A bridge to subscription-based stores
//!
//! The engine is single-threaded and cooperative. Writes take effect
//! immediately; effects re-run when the host drives a flush, either by
//! awaiting [`tick`] or by calling [`flush`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `store`: Adapter from getters to subscription-based stores
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{create_derived, create_effect, create_signal, flush};
//!
//! // Create a signal
//! let (count, set_count) = create_signal(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     create_derived(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let effect = create_effect(move || {
//!     println!("Count: {}, Doubled: {}", count.get(), doubled.get());
//! });
//!
//! // Update the signal
//! set_count.set(5);
//! flush().unwrap();
//! // Effect ran again, printed: "Count: 5, Doubled: 10"
//! effect.unsubscribe();
//! ```

pub mod reactive;
pub mod store;

mod error;

pub use error::{EffectPanic, FlushError};
pub use reactive::{
    create_derived, create_effect, create_signal, create_signal_with, flush, settle, tick,
    untrack, Derived, Effect, ReadSignal, Signal, SignalGet, WriteSignal,
};
pub use store::{to_store, Readable};

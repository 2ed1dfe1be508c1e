//! Errors reported by the scheduler.
//!
//! The engine has no recoverable errors of its own. What it reports are
//! effects that panicked while a flush was delivering notifications, and
//! effect graphs that never stop feeding themselves.

use std::any::Any;

use thiserror::Error;

use crate::reactive::EffectId;

/// Error returned by [`flush`](crate::flush), [`settle`](crate::settle)
/// and [`tick`](crate::tick).
#[derive(Debug, Error)]
pub enum FlushError {
    /// One or more effects panicked. The flush still ran to completion.
    #[error("{} effect(s) panicked during flush", .0.len())]
    EffectsPanicked(Vec<EffectPanic>),

    /// Effects were still writing after the allowed number of passes.
    #[error("reactive graph did not settle after {passes} flush passes")]
    Unsettled { passes: usize },
}

impl FlushError {
    /// The panics collected by the flush, if any.
    pub fn panics(&self) -> &[EffectPanic] {
        match self {
            FlushError::EffectsPanicked(panics) => panics,
            FlushError::Unsettled { .. } => &[],
        }
    }
}

/// A panic caught at an effect's boundary during a flush.
#[derive(Debug, Clone, Error)]
#[error("{effect} panicked: {message}")]
pub struct EffectPanic {
    pub effect: EffectId,
    pub message: String,
}

impl EffectPanic {
    pub(crate) fn from_payload(effect: EffectId, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { effect, message }
    }
}

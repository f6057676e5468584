//! Timeline errors
//!
//! Structural misuse (re-entrancy, malformed transitions, occupied slots) is
//! reported to the caller that committed it. Failures inside coroutine bodies
//! are reported to the driver's error handler and end that coroutine only.

use std::rc::Rc;
use thiserror::Error;

/// Errors produced by timelines and their combinators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    /// `.run()` was called on a guarded instance that is still running.
    #[error("cannot execute {name}.run multiple times in parallel")]
    Reentrancy { name: &'static str },

    /// A graph transition declared neither a `when_update` nor a `when_future` condition.
    #[error("transition from '{from}' to '{to}' needs either a when_update or a when_future condition")]
    MalformedTransition { from: String, to: String },

    /// A combinator slot already holds a timeline.
    #[error("there's already a timeline attached at index {index}")]
    SlotOccupied { index: usize },

    /// A coroutine body failed.
    #[error("timeline failed: {0}")]
    Failed(String),
}

impl TimelineError {
    /// Build a [`TimelineError::Failed`] from any displayable message.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        TimelineError::Failed(message.to_string())
    }

    /// Whether this error signals programmer misuse rather than a runtime failure.
    pub fn is_structural(&self) -> bool {
        !matches!(self, TimelineError::Failed(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = TimelineError> = std::result::Result<T, E>;

/// Callback receiving uncaught coroutine errors.
pub type ErrorHandler = Rc<dyn Fn(&TimelineError)>;

/// The default handler: log and move on.
pub fn log_error_handler() -> ErrorHandler {
    Rc::new(|err: &TimelineError| {
        tracing::error!(error = %err, structural = err.is_structural(), "uncaught timeline error");
    })
}

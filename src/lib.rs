//! Rust Timeline Library
//!
//! A frame-driven cooperative timeline scheduler:
//! - Timelines are async functions that advance only when the host calls `update`
//! - Steps (actions) with init/cleanup, per-frame updates and `until` futures
//! - Structured cancellation through abort signals (cleanups run exactly once)
//! - Combinators: race/all, sequential, queue, switch, state graph, replaceable

pub mod error;
pub mod signal;
pub mod executor;
pub mod timeline;
pub mod context;
pub mod action;
pub mod runner;
pub mod singleton;
pub mod parallel;
pub mod sequential;
pub mod queue;
pub mod switch;
pub mod graph;
pub mod replaceable;
pub mod misc;
pub mod ease;

#[cfg(test)]
mod timeline_tests;

pub use action::{Action, Memo, StepState};
pub use context::{BranchHandle, BranchOutcome, Clock, ContextMap, Cx};
pub use error::{log_error_handler, ErrorHandler, Result, TimelineError};
pub use graph::{graph, GraphState, TimelineGraph, Transition};
pub use misc::{do_until, do_while, time_passed, until_all};
pub use parallel::{all, parallel, race, ChildId, ParallelMode, ParallelTimeline};
pub use queue::QueueTimeline;
pub use replaceable::{ReplaceableTimeline, TimelineRegistry};
pub use runner::{run_timeline, FrameLoop, RunnerConfig, TimelineRunner};
pub use sequential::SequentialTimeline;
pub use signal::{AbortController, AbortReason, AbortSignal};
pub use singleton::Singleton;
pub use switch::{switch, SwitchCase, SwitchTimeline};
pub use timeline::{abortable, Branch, Condition, OnceTimeline, ReusableTimeline, Timeline};

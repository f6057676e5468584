//! Timeline values
//!
//! A timeline is a coroutine body: an async function of a [`Cx`] that awaits
//! one step after another and eventually returns `Result<R>`. Whether a value
//! can be started again is decided once, by its variant, instead of being
//! probed at run time.

use crate::context::{Clock, Cx};
use crate::error::Result;
use crate::signal::AbortSignal;
use futures::future::{FutureExt, LocalBoxFuture};
use std::future::Future;
use std::rc::Rc;

/// Predicate over the frame's state, used by switch cases and graph transitions.
pub type Condition<T> = Rc<dyn Fn(&T, &Clock) -> bool>;

/// A started coroutine body.
pub type TimelineFuture<R> = LocalBoxFuture<'static, Result<R>>;

type Factory<T, R> = dyn Fn(Cx<T>) -> TimelineFuture<R>;

/// A timeline that produces a fresh run every time it is started.
pub struct ReusableTimeline<T: 'static, R: 'static = ()> {
    factory: Rc<Factory<T, R>>,
}

impl<T: 'static, R: 'static> Clone for ReusableTimeline<T, R> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
        }
    }
}

impl<T: 'static, R: 'static> ReusableTimeline<T, R> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Cx<T>) -> Fut + 'static,
        Fut: Future<Output = Result<R>> + 'static,
    {
        Self {
            factory: Rc::new(move |cx| f(cx).boxed_local()),
        }
    }

    /// Create the coroutine for one run. Nothing executes until it is polled.
    pub fn start(&self, cx: Cx<T>) -> TimelineFuture<R> {
        (self.factory)(cx)
    }

    /// Transform the completion value of every run.
    pub fn map<R2: 'static>(self, f: impl Fn(R) -> R2 + 'static) -> ReusableTimeline<T, R2> {
        let f = Rc::new(f);
        ReusableTimeline {
            factory: Rc::new(move |cx| {
                let run = (self.factory)(cx);
                let f = f.clone();
                async move { run.await.map(|value| f(value)) }.boxed_local()
            }),
        }
    }

    /// Whether both handles share the same factory.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.factory, &other.factory)
    }
}

impl<T: 'static> ReusableTimeline<T> {
    /// Waits until cancelled.
    pub fn idle() -> Self {
        ReusableTimeline::new(|cx: Cx<T>| async move {
            cx.idle().await;
            Ok(())
        })
    }

    /// Finishes immediately.
    pub fn skip() -> Self {
        ReusableTimeline::new(|_cx: Cx<T>| async { Ok(()) })
    }
}

/// A timeline that can be started once.
pub struct OnceTimeline<T: 'static, R: 'static = ()> {
    body: Box<dyn FnOnce(Cx<T>) -> TimelineFuture<R>>,
}

impl<T: 'static, R: 'static> OnceTimeline<T, R> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Cx<T>) -> Fut + 'static,
        Fut: Future<Output = Result<R>> + 'static,
    {
        Self {
            body: Box::new(move |cx| f(cx).boxed_local()),
        }
    }

    pub fn start(self, cx: Cx<T>) -> TimelineFuture<R> {
        (self.body)(cx)
    }
}

/// Either kind of timeline.
pub enum Timeline<T: 'static, R: 'static = ()> {
    Reusable(ReusableTimeline<T, R>),
    Once(OnceTimeline<T, R>),
}

impl<T: 'static, R: 'static> Timeline<T, R> {
    pub fn reusable<F, Fut>(f: F) -> Self
    where
        F: Fn(Cx<T>) -> Fut + 'static,
        Fut: Future<Output = Result<R>> + 'static,
    {
        Timeline::Reusable(ReusableTimeline::new(f))
    }

    pub fn once<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Cx<T>) -> Fut + 'static,
        Fut: Future<Output = Result<R>> + 'static,
    {
        Timeline::Once(OnceTimeline::new(f))
    }

    pub fn start(self, cx: Cx<T>) -> TimelineFuture<R> {
        match self {
            Timeline::Reusable(timeline) => timeline.start(cx),
            Timeline::Once(timeline) => timeline.start(cx),
        }
    }

    pub fn is_reusable(&self) -> bool {
        matches!(self, Timeline::Reusable(_))
    }
}

impl<T: 'static, R: 'static> From<ReusableTimeline<T, R>> for Timeline<T, R> {
    fn from(timeline: ReusableTimeline<T, R>) -> Self {
        Timeline::Reusable(timeline)
    }
}

impl<T: 'static, R: 'static> From<OnceTimeline<T, R>> for Timeline<T, R> {
    fn from(timeline: OnceTimeline<T, R>) -> Self {
        Timeline::Once(timeline)
    }
}

/// A child position in a parallel composition.
///
/// `Skip` holds the place of a conditionally omitted child: it is never
/// started and never counted. Any `bool` converts to `Skip`, so
/// `condition.then(|| timeline)` and literal placeholders both work.
pub enum Branch<T: 'static> {
    Run(Timeline<T>),
    Skip,
}

impl<T: 'static> From<bool> for Branch<T> {
    fn from(_: bool) -> Self {
        Branch::Skip
    }
}

impl<T: 'static> From<Timeline<T>> for Branch<T> {
    fn from(timeline: Timeline<T>) -> Self {
        Branch::Run(timeline)
    }
}

impl<T: 'static> From<ReusableTimeline<T>> for Branch<T> {
    fn from(timeline: ReusableTimeline<T>) -> Self {
        Branch::Run(timeline.into())
    }
}

impl<T: 'static> From<OnceTimeline<T>> for Branch<T> {
    fn from(timeline: OnceTimeline<T>) -> Self {
        Branch::Run(timeline.into())
    }
}

impl<T: 'static, B: Into<Timeline<T>>> From<Option<B>> for Branch<T> {
    fn from(timeline: Option<B>) -> Self {
        match timeline {
            Some(timeline) => Branch::Run(timeline.into()),
            None => Branch::Skip,
        }
    }
}

/// Run `timeline` inside `cx`'s step until it finishes or `signal` fires.
///
/// Thin free-function form of [`Cx::abortable`].
pub async fn abortable<T: 'static, R: 'static>(
    cx: &Cx<T>,
    timeline: impl Into<Timeline<T, R>>,
    signal: AbortSignal,
) -> crate::context::BranchOutcome<R> {
    cx.abortable(timeline, signal).await
}

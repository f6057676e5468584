//! Timeline Context
//!
//! The handle every coroutine receives. It carries the coroutine's update
//! slot (where the active step installs its per-frame function), the signal
//! that governs the coroutine's lifetime, and the state shared by the whole
//! runner. Branching creates a nested driver whose lifetime is bound to the
//! parent's; parents only ever hand children a signal, never themselves.

use crate::action::{Action, StepState};
use crate::error::{ErrorHandler, Result, TimelineError};
use crate::executor::Executor;
use crate::signal::{AbortController, AbortReason, AbortSignal, ListenerId};
use crate::timeline::{Timeline, TimelineFuture};
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Per-runner frame clock, advanced once per `update` call.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Clock {
    /// Seconds since the previous frame.
    pub delta: f64,
    /// `delta` of the frame before, `None` on the first frame.
    pub previous_delta: Option<f64>,
    /// Sum of all deltas.
    pub time: f64,
    /// Number of frames seen, starting at 1 on the first update.
    pub frame: u64,
}

impl Clock {
    pub(crate) fn advance(&mut self, delta: f64) {
        let d = if delta.is_finite() && delta > 0.0 { delta } else { 0.0 };
        self.previous_delta = (self.frame > 0).then_some(self.delta);
        self.delta = d;
        self.time += d;
        self.frame += 1;
    }
}

/// Function a step installs to be called every frame.
pub type UpdateHook<T> = Box<dyn FnMut(&mut T, &Clock)>;

struct SlotInner<T> {
    hook: Option<UpdateHook<T>>,
    generation: u64,
}

/// The place a coroutine's active step puts its update function.
///
/// The hook is taken out while it runs, so a hook may end its own step (or
/// tick other slots) without aliasing the slot.
pub(crate) struct UpdateSlot<T> {
    inner: Rc<RefCell<SlotInner<T>>>,
}

impl<T> Clone for UpdateSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> UpdateSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SlotInner {
                hook: None,
                generation: 0,
            })),
        }
    }

    pub(crate) fn install(&self, hook: UpdateHook<T>) -> u64 {
        let mut inner = self.inner.borrow_mut();
        inner.generation += 1;
        inner.hook = Some(hook);
        inner.generation
    }

    /// Remove the hook installed as `generation`, if it is still the current one.
    pub(crate) fn clear(&self, generation: u64) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            if inner.generation != generation {
                return;
            }
            inner.generation += 1;
            inner.hook.take()
        };
        drop(removed);
    }

    pub(crate) fn tick(&self, state: &mut T, clock: &Clock) {
        let (hook, generation) = {
            let mut inner = self.inner.borrow_mut();
            (inner.hook.take(), inner.generation)
        };
        let Some(mut hook) = hook else {
            return;
        };
        hook(state, clock);

        let mut inner = self.inner.borrow_mut();
        if inner.generation == generation && inner.hook.is_none() {
            inner.hook = Some(hook);
        } else {
            drop(inner);
            drop(hook);
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        let inner = self.inner.borrow();
        inner.hook.is_some()
    }
}

/// Typed values visible to every coroutine below the point they were provided.
#[derive(Clone, Default)]
pub struct ContextMap {
    values: Rc<HashMap<TypeId, Rc<dyn Any>>>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of this map with `value` added (or replacing the previous value of its type).
    pub fn with<C: 'static>(&self, value: C) -> Self {
        let mut values = (*self.values).clone();
        values.insert(TypeId::of::<C>(), Rc::new(value));
        Self {
            values: Rc::new(values),
        }
    }

    pub fn get<C: 'static>(&self) -> Option<Rc<C>> {
        self.values
            .get(&TypeId::of::<C>())
            .cloned()
            .and_then(|value| value.downcast::<C>().ok())
    }
}

/// State shared by every coroutine of one runner.
pub(crate) struct Shared {
    pub(crate) executor: Rc<Executor>,
    pub(crate) frame: Cell<u64>,
    pub(crate) on_error: ErrorHandler,
}

impl Shared {
    pub(crate) fn new(executor: Rc<Executor>, on_error: ErrorHandler) -> Self {
        Self {
            executor,
            frame: Cell::new(0),
            on_error,
        }
    }
}

/// A handle to the running coroutine.
pub struct Cx<T: 'static> {
    shared: Rc<Shared>,
    slot: UpdateSlot<T>,
    abort: AbortSignal,
    contexts: ContextMap,
}

impl<T: 'static> Clone for Cx<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            slot: self.slot.clone(),
            abort: self.abort.clone(),
            contexts: self.contexts.clone(),
        }
    }
}

impl<T: 'static> Cx<T> {
    pub(crate) fn new(
        shared: Rc<Shared>,
        slot: UpdateSlot<T>,
        abort: AbortSignal,
        contexts: ContextMap,
    ) -> Self {
        Self {
            shared,
            slot,
            abort,
            contexts,
        }
    }

    /// The signal that fires when this coroutine is cancelled from above.
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Frames the runner has processed so far.
    pub fn frame(&self) -> u64 {
        self.shared.frame.get()
    }

    /// Look up a context value provided by the runner or an ancestor.
    pub fn context<C: 'static>(&self) -> Option<Rc<C>> {
        self.contexts.get::<C>()
    }

    /// A handle for the same coroutine that additionally provides `value`
    /// to everything started through it.
    pub fn provide<C: 'static>(&self, value: C) -> Cx<T> {
        Cx {
            contexts: self.contexts.with(value),
            ..self.clone()
        }
    }

    pub(crate) fn slot(&self) -> &UpdateSlot<T> {
        &self.slot
    }

    /// Start `timeline` as a nested coroutine.
    ///
    /// The branch lives until it returns, until `signal` fires, until this
    /// coroutine is cancelled, or until [`BranchHandle::cancel`]. It only
    /// advances when the returned handle is ticked.
    pub fn branch<R: 'static>(
        &self,
        timeline: impl Into<Timeline<T, R>>,
        signal: AbortSignal,
    ) -> BranchHandle<T, R> {
        let own = AbortController::new();
        let abort = AbortSignal::any([self.abort.clone(), signal, own.signal()]);
        let slot = UpdateSlot::new();
        let child = Cx {
            shared: self.shared.clone(),
            slot: slot.clone(),
            abort: abort.clone(),
            contexts: self.contexts.clone(),
        };

        let done = AbortController::new();
        let outcome = Rc::new(RefCell::new(None));

        let drive = Drive::new(timeline.into().start(child), abort, self.shared.on_error.clone());
        let task_done = done.clone();
        let task_outcome = outcome.clone();
        let task = self.shared.executor.spawn(async move {
            let result = drive.await;
            let reason = match &result {
                BranchOutcome::Aborted(reason) => reason.clone(),
                _ => AbortReason::Completed,
            };
            *task_outcome.borrow_mut() = Some(result);
            task_done.abort(reason);
        });
        tracing::trace!(task = task.id(), "branch started");

        BranchHandle {
            slot,
            own,
            done: done.signal(),
            outcome,
        }
    }

    /// Run `timeline` as a single step of this coroutine, ending early when `signal` fires.
    pub async fn abortable<R: 'static>(
        &self,
        timeline: impl Into<Timeline<T, R>>,
        signal: AbortSignal,
    ) -> BranchOutcome<R> {
        let handle = self.branch(timeline, signal);
        let done = handle.done_signal();
        let ticker = handle.clone();
        let canceller = handle.clone();

        self.action(
            Action::new()
                .init(move || move || canceller.cancel())
                .update(move |state: &mut T, clock: &Clock, _: &mut StepState| ticker.tick(state, clock))
                .until(done.aborted()),
        )
        .await;

        handle
            .take_outcome()
            .unwrap_or(BranchOutcome::Aborted(AbortReason::Cancelled))
    }

    /// Bind a lifetime to the execution span of `body`.
    ///
    /// The signal handed to `body` fires when this coroutine is cancelled or
    /// when `body` returns, whichever comes first, and also if the scope is
    /// dropped before `body` ever runs.
    pub async fn scope<R, F, Fut>(&self, body: F) -> Result<R>
    where
        F: FnOnce(AbortSignal) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let scope = AbortController::new();
        let link = {
            let scope = scope.clone();
            self.abort
                .add_listener(move |reason| {
                    scope.abort(reason.clone());
                })
        };
        let guard = ScopeGuard {
            scope: scope.clone(),
            parent: self.abort.clone(),
            link,
        };
        let result = body(scope.signal()).await;
        drop(guard);
        result
    }
}

struct ScopeGuard {
    scope: AbortController,
    parent: AbortSignal,
    link: Option<ListenerId>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(id) = self.link.take() {
            self.parent.remove_listener(id);
        }
        self.scope.abort(AbortReason::Completed);
    }
}

/// How a branch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchOutcome<R> {
    /// The coroutine returned a value.
    Finished(R),
    /// Its governing signal fired first.
    Aborted(AbortReason),
    /// The coroutine returned an error, already passed to the error handler.
    Failed(TimelineError),
}

impl<R> BranchOutcome<R> {
    pub fn finished(self) -> Option<R> {
        match self {
            BranchOutcome::Finished(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, BranchOutcome::Finished(_))
    }
}

/// Parent-side handle to a nested coroutine.
pub struct BranchHandle<T: 'static, R: 'static> {
    slot: UpdateSlot<T>,
    own: AbortController,
    done: AbortSignal,
    outcome: Rc<RefCell<Option<BranchOutcome<R>>>>,
}

impl<T: 'static, R: 'static> Clone for BranchHandle<T, R> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            own: self.own.clone(),
            done: self.done.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

impl<T: 'static, R: 'static> BranchHandle<T, R> {
    /// Forward one frame to the branch's active step.
    pub fn tick(&self, state: &mut T, clock: &Clock) {
        if self.done.is_aborted() {
            return;
        }
        self.slot.tick(state, clock);
    }

    /// Cancel the branch and everything below it.
    pub fn cancel(&self) {
        self.own.abort(AbortReason::Cancelled);
    }

    pub fn is_done(&self) -> bool {
        self.done.is_aborted()
    }

    /// Whether a step of the branch is currently waiting for ticks.
    pub fn has_active_step(&self) -> bool {
        self.slot.is_active()
    }

    /// Fires once the branch has ended, after its outcome is available.
    pub fn done_signal(&self) -> AbortSignal {
        self.done.clone()
    }

    pub fn take_outcome(&self) -> Option<BranchOutcome<R>> {
        self.outcome.borrow_mut().take()
    }

    /// Wait for the branch to end.
    pub async fn join(&self) -> Option<BranchOutcome<R>> {
        self.done.aborted().await;
        self.take_outcome()
    }
}

/// Driver for one coroutine: checks the governing signal before every poll
/// and drops the coroutine, without polling it again, once the signal fired.
pub(crate) struct Drive<R> {
    fut: Option<TimelineFuture<R>>,
    abort: AbortSignal,
    on_error: ErrorHandler,
}

impl<R> Drive<R> {
    pub(crate) fn new(fut: TimelineFuture<R>, abort: AbortSignal, on_error: ErrorHandler) -> Self {
        Self {
            fut: Some(fut),
            abort,
            on_error,
        }
    }
}

impl<R> Future for Drive<R> {
    type Output = BranchOutcome<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(reason) = this.abort.reason() {
            this.fut = None;
            return Poll::Ready(BranchOutcome::Aborted(reason));
        }
        let Some(fut) = this.fut.as_mut() else {
            return Poll::Ready(BranchOutcome::Aborted(AbortReason::Cancelled));
        };

        match fut.as_mut().poll(cx) {
            Poll::Ready(Ok(value)) => {
                this.fut = None;
                Poll::Ready(BranchOutcome::Finished(value))
            }
            Poll::Ready(Err(err)) => {
                this.fut = None;
                (this.on_error)(&err);
                Poll::Ready(BranchOutcome::Failed(err))
            }
            Poll::Pending => {
                // The signal may have fired while the coroutine was being polled.
                if let Some(reason) = this.abort.reason() {
                    this.fut = None;
                    return Poll::Ready(BranchOutcome::Aborted(reason));
                }
                this.abort.register_waker(cx.waker());
                Poll::Pending
            }
        }
    }
}

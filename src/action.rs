//! Actions
//!
//! An [`Action`] is one step of a coroutine. While it is active its update
//! functions run once per frame; it ends when an update returns `false`, when
//! its `until` future resolves, or when the coroutine is cancelled. However it
//! ends, the cleanups returned by its `init` functions run exactly once,
//! before the coroutine moves on.

use crate::context::{Clock, Cx, UpdateSlot};
use crate::signal::{AbortController, AbortReason, AbortSignal, ListenerId};
use futures::future::{self, FutureExt, LocalBoxFuture};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;

/// Runs when the step that registered it ends.
pub type Cleanup = Box<dyn FnOnce()>;

type InitFn = Box<dyn FnOnce() -> Option<Cleanup>>;
type UpdateFn<T> = Box<dyn FnMut(&mut T, &Clock, &mut StepState) -> Option<bool>>;

/// Scratch space private to one update function of one step.
#[derive(Default)]
pub struct Memo {
    values: HashMap<&'static str, Box<dyn Any>>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<V: 'static>(&self, key: &'static str) -> Option<&V> {
        self.values.get(key).and_then(|value| value.downcast_ref::<V>())
    }

    pub fn insert<V: 'static>(&mut self, key: &'static str, value: V) {
        self.values.insert(key, Box::new(value));
    }

    /// The value stored under `key`, created by `init` on first access.
    ///
    /// # Panics
    /// If `key` already holds a value of another type.
    pub fn get_or_insert_with<V: 'static>(&mut self, key: &'static str, init: impl FnOnce() -> V) -> &mut V {
        self.values
            .entry(key)
            .or_insert_with(|| Box::new(init()))
            .downcast_mut::<V>()
            .expect("memo key reused with a different type")
    }

    pub fn remove(&mut self, key: &'static str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What an update function sees of its step besides state and clock.
#[derive(Default)]
pub struct StepState {
    time: f64,
    memo: Memo,
}

impl StepState {
    /// Seconds of frame time since the step started, including the current frame.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn memo(&mut self) -> &mut Memo {
        &mut self.memo
    }
}

/// Return values an update function may produce.
///
/// `()` and `None` leave the decision to other updates (and default to
/// continuing); `false` ends the step.
pub trait IntoContinue {
    fn into_continue(self) -> Option<bool>;
}

impl IntoContinue for () {
    fn into_continue(self) -> Option<bool> {
        None
    }
}

impl IntoContinue for bool {
    fn into_continue(self) -> Option<bool> {
        Some(self)
    }
}

impl IntoContinue for Option<bool> {
    fn into_continue(self) -> Option<bool> {
        self
    }
}

/// Builder for a single step.
pub struct Action<T: 'static> {
    inits: Vec<InitFn>,
    updates: Vec<UpdateFn<T>>,
    until: Option<LocalBoxFuture<'static, ()>>,
}

impl<T: 'static> Default for Action<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Action<T> {
    /// An action with nothing attached waits until it is cancelled.
    pub fn new() -> Self {
        Self {
            inits: Vec::new(),
            updates: Vec::new(),
            until: None,
        }
    }

    /// Run `f` when the step starts; the closure it returns runs when the step ends.
    pub fn init<F, C>(mut self, f: F) -> Self
    where
        F: FnOnce() -> C + 'static,
        C: FnOnce() + 'static,
    {
        self.inits.push(Box::new(move || Some(Box::new(f()) as Cleanup)));
        self
    }

    /// Run `f` when the step starts, without a cleanup.
    pub fn on_start(mut self, f: impl FnOnce() + 'static) -> Self {
        self.inits.push(Box::new(move || {
            f();
            None
        }));
        self
    }

    /// Add a per-frame update. Several updates run in the order they were
    /// added, each with its own [`StepState`]; the first one returning an
    /// explicit value decides whether the step continues.
    pub fn update<F, C>(mut self, mut f: F) -> Self
    where
        F: FnMut(&mut T, &Clock, &mut StepState) -> C + 'static,
        C: IntoContinue,
    {
        self.updates
            .push(Box::new(move |state, clock, step| f(state, clock, step).into_continue()));
        self
    }

    /// End the step when `until` resolves. A second call replaces the first.
    pub fn until(mut self, until: impl Future + 'static) -> Self {
        self.until = Some(until.map(|_| ()).boxed_local());
        self
    }
}

/// Ends the step when the awaiting coroutine moves on or is dropped mid-step.
struct StepGuard<T: 'static> {
    slot: UpdateSlot<T>,
    generation: Option<u64>,
    parent: AbortSignal,
    link: Option<ListenerId>,
    step: AbortController,
}

impl<T: 'static> Drop for StepGuard<T> {
    fn drop(&mut self) {
        if let Some(generation) = self.generation.take() {
            self.slot.clear(generation);
        }
        if let Some(link) = self.link.take() {
            self.parent.remove_listener(link);
        }
        self.step.abort(AbortReason::Completed);
    }
}

impl<T: 'static> Cx<T> {
    /// Run one step. Returns once the step has ended and its cleanups ran.
    ///
    /// On an already cancelled coroutine this returns immediately without
    /// running any `init`.
    pub async fn action(&self, action: Action<T>) {
        if self.is_aborted() {
            return;
        }
        let Action { inits, updates, until } = action;
        let step = AbortController::new();

        for init in inits {
            if let Some(cleanup) = init() {
                step.signal().add_listener(move |_| cleanup());
            }
        }

        let link = {
            let step = step.clone();
            self.abort_signal().add_listener(move |reason| {
                step.abort(reason.clone());
            })
        };

        let generation = if updates.is_empty() {
            None
        } else {
            let generation = self.slot().install(step_hook(updates, step.clone()));
            let slot = self.slot().clone();
            step.signal().add_listener(move |_| slot.clear(generation));
            Some(generation)
        };
        tracing::trace!(step = step.signal().id(), hooked = generation.is_some(), "step started");

        let guard = StepGuard {
            slot: self.slot().clone(),
            generation,
            parent: self.abort_signal().clone(),
            link,
            step: step.clone(),
        };

        let ended = step.signal().aborted();
        match until {
            Some(until) => {
                future::select(until, ended).await;
            }
            None => {
                ended.await;
            }
        }
        drop(guard);
        tracing::trace!(step = step.signal().id(), "step ended");
    }

    /// A step that never ends on its own.
    pub async fn idle(&self) {
        self.action(Action::new()).await
    }

    /// A step lasting exactly one tick.
    pub async fn next_frame(&self) {
        self.action(Action::new().update(|_: &mut T, _: &Clock, _: &mut StepState| false))
            .await
    }
}

fn step_hook<T: 'static>(mut updates: Vec<UpdateFn<T>>, step: AbortController) -> crate::context::UpdateHook<T> {
    let mut states: Vec<StepState> = updates.iter().map(|_| StepState::default()).collect();
    let mut time = 0.0;
    Box::new(move |state: &mut T, clock: &Clock| {
        time += clock.delta;
        let mut decided = None;
        for (update, step_state) in updates.iter_mut().zip(states.iter_mut()) {
            step_state.time = time;
            let result = update(state, clock, step_state);
            if decided.is_none() {
                decided = result;
            }
        }
        if decided == Some(false) {
            step.abort(AbortReason::Completed);
        }
    })
}

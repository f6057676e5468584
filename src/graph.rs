//! State graph
//!
//! Named states, each a timeline plus outgoing transitions. A state-run races
//! the state's timeline against its transition watchers; whichever finishes
//! first picks the next state. A state whose timeline ends without naming a
//! next state and without a `finally` target leaves the graph idle until it
//! is told where to go.

use crate::action::{Action, StepState};
use crate::context::{Clock, Cx};
use crate::error::{Result, TimelineError};
use crate::parallel::race;
use crate::signal::{AbortController, AbortReason};
use crate::singleton::Singleton;
use crate::timeline::{Branch, Condition, ReusableTimeline, Timeline};
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

type FutureFactory = Rc<dyn Fn() -> LocalBoxFuture<'static, ()>>;

/// Condition for leaving a state.
pub struct Transition<T: 'static> {
    when_update: Option<Condition<T>>,
    when_future: Option<FutureFactory>,
}

impl<T: 'static> Clone for Transition<T> {
    fn clone(&self) -> Self {
        Self {
            when_update: self.when_update.clone(),
            when_future: self.when_future.clone(),
        }
    }
}

impl<T: 'static> Default for Transition<T> {
    /// A transition without a condition. Rejected by the graph.
    fn default() -> Self {
        Self {
            when_update: None,
            when_future: None,
        }
    }
}

impl<T: 'static> Transition<T> {
    /// Taken on the first frame `condition` holds.
    pub fn when_update(condition: impl Fn(&T, &Clock) -> bool + 'static) -> Self {
        Self {
            when_update: Some(Rc::new(condition)),
            when_future: None,
        }
    }

    /// Taken when the future made by `make` resolves. A fresh future is made
    /// every time the state is entered.
    pub fn when_future<F, Fut>(make: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future + 'static,
    {
        Self {
            when_update: None,
            when_future: Some(Rc::new(move || make().map(|_| ()).boxed_local())),
        }
    }

    fn is_valid(&self) -> bool {
        self.when_update.is_some() || self.when_future.is_some()
    }

    /// Resolves when the transition should be taken.
    async fn watch(&self, cx: &Cx<T>) {
        if let Some(condition) = self.when_update.clone() {
            cx.action(
                Action::new().update(move |state: &mut T, clock: &Clock, _: &mut StepState| !condition(state, clock)),
            )
            .await;
        } else if let Some(make) = &self.when_future {
            cx.action(Action::new().until(make())).await;
        }
    }
}

/// A state: its timeline, optionally returning the next state's name, and its transitions.
pub struct GraphState<T: 'static> {
    timeline: ReusableTimeline<T, Option<String>>,
    transitions: Vec<(String, Transition<T>)>,
    finally: Option<String>,
}

impl<T: 'static> GraphState<T> {
    pub fn new(timeline: ReusableTimeline<T, Option<String>>) -> Self {
        Self {
            timeline,
            transitions: Vec::new(),
            finally: None,
        }
    }

    /// A state whose timeline never names a next state.
    pub fn from_timeline(timeline: ReusableTimeline<T>) -> Self {
        Self::new(timeline.map(|()| None))
    }

    pub fn transition(mut self, to: impl Into<String>, transition: Transition<T>) -> Self {
        self.transitions.push((to.into(), transition));
        self
    }

    /// Next state when the timeline ends without naming one.
    pub fn finally(mut self, to: impl Into<String>) -> Self {
        self.finally = Some(to.into());
        self
    }

    fn validate(&self, from: &str) -> Result<()> {
        match self.transitions.iter().find(|(_, t)| !t.is_valid()) {
            Some((to, _)) => Err(TimelineError::MalformedTransition {
                from: from.to_string(),
                to: to.clone(),
            }),
            None => Ok(()),
        }
    }
}

struct GraphInner<T: 'static> {
    current: String,
    states: HashMap<String, Rc<GraphState<T>>>,
    /// Fired to abandon the current state-run.
    restart: Option<AbortController>,
    enter_state: String,
    exit_state: Option<String>,
    reset_on_run: bool,
}

/// A named-state machine.
pub struct TimelineGraph<T: 'static> {
    inner: Rc<RefCell<GraphInner<T>>>,
    guard: Singleton,
}

impl<T: 'static> Clone for TimelineGraph<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T: 'static> TimelineGraph<T> {
    /// A graph starting in `enter_state`. Fails on the first transition without a condition.
    pub fn new(
        enter_state: impl Into<String>,
        states: impl IntoIterator<Item = (String, GraphState<T>)>,
    ) -> Result<Self> {
        let mut map = HashMap::new();
        for (name, state) in states {
            state.validate(&name)?;
            map.insert(name, Rc::new(state));
        }
        let enter_state = enter_state.into();
        Ok(Self {
            inner: Rc::new(RefCell::new(GraphInner {
                current: enter_state.clone(),
                states: map,
                restart: None,
                enter_state,
                exit_state: None,
                reset_on_run: false,
            })),
            guard: Singleton::new("TimelineGraph"),
        })
    }

    /// Entering `exit_state` ends `run`.
    pub fn with_exit_state(self, exit_state: impl Into<String>) -> Self {
        self.inner.borrow_mut().exit_state = Some(exit_state.into());
        self
    }

    /// Whether each `run` starts over from the enter state.
    pub fn with_reset_on_run(self, reset_on_run: bool) -> Self {
        self.inner.borrow_mut().reset_on_run = reset_on_run;
        self
    }

    pub fn current_state(&self) -> String {
        self.inner.borrow().current.clone()
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.inner.borrow().states.contains_key(name)
    }

    /// Add or replace a state. Replacing the current state restarts it.
    pub fn add_state(&self, name: impl Into<String>, state: GraphState<T>) -> Result<()> {
        let name = name.into();
        state.validate(&name)?;
        let restart = {
            let mut inner = self.inner.borrow_mut();
            inner.states.insert(name.clone(), Rc::new(state));
            (inner.current == name).then(|| inner.restart.clone()).flatten()
        };
        if let Some(restart) = restart {
            restart.abort(AbortReason::Restarted);
        }
        Ok(())
    }

    /// Remove a state. Removing the current state leaves the graph idle in it.
    pub fn remove_state(&self, name: &str) -> bool {
        let (removed, restart) = {
            let mut inner = self.inner.borrow_mut();
            let removed = inner.states.remove(name).is_some();
            let restart = (inner.current == name).then(|| inner.restart.clone()).flatten();
            (removed, restart)
        };
        if let Some(restart) = restart {
            restart.abort(AbortReason::Restarted);
        }
        removed
    }

    /// Force a transition. The current state-run is torn down before this returns.
    pub fn set_state(&self, name: impl Into<String>) {
        let name = name.into();
        let restart = {
            let mut inner = self.inner.borrow_mut();
            if inner.current == name {
                return;
            }
            tracing::debug!(from = %inner.current, to = %name, "graph state set");
            inner.current = name;
            inner.restart.clone()
        };
        if let Some(restart) = restart {
            restart.abort(AbortReason::Restarted);
        }
    }

    /// Run state after state until the exit state is reached.
    pub async fn run(&self, cx: &Cx<T>) -> Result<()> {
        self.guard
            .run(cx, |_| async move {
                {
                    let mut inner = self.inner.borrow_mut();
                    if inner.reset_on_run {
                        inner.current = inner.enter_state.clone();
                    }
                }
                while !cx.is_aborted() {
                    let restart = AbortController::new();
                    let (name, state) = {
                        let mut inner = self.inner.borrow_mut();
                        if inner.exit_state.as_ref() == Some(&inner.current) {
                            break;
                        }
                        inner.restart = Some(restart.clone());
                        (inner.current.clone(), inner.states.get(&inner.current).cloned())
                    };
                    tracing::debug!(state = %name, "graph state entered");

                    let next = Rc::new(RefCell::new(None));
                    let state_run = state_run(state, next.clone());
                    cx.abortable(state_run, restart.signal()).await;

                    if restart.is_aborted() {
                        continue;
                    }
                    let next = next.borrow_mut().take();
                    match next {
                        Some(next) => {
                            tracing::debug!(from = %name, to = %next, "graph transition");
                            self.inner.borrow_mut().current = next;
                        }
                        None => {
                            // No next state: wait for set_state, add_state or remove_state.
                            cx.action(Action::new().until(restart.signal().aborted())).await;
                        }
                    }
                }
                self.inner.borrow_mut().restart = None;
                Ok(())
            })
            .await
    }
}

/// Race the state's transitions (in declaration order) against its timeline.
/// Writes the chosen next state into `next`.
fn state_run<T: 'static>(state: Option<Rc<GraphState<T>>>, next: Rc<RefCell<Option<String>>>) -> Timeline<T> {
    Timeline::once(move |cx: Cx<T>| async move {
        let Some(state) = state else {
            cx.idle().await;
            return Ok(());
        };

        let mut branches: Vec<Branch<T>> = state
            .transitions
            .iter()
            .map(|(to, transition)| {
                let (to, transition, next) = (to.clone(), transition.clone(), next.clone());
                Branch::Run(Timeline::once(move |cx: Cx<T>| async move {
                    transition.watch(&cx).await;
                    *next.borrow_mut() = Some(to);
                    Ok(())
                }))
            })
            .collect();

        let body = state.clone();
        branches.push(Branch::Run(Timeline::once(move |cx: Cx<T>| async move {
            let returned = body.timeline.start(cx.clone()).await?;
            match returned.or_else(|| body.finally.clone()) {
                Some(to) => *next.borrow_mut() = Some(to),
                None => cx.idle().await,
            }
            Ok(())
        })));

        race(&cx, branches).await
    })
}

/// Run a graph over `states` starting in `enter_state`.
pub async fn graph<T: 'static>(
    cx: &Cx<T>,
    enter_state: impl Into<String>,
    states: impl IntoIterator<Item = (String, GraphState<T>)>,
) -> Result<()> {
    TimelineGraph::new(enter_state, states)?.run(cx).await
}

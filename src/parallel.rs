//! Parallel composition
//!
//! Children run as branches of the parent coroutine and are ticked in the
//! order they were started. Each child's lifetime is the parent's internal
//! signal combined with its own, so ending the parallel ends every child
//! synchronously, before the parent moves on.

use crate::action::{Action, StepState};
use crate::context::{BranchHandle, Clock, Cx};
use crate::error::Result;
use crate::signal::{AbortController, AbortReason};
use crate::singleton::Singleton;
use crate::timeline::{Branch, ReusableTimeline, Timeline};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// When a parallel composition finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParallelMode {
    /// Once every child has finished.
    All,
    /// Once the first child finishes; the others are cancelled.
    Race,
}

/// Identifies an attached child for [`ParallelTimeline::unattach`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChildId(u64);

struct Child<T: 'static> {
    id: ChildId,
    handle: BranchHandle<T, ()>,
    finished: bool,
}

struct Running<T: 'static> {
    cx: Cx<T>,
    internal: AbortController,
    children: Vec<Child<T>>,
}

impl<T: 'static> Running<T> {
    fn is_complete(&self, mode: ParallelMode) -> bool {
        match mode {
            ParallelMode::Race => self.children.iter().any(|c| c.finished),
            ParallelMode::All => !self.children.is_empty() && self.children.iter().all(|c| c.finished),
        }
    }
}

struct ParallelInner<T: 'static> {
    mode: ParallelMode,
    entries: Vec<(ChildId, ReusableTimeline<T>)>,
    next_id: u64,
    running: Option<Running<T>>,
}

/// A parallel composition whose children can change while it runs.
pub struct ParallelTimeline<T: 'static> {
    inner: Rc<RefCell<ParallelInner<T>>>,
    guard: Singleton,
}

impl<T: 'static> Clone for ParallelTimeline<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T: 'static> ParallelTimeline<T> {
    pub fn new(mode: ParallelMode) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ParallelInner {
                mode,
                entries: Vec::new(),
                next_id: 0,
                running: None,
            })),
            guard: Singleton::new("ParallelTimeline"),
        }
    }

    pub fn with_timelines(mode: ParallelMode, timelines: impl IntoIterator<Item = ReusableTimeline<T>>) -> Self {
        let parallel = Self::new(mode);
        for timeline in timelines {
            parallel.attach(timeline);
        }
        parallel
    }

    pub fn mode(&self) -> ParallelMode {
        self.inner.borrow().mode
    }

    /// Number of attached timelines.
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.inner.borrow().running.is_some()
    }

    /// Add a child. A running composition starts it right away.
    pub fn attach(&self, timeline: ReusableTimeline<T>) -> ChildId {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = ChildId(inner.next_id);
            inner.next_id += 1;
            inner.entries.push((id, timeline.clone()));
            id
        };
        start_child(&self.inner, id, timeline.into());
        id
    }

    /// Remove a child, cancelling it if it is running. A removed child does
    /// not count as finished.
    pub fn unattach(&self, id: ChildId) -> bool {
        let (found, removed, complete) = {
            let mut inner = self.inner.borrow_mut();
            let before = inner.entries.len();
            inner.entries.retain(|(entry, _)| *entry != id);
            let found = inner.entries.len() != before;

            let mode = inner.mode;
            match inner.running.as_mut() {
                Some(running) => {
                    let removed = running
                        .children
                        .iter()
                        .position(|c| c.id == id)
                        .map(|pos| running.children.remove(pos));
                    let complete = running.is_complete(mode).then(|| running.internal.clone());
                    (found, removed, complete)
                }
                None => (found, None, None),
            }
        };

        if let Some(child) = removed {
            tracing::debug!(child = child.id.0, "parallel child unattached");
            child.handle.cancel();
        }
        if let Some(internal) = complete {
            internal.abort(AbortReason::Completed);
        }
        found
    }

    /// Run every attached child until the mode's completion condition.
    ///
    /// Without children the run waits for the first [`attach`](Self::attach).
    pub async fn run(&self, cx: &Cx<T>) -> Result<()> {
        self.guard
            .run(cx, |_| run_children(&self.inner, cx, Vec::new(), false))
            .await
    }
}

/// Run `branches` concurrently. Skipped branches are never started; with no
/// branch left this returns at once.
pub async fn parallel<T: 'static>(
    cx: &Cx<T>,
    mode: ParallelMode,
    branches: impl IntoIterator<Item = Branch<T>>,
) -> Result<()> {
    let timelines: Vec<Timeline<T>> = branches
        .into_iter()
        .filter_map(|branch| match branch {
            Branch::Run(timeline) => Some(timeline),
            Branch::Skip => None,
        })
        .collect();
    let parallel = ParallelTimeline::new(mode);
    run_children(&parallel.inner, cx, timelines, true).await
}

/// [`parallel`] in [`ParallelMode::Race`].
pub async fn race<T: 'static>(cx: &Cx<T>, branches: impl IntoIterator<Item = Branch<T>>) -> Result<()> {
    parallel(cx, ParallelMode::Race, branches).await
}

/// [`parallel`] in [`ParallelMode::All`].
pub async fn all<T: 'static>(cx: &Cx<T>, branches: impl IntoIterator<Item = Branch<T>>) -> Result<()> {
    parallel(cx, ParallelMode::All, branches).await
}

async fn run_children<T: 'static>(
    inner: &Rc<RefCell<ParallelInner<T>>>,
    cx: &Cx<T>,
    extra: Vec<Timeline<T>>,
    finish_when_empty: bool,
) -> Result<()> {
    let internal = AbortController::new();
    let entries = {
        let mut inner = inner.borrow_mut();
        inner.running = Some(Running {
            cx: cx.clone(),
            internal: internal.clone(),
            children: Vec::new(),
        });
        inner.entries.clone()
    };

    for (id, timeline) in entries {
        start_child(inner, id, timeline.into());
    }
    for timeline in extra {
        let id = {
            let mut inner = inner.borrow_mut();
            let id = ChildId(inner.next_id);
            inner.next_id += 1;
            id
        };
        start_child(inner, id, timeline);
    }

    let started = inner
        .borrow()
        .running
        .as_ref()
        .map_or(0, |running| running.children.len());
    tracing::debug!(children = started, "parallel started");

    if started > 0 || !finish_when_empty {
        let cleanup_inner = inner.clone();
        let cleanup_internal = internal.clone();
        let ticked = inner.clone();
        cx.action(
            Action::new()
                .init(move || move || teardown(&cleanup_inner, &cleanup_internal))
                .update(move |state: &mut T, clock: &Clock, _: &mut StepState| {
                    tick_children(&ticked, state, clock)
                })
                .until(internal.signal().aborted()),
        )
        .await;
    }

    teardown(inner, &internal);
    Ok(())
}

fn teardown<T: 'static>(inner: &Rc<RefCell<ParallelInner<T>>>, internal: &AbortController) {
    let running = inner.borrow_mut().running.take();
    internal.abort(AbortReason::Completed);
    drop(running);
}

fn tick_children<T: 'static>(inner: &Rc<RefCell<ParallelInner<T>>>, state: &mut T, clock: &Clock) {
    // Snapshot: a child may attach, unattach or end the whole composition mid-tick.
    let live: Vec<BranchHandle<T, ()>> = inner
        .borrow()
        .running
        .iter()
        .flat_map(|running| running.children.iter())
        .filter(|child| !child.finished)
        .map(|child| child.handle.clone())
        .collect();
    for handle in live {
        handle.tick(state, clock);
    }
}

fn start_child<T: 'static>(inner: &Rc<RefCell<ParallelInner<T>>>, id: ChildId, timeline: Timeline<T>) {
    let (cx, internal) = match inner.borrow().running.as_ref() {
        Some(running) => (running.cx.clone(), running.internal.signal()),
        None => return,
    };

    let handle = cx.branch(timeline, internal);
    if let Some(running) = inner.borrow_mut().running.as_mut() {
        running.children.push(Child {
            id,
            handle: handle.clone(),
            finished: false,
        });
    }

    let weak: Weak<RefCell<ParallelInner<T>>> = Rc::downgrade(inner);
    handle.done_signal().add_listener(move |_| {
        if let Some(inner) = weak.upgrade() {
            child_finished(&inner, id);
        }
    });
    tracing::debug!(child = id.0, "parallel child started");
}

fn child_finished<T: 'static>(inner: &Rc<RefCell<ParallelInner<T>>>, id: ChildId) {
    let complete = {
        let mut inner = inner.borrow_mut();
        let mode = inner.mode;
        let Some(running) = inner.running.as_mut() else {
            return;
        };
        let Some(child) = running.children.iter_mut().find(|c| c.id == id) else {
            return;
        };
        child.finished = true;
        tracing::debug!(child = id.0, "parallel child finished");
        running.is_complete(mode).then(|| running.internal.clone())
    };
    if let Some(internal) = complete {
        internal.abort(AbortReason::Completed);
    }
}

//! Hot-swappable timelines
//!
//! A [`ReplaceableTimeline`] runs whatever timeline is currently attached.
//! Swapping the attachment tears down every active run and restarts it with
//! the new timeline; unattaching swaps back to the fallback instead of
//! stopping, so whoever awaits the run keeps waiting.

use crate::context::Cx;
use crate::error::Result;
use crate::signal::{AbortController, AbortReason, AbortSignal};
use crate::timeline::ReusableTimeline;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

struct ReplaceableInner<T: 'static> {
    current: ReusableTimeline<T>,
    fallback: ReusableTimeline<T>,
    attached: bool,
    /// One per active run; fired to make that run start over.
    restart: Vec<AbortController>,
    /// One per active run; fired to end that run.
    cancel: Vec<AbortController>,
}

pub struct ReplaceableTimeline<T: 'static> {
    inner: Rc<RefCell<ReplaceableInner<T>>>,
}

impl<T: 'static> Clone for ReplaceableTimeline<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for ReplaceableTimeline<T> {
    fn default() -> Self {
        Self::new(ReusableTimeline::idle())
    }
}

impl<T: 'static> ReplaceableTimeline<T> {
    /// Runs `fallback` while nothing is attached.
    pub fn new(fallback: ReusableTimeline<T>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ReplaceableInner {
                current: fallback.clone(),
                fallback,
                attached: false,
                restart: Vec::new(),
                cancel: Vec::new(),
            })),
        }
    }

    /// Starts out with `timeline` attached.
    pub fn with_timeline(timeline: ReusableTimeline<T>) -> Self {
        let replaceable = Self::default();
        replaceable.attach(timeline);
        replaceable
    }

    pub fn is_attached(&self) -> bool {
        self.inner.borrow().attached
    }

    /// Replace whatever is attached and restart every active run with `timeline`.
    pub fn attach(&self, timeline: ReusableTimeline<T>) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.attached = true;
            inner.current = timeline;
        }
        tracing::debug!("replaceable timeline attached");
        self.restart();
    }

    /// Go back to the fallback. No-op when nothing is attached.
    pub fn unattach(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.attached {
                return;
            }
            inner.attached = false;
            inner.current = inner.fallback.clone();
        }
        tracing::debug!("replaceable timeline unattached");
        self.restart();
    }

    /// End every active run without restarting it.
    pub fn cancel(&self) {
        let cancel = {
            let mut inner = self.inner.borrow_mut();
            inner.restart.clear();
            std::mem::take(&mut inner.cancel)
        };
        for controller in cancel {
            controller.abort(AbortReason::Cancelled);
        }
    }

    fn restart(&self) {
        let restart = {
            let mut inner = self.inner.borrow_mut();
            inner.cancel.clear();
            std::mem::take(&mut inner.restart)
        };
        for controller in restart {
            controller.abort(AbortReason::Replaced);
        }
    }

    /// Run the attached timeline, starting over whenever it is replaced.
    /// Returns when the running timeline finishes on its own or on [`cancel`](Self::cancel).
    pub async fn run(&self, cx: &Cx<T>) -> Result<()> {
        loop {
            let restart = AbortController::new();
            let cancel = AbortController::new();
            let timeline = {
                let mut inner = self.inner.borrow_mut();
                inner.restart.push(restart.clone());
                inner.cancel.push(cancel.clone());
                inner.current.clone()
            };

            cx.abortable(timeline, AbortSignal::any([restart.signal(), cancel.signal()]))
                .await;

            {
                let mut inner = self.inner.borrow_mut();
                inner.restart.retain(|c| !c.signal().ptr_eq(&restart.signal()));
                inner.cancel.retain(|c| !c.signal().ptr_eq(&cancel.signal()));
            }
            if !restart.is_aborted() || cx.is_aborted() {
                return Ok(());
            }
        }
    }
}

/// Name to [`ReplaceableTimeline`] lookup, created explicitly where needed.
pub struct TimelineRegistry<T: 'static> {
    entries: RefCell<HashMap<String, ReplaceableTimeline<T>>>,
    fallback: ReusableTimeline<T>,
}

impl<T: 'static> Default for TimelineRegistry<T> {
    fn default() -> Self {
        Self::new(ReusableTimeline::idle())
    }
}

impl<T: 'static> TimelineRegistry<T> {
    pub fn new(fallback: ReusableTimeline<T>) -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            fallback,
        }
    }

    fn entry(&self, name: &str) -> ReplaceableTimeline<T> {
        self.entries
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| ReplaceableTimeline::new(self.fallback.clone()))
            .clone()
    }

    pub fn attach(&self, name: &str, timeline: ReusableTimeline<T>) {
        self.entry(name).attach(timeline);
    }

    pub fn unattach(&self, name: &str) {
        let entry = self.entries.borrow().get(name).cloned();
        if let Some(entry) = entry {
            entry.unattach();
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    /// Run whatever is registered under `name`, the fallback until something is.
    pub async fn run(&self, cx: &Cx<T>, name: &str) -> Result<()> {
        let entry = self.entry(name);
        entry.run(cx).await
    }
}

//! FIFO of timelines drained by a single runner.

use crate::context::Cx;
use crate::error::Result;
use crate::signal::{AbortController, AbortReason};
use crate::singleton::Singleton;
use crate::timeline::ReusableTimeline;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;

struct QueueInner<T: 'static> {
    entries: VecDeque<ReusableTimeline<T>>,
    /// Fired and replaced on every empty to non-empty transition.
    not_empty: AbortController,
}

/// A mutable queue; `run` drains it front to back.
pub struct QueueTimeline<T: 'static> {
    inner: Rc<RefCell<QueueInner<T>>>,
    guard: Singleton,
}

impl<T: 'static> Clone for QueueTimeline<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T: 'static> Default for QueueTimeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> QueueTimeline<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(QueueInner {
                entries: VecDeque::new(),
                not_empty: AbortController::new(),
            })),
            guard: Singleton::new("QueueTimeline"),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    /// Insert `timeline` at `index` (clamped to the queue length; `None` appends).
    pub fn attach(&self, timeline: ReusableTimeline<T>, index: Option<usize>) {
        let woken = {
            let mut inner = self.inner.borrow_mut();
            let was_empty = inner.entries.is_empty();
            let index = index.map_or(inner.entries.len(), |i| i.min(inner.entries.len()));
            inner.entries.insert(index, timeline);
            was_empty.then(|| std::mem::take(&mut inner.not_empty))
        };
        if let Some(not_empty) = woken {
            not_empty.abort(AbortReason::Completed);
        }
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().entries.clear();
    }

    /// Resolves once the queue holds at least one entry.
    pub fn wait_until_not_empty(&self) -> impl Future<Output = ()> + 'static {
        let signal = {
            let inner = self.inner.borrow();
            inner.entries.is_empty().then(|| inner.not_empty.signal())
        };
        async move {
            if let Some(signal) = signal {
                signal.aborted().await;
            }
        }
    }

    /// Run entries in FIFO order until the queue is empty. An empty queue
    /// still takes one tick.
    pub async fn run(&self, cx: &Cx<T>) -> Result<()> {
        self.guard
            .run(cx, |_| async move {
                let mut ran_any = false;
                loop {
                    let entry = self.inner.borrow_mut().entries.pop_front();
                    let Some(entry) = entry else {
                        break;
                    };
                    ran_any = true;
                    tracing::debug!(remaining = self.len(), "queue entry started");
                    entry.start(cx.clone()).await?;
                }
                if !ran_any {
                    cx.next_frame().await;
                }
                Ok(())
            })
            .await
    }
}

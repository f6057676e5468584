//! Single-threaded deterministic executor
//!
//! Every coroutine of a runner is a task on one of these. Tasks are polled in
//! the order they were woken, so two runs fed the same frames make the same
//! progress. There is no timer: nothing moves unless the runner drains the
//! queue from inside `update`.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll, RawWaker, RawWakerVTable, Waker},
};

type TaskFuture = Pin<Box<dyn Future<Output = ()>>>;

/// A spawned coroutine driver.
pub struct Task {
    id: u64,
    /// Dropped as soon as the task completes so captured handles are released.
    fut: RefCell<Option<TaskFuture>>,
    /// Whether this task is currently in the ready queue.
    scheduled: Cell<bool>,
    completed: Cell<bool>,
    exec: Weak<RefCell<ExecutorInner>>,
}

impl Task {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }
}

struct ExecutorInner {
    ready: VecDeque<Rc<Task>>,
    /// Every task not yet known to be completed, for teardown.
    live: Vec<Weak<Task>>,
    next_id: u64,
}

/// Single-threaded deterministic executor.
pub struct Executor {
    inner: Rc<RefCell<ExecutorInner>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ExecutorInner {
                ready: VecDeque::new(),
                live: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Spawn a task. It is first polled on the next drain.
    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) -> Rc<Task> {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            id
        };
        let task = Rc::new(Task {
            id,
            fut: RefCell::new(Some(Box::pin(fut))),
            scheduled: Cell::new(false),
            completed: Cell::new(false),
            exec: Rc::downgrade(&self.inner),
        });
        self.inner.borrow_mut().live.push(Rc::downgrade(&task));
        self.enqueue(&task);
        tracing::trace!(task = id, "task spawned");
        task
    }

    fn enqueue(&self, task: &Rc<Task>) {
        if task.completed.get() {
            return;
        }
        if task.scheduled.replace(true) {
            return;
        }
        self.inner.borrow_mut().ready.push_back(task.clone());
    }

    /// Poll ready tasks until none are left. Returns the number of polls performed.
    pub fn run_until_stalled(&self) -> usize {
        let mut polls = 0;
        loop {
            let task = self.inner.borrow_mut().ready.pop_front();
            let Some(task) = task else {
                break;
            };

            task.scheduled.set(false);
            if task.completed.get() {
                continue;
            }

            polls += 1;
            let waker = task_waker(&task);
            let mut cx = Context::from_waker(&waker);

            // Taken out while polling so a task that drops other tasks cannot alias its own slot.
            let Some(mut fut) = task.fut.borrow_mut().take() else {
                continue;
            };
            match fut.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {
                    task.completed.set(true);
                    drop(fut);
                    tracing::trace!(task = task.id, "task completed");
                }
                Poll::Pending => {
                    *task.fut.borrow_mut() = Some(fut);
                }
            }
        }

        if polls > 0 {
            self.inner
                .borrow_mut()
                .live
                .retain(|t| t.upgrade().is_some_and(|t| !t.completed.get()));
        }
        polls
    }

    pub fn has_ready_tasks(&self) -> bool {
        !self.inner.borrow().ready.is_empty()
    }

    /// Number of spawned tasks that have not completed.
    pub fn live_tasks(&self) -> usize {
        self.inner
            .borrow()
            .live
            .iter()
            .filter(|t| t.upgrade().is_some_and(|t| !t.completed.get()))
            .count()
    }

    /// Drop every unfinished task without polling it again.
    pub fn shutdown(&self) {
        let tasks: Vec<Rc<Task>> = {
            let mut inner = self.inner.borrow_mut();
            inner.ready.clear();
            inner.live.drain(..).filter_map(|t| t.upgrade()).collect()
        };
        for task in tasks {
            task.completed.set(true);
            let fut = task.fut.borrow_mut().take();
            drop(fut);
        }
    }
}

// --- Waker implementation ---

// SAFETY: the data pointer is always an `Rc<Task>` leaked by `Rc::into_raw`, and
// each vtable entry balances the strong count. `Rc` is not thread-safe: these
// wakers must never leave the executor's thread, which holds as long as tasks
// are only polled by `run_until_stalled`.
fn task_waker(task: &Rc<Task>) -> Waker {
    unsafe fn clone_fn(data: *const ()) -> RawWaker {
        let task = Rc::<Task>::from_raw(data as *const Task);
        let cloned = task.clone();
        std::mem::forget(task);
        RawWaker::new(Rc::into_raw(cloned) as *const (), &VTABLE)
    }

    unsafe fn wake_fn(data: *const ()) {
        wake_by_ref_fn(data);
        drop_fn(data);
    }

    unsafe fn wake_by_ref_fn(data: *const ()) {
        let task = Rc::<Task>::from_raw(data as *const Task);
        if !task.completed.get() {
            if let Some(exec) = task.exec.upgrade() {
                if !task.scheduled.replace(true) {
                    exec.borrow_mut().ready.push_back(task.clone());
                }
            }
        }
        std::mem::forget(task);
    }

    unsafe fn drop_fn(data: *const ()) {
        drop(Rc::<Task>::from_raw(data as *const Task));
    }

    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_fn, wake_fn, wake_by_ref_fn, drop_fn);

    let raw = RawWaker::new(Rc::into_raw(task.clone()) as *const (), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}

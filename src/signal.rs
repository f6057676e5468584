//! Abort signals
//!
//! A once-fireable cancellation flag shared between the component that owns a
//! lifetime (through an [`AbortController`]) and everything that reacts to
//! its end (through an [`AbortSignal`]). Listeners run synchronously inside
//! [`AbortController::abort`]; wakers of pending [`Aborted`] futures are woken
//! right after them.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Why a signal fired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// The owner ran to its natural end.
    Completed,
    /// Cancelled from the outside.
    Cancelled,
    /// Torn down so the owner can start over.
    Restarted,
    /// Torn down because something else took its place.
    Replaced,
    Custom(String),
}

/// Handle for removing a listener before the signal fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnOnce(&AbortReason)>;

struct SignalInner {
    id: u64,
    reason: Option<AbortReason>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
    wakers: Vec<Waker>,
    /// Listeners this signal holds on its sources (only for `any`).
    upstream: Vec<(Weak<RefCell<SignalInner>>, ListenerId)>,
}

impl SignalInner {
    fn take_listener(&mut self, id: ListenerId) -> Option<Listener> {
        let idx = self.listeners.iter().position(|(lid, _)| *lid == id)?;
        Some(self.listeners.remove(idx).1)
    }
}

fn detach_upstream(upstream: Vec<(Weak<RefCell<SignalInner>>, ListenerId)>) {
    for (source, id) in upstream {
        let Some(source) = source.upgrade() else {
            continue;
        };
        // Dropped outside the borrow: a listener may own the last handle to another signal.
        let removed = match source.try_borrow_mut() {
            Ok(mut inner) => inner.take_listener(id),
            Err(_) => None,
        };
        drop(removed);
    }
}

impl Drop for SignalInner {
    fn drop(&mut self) {
        detach_upstream(std::mem::take(&mut self.upstream));
    }
}

/// Read side of a cancellation flag.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Rc<RefCell<SignalInner>>,
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("AbortSignal")
            .field("id", &inner.id)
            .field("reason", &inner.reason)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl AbortSignal {
    fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SignalInner {
                id: next_signal_id(),
                reason: None,
                listeners: Vec::new(),
                next_listener: 0,
                wakers: Vec::new(),
                upstream: Vec::new(),
            })),
        }
    }

    /// A signal nobody can fire.
    pub fn never() -> Self {
        Self::new()
    }

    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// Whether both handles read the same flag.
    pub fn ptr_eq(&self, other: &AbortSignal) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the signal has fired.
    pub fn is_aborted(&self) -> bool {
        self.inner.borrow().reason.is_some()
    }

    /// The reason passed to the firing call, if fired.
    pub fn reason(&self) -> Option<AbortReason> {
        self.inner.borrow().reason.clone()
    }

    /// Register a listener invoked once when the signal fires.
    ///
    /// On an already fired signal the listener runs immediately and `None` is
    /// returned, so a cleanup registered late still runs exactly once.
    pub fn add_listener(&self, listener: impl FnOnce(&AbortReason) + 'static) -> Option<ListenerId> {
        let mut inner = self.inner.borrow_mut();
        match inner.reason.clone() {
            None => {
                let id = ListenerId(inner.next_listener);
                inner.next_listener += 1;
                inner.listeners.push((id, Box::new(listener)));
                Some(id)
            }
            Some(reason) => {
                drop(inner);
                listener(&reason);
                None
            }
        }
    }

    /// Remove a listener that has not run yet. Returns whether it was still registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.inner.borrow_mut().take_listener(id);
        removed.is_some()
    }

    /// Future resolving with the abort reason once the signal fires.
    pub fn aborted(&self) -> Aborted {
        Aborted {
            signal: self.clone(),
        }
    }

    /// Wake `waker` when the signal fires. No-op when already fired.
    pub(crate) fn register_waker(&self, waker: &Waker) {
        let mut inner = self.inner.borrow_mut();
        if inner.reason.is_some() {
            return;
        }
        if !inner.wakers.iter().any(|w| w.will_wake(waker)) {
            inner.wakers.push(waker.clone());
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// A signal that fires the instant any of `signals` fires.
    ///
    /// Fires eagerly when one of the inputs has already fired. Once fired, or
    /// once the returned signal is dropped, its listeners on the inputs are removed.
    pub fn any(signals: impl IntoIterator<Item = AbortSignal>) -> AbortSignal {
        let signals: Vec<AbortSignal> = signals.into_iter().collect();
        let output = AbortSignal::new();

        if let Some(reason) = signals.iter().find_map(AbortSignal::reason) {
            output.fire(reason);
            return output;
        }

        for source in &signals {
            let weak = Rc::downgrade(&output.inner);
            let id = source.add_listener(move |reason| {
                if let Some(inner) = weak.upgrade() {
                    AbortSignal { inner }.fire(reason.clone());
                }
            });
            if let Some(id) = id {
                output
                    .inner
                    .borrow_mut()
                    .upstream
                    .push((Rc::downgrade(&source.inner), id));
            }
        }

        output
    }

    /// Fire the signal. Returns false if it had already fired.
    fn fire(&self, reason: AbortReason) -> bool {
        let (id, listeners, wakers, upstream) = {
            let mut inner = self.inner.borrow_mut();
            if inner.reason.is_some() {
                return false;
            }
            inner.reason = Some(reason.clone());
            (
                inner.id,
                std::mem::take(&mut inner.listeners),
                std::mem::take(&mut inner.wakers),
                std::mem::take(&mut inner.upstream),
            )
        };

        detach_upstream(upstream);
        tracing::trace!(signal = id, ?reason, listeners = listeners.len(), "signal fired");

        for (_, listener) in listeners {
            listener(&reason);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// Write side of a cancellation flag.
#[derive(Clone, Debug)]
pub struct AbortController {
    signal: AbortSignal,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            signal: AbortSignal::new(),
        }
    }

    /// The signal controlled by this controller.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    /// Fire the signal. Idempotent: only the first call notifies listeners.
    pub fn abort(&self, reason: AbortReason) -> bool {
        self.signal.fire(reason)
    }
}

/// Future returned by [`AbortSignal::aborted`].
pub struct Aborted {
    signal: AbortSignal,
}

impl Future for Aborted {
    type Output = AbortReason;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(reason) = self.signal.reason() {
            return Poll::Ready(reason);
        }
        self.signal.register_waker(cx.waker());
        Poll::Pending
    }
}

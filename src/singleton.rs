//! Re-entrancy guard for combinators that keep per-run bookkeeping.

use crate::context::Cx;
use crate::error::{Result, TimelineError};
use crate::signal::AbortSignal;
use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

/// Allows at most one live `run` per instance.
///
/// Clones share the guard.
#[derive(Clone, Debug)]
pub struct Singleton {
    name: &'static str,
    running: Rc<Cell<bool>>,
}

impl Singleton {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Rc::new(Cell::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Run `body` inside a scope, failing with [`TimelineError::Reentrancy`]
    /// if a previous run of this instance is still active.
    ///
    /// The guard is released by the scope signal, so it is freed whether the
    /// body returns, fails or is cancelled.
    pub async fn run<T, R, F, Fut>(&self, cx: &Cx<T>, body: F) -> Result<R>
    where
        T: 'static,
        F: FnOnce(AbortSignal) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        cx.scope(|signal| async move {
            if self.running.replace(true) {
                tracing::warn!(name = self.name, "rejected concurrent run");
                return Err(TimelineError::Reentrancy { name: self.name });
            }
            let running = self.running.clone();
            let name = self.name;
            signal.add_listener(move |_| {
                tracing::debug!(name, "stopped running singleton");
                running.set(false);
            });
            body(signal).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BranchOutcome;
    use crate::runner::run_timeline;
    use crate::signal::{AbortController, AbortReason};
    use crate::timeline::OnceTimeline;
    use std::cell::RefCell;

    #[test]
    fn test_second_concurrent_run_fails() {
        let guard = Singleton::new("CameraRig");
        let results = Rc::new(RefCell::new(Vec::new()));
        let release = AbortController::new();

        let (g, r, release_signal) = (guard.clone(), results.clone(), release.signal());
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<()>| async move {
                let first = cx.branch(
                    OnceTimeline::new({
                        let g = g.clone();
                        let release_signal = release_signal.clone();
                        move |cx: Cx<()>| async move {
                            g.run(&cx, |_| async move {
                                release_signal.aborted().await;
                                Ok(())
                            })
                            .await
                        }
                    }),
                    AbortSignal::never(),
                );
                cx.next_frame().await;

                let second = g.run(&cx, |_| async { Ok(()) }).await;
                r.borrow_mut().push(second);

                first.join().await;
                let third = g.run(&cx, |_| async { Ok(()) }).await;
                r.borrow_mut().push(third);
                Ok(())
            }),
            None,
        );

        runner.update(&mut (), 0.1);
        assert!(guard.is_running());
        release.abort(AbortReason::Completed);
        runner.update(&mut (), 0.1);

        assert_eq!(
            *results.borrow(),
            vec![Err(TimelineError::Reentrancy { name: "CameraRig" }), Ok(())]
        );
        assert!(!guard.is_running());
        assert_eq!(runner.take_outcome(), Some(BranchOutcome::Finished(())));
    }

    #[test]
    fn test_guard_released_on_cancel() {
        let guard = Singleton::new("Queue");
        let g = guard.clone();
        let runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<()>| async move {
                g.run(&cx, |_| async {
                    cx.idle().await;
                    Ok(())
                })
                .await
            }),
            None,
        );

        assert!(guard.is_running());
        runner.abort();
        assert!(!guard.is_running());
    }
}

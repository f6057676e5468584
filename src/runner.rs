//! Runner - the per-frame driver loop
//!
//! [`TimelineRunner`] owns the executor that drives a root timeline and all
//! of its branches. The embedding application calls [`TimelineRunner::update`]
//! once per frame; nothing progresses between calls.
//! - Offline: call `update` with any delta you like (tests, tools)
//! - Realtime: [`FrameLoop`] paces `update` against the wall clock with spin_sleep

use crate::context::{BranchHandle, BranchOutcome, Clock, ContextMap, Cx, Shared, UpdateSlot};
use crate::error::{log_error_handler, ErrorHandler};
use crate::executor::Executor;
use crate::signal::{AbortController, AbortReason, AbortSignal};
use crate::timeline::Timeline;
use spin_sleep::SpinSleeper;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Configuration for launching a runner.
#[derive(Clone)]
pub struct RunnerConfig {
    /// External signal that ends the root timeline when fired.
    pub abort_signal: Option<AbortSignal>,
    /// Receives errors returned by any coroutine of this runner.
    pub on_error: ErrorHandler,
    /// Context values visible to every coroutine.
    pub contexts: ContextMap,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            abort_signal: None,
            on_error: log_error_handler(),
            contexts: ContextMap::new(),
        }
    }
}

/// Drives one root timeline.
pub struct TimelineRunner<T: 'static, R: 'static = ()> {
    executor: Rc<Executor>,
    shared: Rc<Shared>,
    root: BranchHandle<T, R>,
    controller: AbortController,
    clock: Clock,
}

impl<T: 'static, R: 'static> TimelineRunner<T, R> {
    /// Start `timeline`. Runs it up to its first step before returning.
    pub fn new(timeline: impl Into<Timeline<T, R>>, config: RunnerConfig) -> Self {
        let executor = Rc::new(Executor::new());
        let shared = Rc::new(Shared::new(executor.clone(), config.on_error));
        let controller = AbortController::new();

        let abort = match config.abort_signal {
            Some(external) => AbortSignal::any([external, controller.signal()]),
            None => controller.signal(),
        };
        let root_cx = Cx::new(shared.clone(), UpdateSlot::new(), abort, config.contexts);
        let root = root_cx.branch(timeline, AbortSignal::never());
        executor.run_until_stalled();
        tracing::debug!(done = root.is_done(), "timeline runner started");

        Self {
            executor,
            shared,
            root,
            controller,
            clock: Clock::default(),
        }
    }

    /// Advance one frame. A no-op once the root timeline has ended.
    pub fn update(&mut self, state: &mut T, delta: f64) {
        if self.root.is_done() {
            return;
        }
        // Progress made by external wakeups since the last frame.
        self.executor.run_until_stalled();

        self.clock.advance(delta);
        self.shared.frame.set(self.clock.frame);
        self.root.tick(state, &self.clock);

        // Steps that ended this frame are torn down and their successors installed.
        self.executor.run_until_stalled();
    }

    /// Whether the root timeline has returned, failed or been aborted.
    pub fn is_done(&self) -> bool {
        self.root.is_done()
    }

    /// Cancel the root timeline. Cleanups run before this returns.
    pub fn abort(&self) {
        if self.controller.abort(AbortReason::Cancelled) {
            tracing::debug!(frame = self.clock.frame, "timeline runner aborted");
        }
        self.executor.run_until_stalled();
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// How the root timeline ended, once. `None` while it is running.
    pub fn take_outcome(&self) -> Option<BranchOutcome<R>> {
        self.root.take_outcome()
    }
}

impl<T: 'static, R: 'static> Drop for TimelineRunner<T, R> {
    fn drop(&mut self) {
        self.controller.abort(AbortReason::Cancelled);
        self.executor.run_until_stalled();
        self.executor.shutdown();
    }
}

/// Start `timeline` with the default configuration and an optional external abort signal.
pub fn run_timeline<T: 'static, R: 'static>(
    timeline: impl Into<Timeline<T, R>>,
    abort_signal: Option<AbortSignal>,
) -> TimelineRunner<T, R> {
    TimelineRunner::new(
        timeline,
        RunnerConfig {
            abort_signal,
            ..Default::default()
        },
    )
}

/// Realtime pacing for a runner.
pub struct FrameLoop {
    sleeper: SpinSleeper,
    fps: f64,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new(60.0)
    }
}

impl FrameLoop {
    pub fn new(fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 60.0 };
        Self {
            sleeper: SpinSleeper::default(),
            fps,
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Call `runner.update` once per frame with the measured wall-clock delta
    /// until the runner is done or `is_done` returns true. Returns the number of frames run.
    pub fn run_until<T: 'static, R: 'static, F>(
        &self,
        runner: &mut TimelineRunner<T, R>,
        state: &mut T,
        mut is_done: F,
    ) -> u64
    where
        F: FnMut(&T) -> bool,
    {
        let frame = Duration::from_secs_f64(1.0 / self.fps);
        let mut frames = 0;
        let mut last = Instant::now();

        while !runner.is_done() && !is_done(state) {
            let target = last + frame;
            let now = Instant::now();
            if target > now {
                self.sleeper.sleep(target - now);
            }

            let now = Instant::now();
            let delta = now.duration_since(last).as_secs_f64();
            last = now;

            runner.update(state, delta);
            frames += 1;
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, StepState};
    use crate::error::TimelineError;
    use crate::timeline::{OnceTimeline, ReusableTimeline};
    use std::cell::{Cell, RefCell};

    #[test]
    fn test_update_false_terminates_on_first_frame() {
        let mut runner = run_timeline(
            ReusableTimeline::new(|cx: Cx<u32>| async move {
                cx.action(Action::new().update(|state: &mut u32, _: &Clock, _: &mut StepState| {
                    *state += 1;
                    false
                }))
                .await;
                Ok(())
            }),
            None,
        );

        let mut state = 0;
        runner.update(&mut state, 1.0 / 60.0);
        assert!(runner.is_done());
        assert_eq!(state, 1);

        runner.update(&mut state, 1.0 / 60.0);
        assert_eq!(state, 1);
        assert_eq!(runner.clock().frame, 1);
        assert_eq!(runner.take_outcome(), Some(BranchOutcome::Finished(())));
    }

    #[test]
    fn test_clock_fields() {
        let clocks = Rc::new(RefCell::new(Vec::new()));
        let c = clocks.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<()>| async move {
                cx.action(Action::new().update(move |_: &mut (), clock: &Clock, _: &mut StepState| {
                    c.borrow_mut().push(*clock);
                }))
                .await;
                Ok(())
            }),
            None,
        );

        runner.update(&mut (), 0.5);
        runner.update(&mut (), 0.25);
        let clocks = clocks.borrow();
        assert_eq!(clocks[0].previous_delta, None);
        assert_eq!(clocks[1].previous_delta, Some(0.5));
        assert_eq!(clocks[1].time, 0.75);
        assert_eq!(clocks[1].frame, 2);
    }

    #[test]
    fn test_error_goes_to_handler_not_caller() {
        let errors = Rc::new(Cell::new(0));
        let e = errors.clone();
        let mut runner: TimelineRunner<u32> = TimelineRunner::new(
            OnceTimeline::new(|cx: Cx<u32>| async move {
                cx.next_frame().await;
                Err::<(), _>(TimelineError::failed("lost track of camera target"))
            }),
            RunnerConfig {
                on_error: Rc::new(move |_: &TimelineError| e.set(e.get() + 1)),
                ..Default::default()
            },
        );

        let mut state = 0;
        runner.update(&mut state, 0.1);
        runner.update(&mut state, 0.1);
        assert!(runner.is_done());
        assert_eq!(errors.get(), 1);
        assert!(matches!(runner.take_outcome(), Some(BranchOutcome::Failed(_))));
    }

    #[test]
    fn test_external_abort_signal() {
        let external = AbortController::new();
        let reached = Rc::new(Cell::new(false));
        let r = reached.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move {
                cx.idle().await;
                r.set(true);
                Ok(())
            }),
            Some(external.signal()),
        );

        let mut state = 0;
        runner.update(&mut state, 0.1);
        external.abort(AbortReason::Cancelled);
        runner.update(&mut state, 0.1);
        assert!(runner.is_done());
        assert!(!reached.get());
        assert_eq!(
            runner.take_outcome(),
            Some(BranchOutcome::Aborted(AbortReason::Cancelled))
        );
    }

    #[test]
    fn test_contexts_from_config() {
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        let _runner: TimelineRunner<()> = TimelineRunner::new(
            OnceTimeline::new(move |cx: Cx<()>| async move {
                s.set(cx.context::<u32>().map_or(0, |v| *v));
                Ok(())
            }),
            RunnerConfig {
                contexts: ContextMap::new().with(42u32),
                ..Default::default()
            },
        );
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn test_frame_loop_runs_until_done() {
        let mut runner = run_timeline(
            OnceTimeline::new(|cx: Cx<u32>| async move {
                cx.action(Action::new().update(|state: &mut u32, _: &Clock, _: &mut StepState| {
                    *state += 1;
                    *state < 3
                }))
                .await;
                Ok(())
            }),
            None,
        );

        let mut state = 0;
        let frames = FrameLoop::new(1000.0).run_until(&mut runner, &mut state, |_| false);
        assert_eq!(frames, 3);
        assert_eq!(state, 3);
    }
}

//! Timeline Scheduler Scenario Suite
//!
//! End-to-end scenarios driven through [`TimelineRunner`] with fixed deltas.
//! The scheduler gives these guarantees, which the suite checks:
//! 1) Nothing advances between `update` calls
//!    - a step ended by `update -> false` hands over to the next step, whose
//!      first update runs on the following frame
//! 2) Every cleanup runs exactly once, whichever way its step ends
//!    - natural end, `until` resolving, cancellation from above
//! 3) Structured teardown: a finished race has torn down its losers before
//!    the awaiting coroutine resumes
//! 4) Guarded combinators refuse a second concurrent `run`
//!
//! Events are logged as strings and compared strictly in order.

#[cfg(test)]
mod tests {
    use crate::action::{Action, StepState};
    use crate::context::{BranchOutcome, Clock, Cx};
    use crate::error::TimelineError;
    use crate::graph::{GraphState, TimelineGraph, Transition};
    use crate::misc::time_passed;
    use crate::parallel::{all, race};
    use crate::queue::QueueTimeline;
    use crate::replaceable::ReplaceableTimeline;
    use crate::runner::{run_timeline, RunnerConfig, TimelineRunner};
    use crate::signal::AbortReason;
    use crate::timeline::{Branch, OnceTimeline, ReusableTimeline, Timeline};
    use futures::channel::oneshot;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn push(log: &Log, event: impl Into<String>) {
        log.borrow_mut().push(event.into());
    }

    /// An action that logs its start and its cleanup.
    fn logged(log: &Log, name: &'static str) -> Action<u32> {
        let (start, end) = (log.clone(), log.clone());
        Action::new().init(move || {
            push(&start, format!("start {name}"));
            move || push(&end, format!("end {name}"))
        })
    }

    fn step_frames(runner: &mut TimelineRunner<u32>, state: &mut u32, frames: u32) {
        for _ in 0..frames {
            *state += 1;
            runner.update(state, 1.0);
        }
    }

    #[test]
    fn test_cleanup_runs_once_on_every_exit_path() {
        let log: Log = Rc::default();
        let (tx, rx) = oneshot::channel::<()>();
        let l = log.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move {
                cx.action(
                    logged(&l, "natural")
                        .update(|_: &mut u32, _: &Clock, step: &mut StepState| step.time() < 2.0),
                )
                .await;
                cx.action(logged(&l, "until").until(rx)).await;
                cx.action(logged(&l, "cancelled")).await;
                push(&l, "unreachable");
                Ok(())
            }),
            None,
        );

        let mut state = 0;
        step_frames(&mut runner, &mut state, 2);
        tx.send(()).unwrap();
        step_frames(&mut runner, &mut state, 1);
        runner.abort();
        assert!(runner.is_done());
        assert_eq!(
            runner.take_outcome(),
            Some(BranchOutcome::Aborted(AbortReason::Cancelled))
        );
        drop(runner);

        assert_eq!(
            *log.borrow(),
            vec![
                "start natural",
                "end natural",
                "start until",
                "end until",
                "start cancelled",
                "end cancelled",
            ]
        );
    }

    #[test]
    fn test_update_false_hands_over_on_next_frame() {
        let log: Log = Rc::default();
        let (a, b) = (log.clone(), log.clone());
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move {
                cx.action(Action::new().update(move |_: &mut u32, clock: &Clock, _: &mut StepState| {
                    push(&a, format!("a {}", clock.frame));
                    false
                }))
                .await;
                cx.action(Action::new().update(move |_: &mut u32, clock: &Clock, _: &mut StepState| {
                    push(&b, format!("b {}", clock.frame));
                    false
                }))
                .await;
                Ok(())
            }),
            None,
        );

        let mut state = 0;
        step_frames(&mut runner, &mut state, 1);
        assert!(!runner.is_done());
        step_frames(&mut runner, &mut state, 2);
        assert!(runner.is_done());
        assert_eq!(*log.borrow(), vec!["a 1", "b 2"]);
    }

    #[test]
    fn test_race_tears_down_loser_before_resuming() {
        let log: Log = Rc::default();
        let l = log.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move {
                let (fast, slow) = (l.clone(), l.clone());
                race(
                    &cx,
                    [
                        Branch::Run(Timeline::once(move |cx: Cx<u32>| async move {
                            cx.action(
                                logged(&fast, "fast")
                                    .update(|_: &mut u32, _: &Clock, step: &mut StepState| step.time() < 2.0),
                            )
                            .await;
                            Ok(())
                        })),
                        Branch::Run(Timeline::once(move |cx: Cx<u32>| async move {
                            cx.action(logged(&slow, "slow")).await;
                            Ok(())
                        })),
                    ],
                )
                .await?;
                push(&l, "race done");
                Ok(())
            }),
            None,
        );

        let mut state = 0;
        step_frames(&mut runner, &mut state, 2);
        assert!(runner.is_done());
        assert_eq!(
            *log.borrow(),
            vec!["start fast", "start slow", "end fast", "end slow", "race done"]
        );
    }

    #[test]
    fn test_all_waits_for_every_branch() {
        let log: Log = Rc::default();
        let l = log.clone();
        let branch = |log: &Log, name: &'static str, seconds: f64| {
            let log = log.clone();
            Branch::Run(Timeline::once(move |cx: Cx<u32>| async move {
                time_passed(&cx, seconds).await;
                push(&log, name);
                Ok(())
            }))
        };
        let (short, long) = (branch(&log, "short", 1.0), branch(&log, "long", 3.0));
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move {
                all(&cx, [long, short]).await?;
                push(&l, "all done");
                Ok(())
            }),
            None,
        );

        let mut state = 0;
        step_frames(&mut runner, &mut state, 2);
        assert_eq!(*log.borrow(), vec!["short"]);
        step_frames(&mut runner, &mut state, 1);
        assert!(runner.is_done());
        assert_eq!(*log.borrow(), vec!["short", "long", "all done"]);
    }

    #[test]
    fn test_concurrent_graph_run_is_rejected() {
        let graph: TimelineGraph<u32> = TimelineGraph::new(
            "a",
            [("a".to_string(), GraphState::from_timeline(ReusableTimeline::idle()))],
        )
        .unwrap();

        let errors = Rc::new(RefCell::new(Vec::new()));
        let e = errors.clone();
        let config = RunnerConfig {
            on_error: Rc::new(move |err: &TimelineError| e.borrow_mut().push(err.clone())),
            ..Default::default()
        };

        let (first, second) = (graph.clone(), graph.clone());
        let mut runner = TimelineRunner::new(
            OnceTimeline::new(move |cx: Cx<u32>| async move {
                all(
                    &cx,
                    [
                        Branch::Run(Timeline::once(move |cx: Cx<u32>| async move { first.run(&cx).await })),
                        Branch::Run(Timeline::once(move |cx: Cx<u32>| async move { second.run(&cx).await })),
                    ],
                )
                .await
            }),
            config,
        );

        let mut state = 0;
        step_frames(&mut runner, &mut state, 2);
        assert_eq!(
            *errors.borrow(),
            vec![TimelineError::Reentrancy { name: "TimelineGraph" }]
        );
        // The first run is unaffected.
        assert!(!runner.is_done());
        assert_eq!(graph.current_state(), "a");
    }

    #[test]
    fn test_graph_update_transition_beats_slow_body() {
        let log: Log = Rc::default();
        let state_body = |log: &Log, name: &'static str, seconds: f64, next: Option<&'static str>| {
            let log = log.clone();
            ReusableTimeline::new(move |cx: Cx<u32>| {
                let log = log.clone();
                async move {
                    push(&log, format!("enter {name}"));
                    time_passed(&cx, seconds).await;
                    Ok(next.map(String::from))
                }
            })
        };

        let graph = TimelineGraph::new(
            "idle",
            [
                (
                    "idle".to_string(),
                    GraphState::new(state_body(&log, "idle", 5.0, None))
                        .transition("active", Transition::when_update(|state: &u32, _: &Clock| *state >= 2))
                        .finally("late"),
                ),
                ("active".to_string(), GraphState::new(state_body(&log, "active", 1.0, Some("exit")))),
                ("late".to_string(), GraphState::new(state_body(&log, "late", 1.0, Some("exit")))),
            ],
        )
        .unwrap()
        .with_exit_state("exit");

        let g = graph.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move { g.run(&cx).await }),
            None,
        );

        let mut state = 0;
        step_frames(&mut runner, &mut state, 2);
        assert_eq!(graph.current_state(), "active");
        step_frames(&mut runner, &mut state, 1);
        assert!(runner.is_done());
        assert_eq!(graph.current_state(), "exit");
        assert_eq!(*log.borrow(), vec!["enter idle", "enter active"]);
    }

    #[test]
    fn test_graph_finally_when_body_ends_first() {
        let graph = TimelineGraph::new(
            "a",
            [
                (
                    "a".to_string(),
                    GraphState::from_timeline(ReusableTimeline::new(|cx: Cx<u32>| async move {
                        time_passed(&cx, 1.0).await;
                        Ok(())
                    }))
                    .transition("never", Transition::when_update(|state: &u32, _: &Clock| *state > 100))
                    .finally("done"),
                ),
            ],
        )
        .unwrap()
        .with_exit_state("done");

        let g = graph.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move { g.run(&cx).await }),
            None,
        );

        let mut state = 0;
        step_frames(&mut runner, &mut state, 1);
        assert!(runner.is_done());
        assert_eq!(graph.current_state(), "done");
    }

    #[test]
    fn test_replaceable_hot_swap_inside_race() {
        let log: Log = Rc::default();
        let looping = |log: &Log, name: &'static str| {
            let log = log.clone();
            ReusableTimeline::new(move |cx: Cx<u32>| {
                let log = log.clone();
                async move {
                    cx.action(logged(&log, name)).await;
                    Ok(())
                }
            })
        };

        let replaceable = ReplaceableTimeline::with_timeline(looping(&log, "a"));
        let r = replaceable.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move {
                let timer = Timeline::once(|cx: Cx<u32>| async move {
                    time_passed(&cx, 3.0).await;
                    Ok(())
                });
                let swapped = Timeline::once(move |cx: Cx<u32>| async move { r.run(&cx).await });
                race(&cx, [Branch::Run(timer), Branch::Run(swapped)]).await
            }),
            None,
        );

        let mut state = 0;
        step_frames(&mut runner, &mut state, 1);
        replaceable.attach(looping(&log, "b"));
        assert_eq!(*log.borrow(), vec!["start a", "end a"]);

        step_frames(&mut runner, &mut state, 2);
        assert!(runner.is_done());
        assert_eq!(*log.borrow(), vec!["start a", "end a", "start b", "end b"]);
    }

    #[test]
    fn test_empty_queue_takes_one_frame() {
        let queue: QueueTimeline<u32> = QueueTimeline::new();
        let q = queue.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move { q.run(&cx).await }),
            None,
        );

        assert!(!runner.is_done());
        let mut state = 0;
        step_frames(&mut runner, &mut state, 1);
        assert!(runner.is_done());
        assert_eq!(runner.take_outcome(), Some(BranchOutcome::Finished(())));
    }

    #[test]
    fn test_skip_placeholder_is_not_waited_for() {
        let mut runner = run_timeline(
            OnceTimeline::new(|cx: Cx<u32>| async move {
                let branches: Vec<Branch<u32>> = vec![
                    false.into(),
                    Branch::Run(Timeline::once(|cx: Cx<u32>| async move {
                        cx.next_frame().await;
                        Ok(())
                    })),
                    None::<ReusableTimeline<u32>>.into(),
                ];
                all(&cx, branches).await
            }),
            None,
        );

        let mut state = 0;
        step_frames(&mut runner, &mut state, 1);
        assert!(runner.is_done());
    }
}

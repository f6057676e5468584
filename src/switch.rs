//! Switch - one active case, picked every frame
//!
//! A selector and the active case run side by side. The selector checks the
//! conditions at the start of every frame; when the winning case changes it
//! tears the active case down and the new one starts from the beginning.

use crate::action::{Action, StepState};
use crate::context::{Clock, Cx};
use crate::error::{Result, TimelineError};
use crate::parallel::race;
use crate::signal::{AbortController, AbortReason};
use crate::timeline::{Branch, Condition, ReusableTimeline, Timeline};
use std::cell::RefCell;
use std::rc::Rc;

/// A case: runs while its condition is the first to hold. A case without a
/// condition is the default.
pub struct SwitchCase<T: 'static> {
    condition: Option<Condition<T>>,
    timeline: ReusableTimeline<T>,
}

impl<T: 'static> Clone for SwitchCase<T> {
    fn clone(&self) -> Self {
        Self {
            condition: self.condition.clone(),
            timeline: self.timeline.clone(),
        }
    }
}

impl<T: 'static> SwitchCase<T> {
    pub fn when(condition: impl Fn(&T, &Clock) -> bool + 'static, timeline: ReusableTimeline<T>) -> Self {
        Self {
            condition: Some(Rc::new(condition)),
            timeline,
        }
    }

    pub fn otherwise(timeline: ReusableTimeline<T>) -> Self {
        Self {
            condition: None,
            timeline,
        }
    }

    fn matches(&self, state: &T, clock: &Clock) -> bool {
        self.condition.as_ref().map_or(true, |condition| condition(state, clock))
    }
}

struct Selection {
    index: Option<usize>,
    restart: AbortController,
}

/// Ordered cases, any of which may be empty.
pub struct SwitchTimeline<T: 'static> {
    cases: Rc<RefCell<Vec<Option<SwitchCase<T>>>>>,
}

impl<T: 'static> Clone for SwitchTimeline<T> {
    fn clone(&self) -> Self {
        Self {
            cases: self.cases.clone(),
        }
    }
}

impl<T: 'static> Default for SwitchTimeline<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: 'static> SwitchTimeline<T> {
    pub fn new(cases: Vec<SwitchCase<T>>) -> Self {
        Self {
            cases: Rc::new(RefCell::new(cases.into_iter().map(Some).collect())),
        }
    }

    /// Put `case` at `index`, growing the case list as needed.
    pub fn attach(&self, index: usize, case: SwitchCase<T>) -> Result<()> {
        let mut cases = self.cases.borrow_mut();
        if cases.len() <= index {
            cases.resize_with(index + 1, || None);
        }
        if cases[index].is_some() {
            return Err(TimelineError::SlotOccupied { index });
        }
        cases[index] = Some(case);
        Ok(())
    }

    /// Empty slot `index`. A running switch moves away from it on its next frame.
    pub fn unattach(&self, index: usize) -> bool {
        let removed = self.cases.borrow_mut().get_mut(index).and_then(Option::take);
        removed.is_some()
    }

    fn select(&self, state: &T, clock: &Clock) -> Option<usize> {
        self.cases
            .borrow()
            .iter()
            .position(|case| case.as_ref().is_some_and(|case| case.matches(state, clock)))
    }

    fn timeline_at(&self, index: Option<usize>) -> ReusableTimeline<T> {
        index
            .and_then(|index| self.cases.borrow().get(index).cloned().flatten())
            .map_or_else(ReusableTimeline::idle, |case| case.timeline)
    }

    /// Run until cancelled. Nothing is selected before the first frame.
    pub async fn run(&self, cx: &Cx<T>) -> Result<()> {
        let selection = Rc::new(RefCell::new(Selection {
            index: None,
            restart: AbortController::new(),
        }));

        let selector = {
            let switch = self.clone();
            let selection = selection.clone();
            Timeline::once(move |cx: Cx<T>| async move {
                cx.action(Action::new().update(move |state: &mut T, clock: &Clock, _: &mut StepState| {
                    let index = switch.select(state, clock);
                    let restart = {
                        let mut selection = selection.borrow_mut();
                        if selection.index == index {
                            return;
                        }
                        tracing::debug!(from = ?selection.index, to = ?index, "switch case changed");
                        selection.index = index;
                        selection.restart.clone()
                    };
                    restart.abort(AbortReason::Restarted);
                }))
                .await;
                Ok(())
            })
        };

        let active = {
            let switch = self.clone();
            Timeline::once(move |cx: Cx<T>| async move {
                while !cx.is_aborted() {
                    let restart = AbortController::new();
                    let index = {
                        let mut selection = selection.borrow_mut();
                        selection.restart = restart.clone();
                        selection.index
                    };
                    let started = cx.frame();
                    cx.abortable(switch.timeline_at(index), restart.signal()).await;

                    if restart.is_aborted() || cx.is_aborted() {
                        continue;
                    }
                    // Finished on its own while still selected: run it again, at most once per frame.
                    if cx.frame() == started {
                        cx.next_frame().await;
                    }
                }
                Ok(())
            })
        };

        race(cx, [Branch::Run(selector), Branch::Run(active)]).await
    }
}

/// Run a switch over `cases` until cancelled.
pub async fn switch<T: 'static>(cx: &Cx<T>, cases: Vec<SwitchCase<T>>) -> Result<()> {
    SwitchTimeline::new(cases).run(cx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::run_timeline;
    use crate::timeline::OnceTimeline;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Logs every frame it is ticked plus its cleanup.
    fn logging(log: &Log, name: &'static str) -> ReusableTimeline<u32> {
        let log = log.clone();
        ReusableTimeline::new(move |cx: Cx<u32>| {
            let (tick_log, end_log) = (log.clone(), log.clone());
            async move {
                cx.action(
                    Action::new()
                        .init(move || move || end_log.borrow_mut().push(format!("end {name}")))
                        .update(move |_: &mut u32, _: &Clock, _: &mut StepState| {
                            tick_log.borrow_mut().push(name.to_string())
                        }),
                )
                .await;
                Ok(())
            }
        })
    }

    #[test]
    fn test_switches_when_selection_changes() {
        let log: Log = Rc::default();
        let switch_timeline = SwitchTimeline::new(vec![
            SwitchCase::when(|state: &u32, _: &Clock| *state > 10, logging(&log, "high")),
            SwitchCase::otherwise(logging(&log, "low")),
        ]);
        let s = switch_timeline.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move { s.run(&cx).await }),
            None,
        );

        let mut state = 0;
        runner.update(&mut state, 0.1);
        runner.update(&mut state, 0.1);
        state = 20;
        runner.update(&mut state, 0.1);
        runner.update(&mut state, 0.1);
        state = 5;
        runner.update(&mut state, 0.1);

        assert_eq!(*log.borrow(), vec!["low", "end low", "high", "end high"]);
        assert!(!runner.is_done());
    }

    #[test]
    fn test_finished_case_restarts_while_selected() {
        let runs = Rc::new(RefCell::new(0));
        let r = runs.clone();
        let once = ReusableTimeline::new(move |cx: Cx<u32>| {
            let r = r.clone();
            async move {
                *r.borrow_mut() += 1;
                cx.next_frame().await;
                Ok(())
            }
        });
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move {
                switch(&cx, vec![SwitchCase::otherwise(once)]).await
            }),
            None,
        );

        let mut state = 0;
        for _ in 0..5 {
            runner.update(&mut state, 0.1);
        }
        assert_eq!(*runs.borrow(), 5);
    }

    #[test]
    fn test_attach_rejects_occupied_case() {
        let log: Log = Rc::default();
        let switch_timeline = SwitchTimeline::default();
        switch_timeline.attach(2, SwitchCase::otherwise(logging(&log, "a"))).unwrap();
        assert_eq!(
            switch_timeline.attach(2, SwitchCase::otherwise(logging(&log, "b"))),
            Err(TimelineError::SlotOccupied { index: 2 })
        );
        assert!(switch_timeline.unattach(2));
        assert!(!switch_timeline.unattach(2));
    }

    #[test]
    fn test_unattached_case_is_left_on_next_frame() {
        let log: Log = Rc::default();
        let switch_timeline = SwitchTimeline::new(vec![SwitchCase::otherwise(logging(&log, "only"))]);
        let s = switch_timeline.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<u32>| async move { s.run(&cx).await }),
            None,
        );

        let mut state = 0;
        runner.update(&mut state, 0.1);
        runner.update(&mut state, 0.1);
        switch_timeline.unattach(0);
        runner.update(&mut state, 0.1);
        assert_eq!(*log.borrow(), vec!["only", "end only"]);
    }
}

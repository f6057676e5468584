//! Fixed slots run one after another.

use crate::context::Cx;
use crate::error::{Result, TimelineError};
use crate::singleton::Singleton;
use crate::timeline::ReusableTimeline;
use std::cell::RefCell;
use std::rc::Rc;

/// Ordered slots, any of which may be empty.
///
/// A run executes the populated slots in index order. Slots are read as the
/// run reaches them, so attaching to a later slot mid-run is picked up.
pub struct SequentialTimeline<T: 'static> {
    slots: Rc<RefCell<Vec<Option<ReusableTimeline<T>>>>>,
    guard: Singleton,
}

impl<T: 'static> Clone for SequentialTimeline<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T: 'static> Default for SequentialTimeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> SequentialTimeline<T> {
    pub fn new() -> Self {
        Self::with_slots(Vec::new())
    }

    pub fn with_slots(slots: Vec<Option<ReusableTimeline<T>>>) -> Self {
        Self {
            slots: Rc::new(RefCell::new(slots)),
            guard: Singleton::new("SequentialTimeline"),
        }
    }

    /// Put `timeline` into slot `index`, growing the slot list as needed.
    pub fn attach(&self, index: usize, timeline: ReusableTimeline<T>) -> Result<()> {
        let mut slots = self.slots.borrow_mut();
        if slots.len() <= index {
            slots.resize_with(index + 1, || None);
        }
        if slots[index].is_some() {
            return Err(TimelineError::SlotOccupied { index });
        }
        slots[index] = Some(timeline);
        Ok(())
    }

    /// Empty slot `index`, returning what it held.
    pub fn unattach(&self, index: usize) -> Option<ReusableTimeline<T>> {
        self.slots.borrow_mut().get_mut(index).and_then(Option::take)
    }

    /// Number of slots, populated or not.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().iter().all(Option::is_none)
    }

    pub async fn run(&self, cx: &Cx<T>) -> Result<()> {
        self.guard
            .run(cx, |_| async move {
                let mut ran_any = false;
                let mut index = 0;
                loop {
                    let slot = {
                        let slots = self.slots.borrow();
                        if index >= slots.len() {
                            break;
                        }
                        slots[index].clone()
                    };
                    index += 1;
                    let Some(timeline) = slot else {
                        continue;
                    };
                    ran_any = true;
                    tracing::debug!(slot = index - 1, "sequential slot started");
                    timeline.start(cx.clone()).await?;
                }
                if !ran_any {
                    // Never complete instantly, so racing against an empty sequence still yields.
                    cx.next_frame().await;
                }
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, StepState};
    use crate::context::Clock;
    use crate::runner::run_timeline;
    use crate::timeline::OnceTimeline;

    fn push(log: &Rc<RefCell<Vec<usize>>>, value: usize) -> ReusableTimeline<()> {
        let log = log.clone();
        ReusableTimeline::new(move |cx: Cx<()>| {
            let log = log.clone();
            async move {
                cx.next_frame().await;
                log.borrow_mut().push(value);
                Ok(())
            }
        })
    }

    #[test]
    fn test_runs_populated_slots_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sequence = SequentialTimeline::with_slots(vec![Some(push(&log, 0)), None, Some(push(&log, 2))]);
        sequence.attach(4, push(&log, 4)).unwrap();
        assert_eq!(sequence.len(), 5);

        let s = sequence.clone();
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<()>| async move { s.run(&cx).await }),
            None,
        );
        for _ in 0..3 {
            runner.update(&mut (), 0.1);
        }
        assert_eq!(*log.borrow(), vec![0, 2, 4]);
        assert!(runner.is_done());
    }

    #[test]
    fn test_attach_to_occupied_slot_fails() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sequence = SequentialTimeline::new();
        sequence.attach(1, push(&log, 1)).unwrap();
        assert_eq!(
            sequence.attach(1, push(&log, 1)),
            Err(TimelineError::SlotOccupied { index: 1 })
        );
        assert!(sequence.unattach(1).is_some());
        assert!(sequence.is_empty());
        assert!(sequence.attach(1, push(&log, 1)).is_ok());
    }

    #[test]
    fn test_empty_run_yields_one_tick() {
        let sequence: SequentialTimeline<()> = SequentialTimeline::with_slots(vec![None, None]);
        let frames = Rc::new(RefCell::new(Vec::new()));
        let (s, f) = (sequence.clone(), frames.clone());
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<()>| async move {
                s.run(&cx).await?;
                f.borrow_mut().push(cx.frame());
                cx.action(Action::new().update(|_: &mut (), _: &Clock, _: &mut StepState| false))
                    .await;
                Ok(())
            }),
            None,
        );

        assert!(!runner.is_done());
        runner.update(&mut (), 0.1);
        assert_eq!(*frames.borrow(), vec![1]);
        runner.update(&mut (), 0.1);
        assert!(runner.is_done());
    }
}

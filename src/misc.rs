//! Small timeline helpers built from actions and races.

use crate::action::{Action, StepState};
use crate::context::{Clock, Cx};
use crate::error::Result;
use crate::parallel::race;
use crate::timeline::{Branch, ReusableTimeline, Timeline};
use std::future::Future;

/// Wait until cancelled.
pub async fn idle<T: 'static>(cx: &Cx<T>) {
    cx.idle().await
}

/// Wait exactly one tick.
pub async fn next_frame<T: 'static>(cx: &Cx<T>) {
    cx.next_frame().await
}

/// Wait until `seconds` of frame time have passed, counting from the first tick.
pub async fn time_passed<T: 'static>(cx: &Cx<T>, seconds: f64) {
    cx.action(Action::new().update(move |_: &mut T, _: &Clock, step: &mut StepState| step.time() < seconds))
        .await
}

/// Resolves once every future has resolved, awaiting them one after another.
pub fn until_all<F: Future>(futures: impl IntoIterator<Item = F>) -> impl Future<Output = ()> {
    let futures: Vec<F> = futures.into_iter().collect();
    async move {
        for future in futures {
            future.await;
        }
    }
}

/// Repeat `timeline` until `until` resolves, cancelling the iteration in flight.
pub async fn do_until<T: 'static>(
    cx: &Cx<T>,
    until: impl Future + 'static,
    timeline: ReusableTimeline<T>,
) -> Result<()> {
    let stop = Timeline::once(move |cx: Cx<T>| async move {
        cx.action(Action::new().until(until)).await;
        Ok(())
    });
    race(cx, [Branch::Run(stop), Branch::Run(repeat(timeline))]).await
}

/// Repeat `timeline` while `predicate` holds, checked at the start of every frame.
pub async fn do_while<T: 'static>(
    cx: &Cx<T>,
    predicate: impl Fn(&T, &Clock) -> bool + 'static,
    timeline: ReusableTimeline<T>,
) -> Result<()> {
    let stop = Timeline::once(move |cx: Cx<T>| async move {
        cx.action(Action::new().update(move |state: &mut T, clock: &Clock, _: &mut StepState| predicate(state, clock)))
            .await;
        Ok(())
    });
    race(cx, [Branch::Run(stop), Branch::Run(repeat(timeline))]).await
}

/// Run `timeline` back to back forever, never more than once per frame.
fn repeat<T: 'static>(timeline: ReusableTimeline<T>) -> Timeline<T> {
    Timeline::once(move |cx: Cx<T>| async move {
        while !cx.is_aborted() {
            let started = cx.frame();
            timeline.start(cx.clone()).await?;
            if cx.frame() == started {
                cx.next_frame().await;
            }
        }
        Ok(())
    })
}

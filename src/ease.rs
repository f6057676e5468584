//! Easing strategies
//!
//! An [`EaseFn`] moves a value toward a goal one frame at a time. The
//! scheduler does not interpret the numbers; it only calls the strategy once
//! per tick while the owning step is active, handing it that step's private
//! [`Memo`]. Values are flat component vectors (a position is three `f64`s, a
//! quaternion four).

use crate::action::{Memo, StepState};
use crate::context::Clock;
use std::rc::Rc;

/// `(state, clock, previous, current, goal, out, memo) -> continue`.
///
/// `previous` is the value before the last frame's write, `None` on the first
/// frame. The strategy writes the next value into `out`.
pub type EaseFn<T> = Rc<dyn Fn(&T, &Clock, Option<&[f64]>, &[f64], &[f64], &mut [f64], &mut Memo) -> bool>;

/// Closer than this to the goal counts as arrived.
const REST_DISTANCE: f64 = 1e-4;

/// Wrap a closure as an [`EaseFn`].
pub fn ease_fn<T, F>(f: F) -> EaseFn<T>
where
    F: Fn(&T, &Clock, Option<&[f64]>, &[f64], &[f64], &mut [f64], &mut Memo) -> bool + 'static,
{
    Rc::new(f)
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| (b - a) * (b - a)).sum::<f64>().sqrt()
}

/// Move straight toward the goal at no more than `max_speed` units per second.
pub fn velocity<T: 'static>(max_speed: f64) -> EaseFn<T> {
    ease_fn(move |_: &T, clock: &Clock, _, current: &[f64], goal: &[f64], out: &mut [f64], _: &mut Memo| {
        let remaining = distance(current, goal);
        let step = max_speed * clock.delta;
        if remaining - step <= REST_DISTANCE {
            write(out, goal);
            return false;
        }
        let t = step / remaining;
        for ((o, c), g) in out.iter_mut().zip(current).zip(goal) {
            *o = c + (g - c) * t;
        }
        true
    })
}

/// Reach the goal linearly in `seconds`, measured from the first frame.
pub fn duration<T: 'static>(seconds: f64) -> EaseFn<T> {
    ease_fn(move |_: &T, clock: &Clock, _, current: &[f64], goal: &[f64], out: &mut [f64], memo: &mut Memo| {
        let from = memo.get_or_insert_with("ease.from", || current.to_vec()).clone();
        let elapsed = memo.get_or_insert_with("ease.elapsed", || 0.0f64);
        *elapsed += clock.delta;

        let t = if seconds > 0.0 { (*elapsed / seconds).min(1.0) } else { 1.0 };
        for ((o, f), g) in out.iter_mut().zip(&from).zip(goal) {
            *o = f + (g - f) * t;
        }
        t < 1.0
    })
}

/// Damped spring toward the goal (explicit Euler). Velocity lives in the step's memo.
pub fn spring<T: 'static>(stiffness: f64, damping: f64) -> EaseFn<T> {
    ease_fn(move |_: &T, clock: &Clock, _, current: &[f64], goal: &[f64], out: &mut [f64], memo: &mut Memo| {
        let velocity = memo.get_or_insert_with("ease.velocity", || vec![0.0f64; current.len()]);
        let dt = clock.delta;
        for i in 0..out.len().min(goal.len()) {
            let force = stiffness * (goal[i] - current[i]) - damping * velocity[i];
            velocity[i] += force * dt;
            out[i] = current[i] + velocity[i] * dt;
        }

        let speed = velocity.iter().map(|v| v * v).sum::<f64>().sqrt();
        if distance(out, goal) < REST_DISTANCE && speed < REST_DISTANCE {
            write(out, goal);
            return false;
        }
        true
    })
}

/// Default spring: stiff and lightly damped.
pub fn default_spring<T: 'static>() -> EaseFn<T> {
    spring(1000.0, 10.0)
}

/// Update function moving the components returned by `access` toward `goal`.
///
/// Without an ease the goal is written on the first frame and the step ends.
/// Otherwise the step ends once the ease reports it has arrived.
pub fn transition<T, A, G>(
    access: A,
    goal: G,
    ease: Option<EaseFn<T>>,
) -> impl FnMut(&mut T, &Clock, &mut StepState) -> bool + 'static
where
    T: 'static,
    A: Fn(&mut T) -> &mut [f64] + 'static,
    G: Fn(&T) -> Vec<f64> + 'static,
{
    let mut previous: Option<Vec<f64>> = None;
    move |state: &mut T, clock: &Clock, step: &mut StepState| {
        let goal = goal(state);
        let current = access(state).to_vec();
        let Some(ease) = ease.as_ref() else {
            write(access(state), &goal);
            return false;
        };

        let mut out = current.clone();
        let keep_going = ease(state, clock, previous.as_deref(), &current, &goal, &mut out, step.memo());
        previous = Some(current);
        write(access(state), &out);
        keep_going
    }
}

/// [`transition`] toward a fixed goal.
pub fn transition_to<T, A>(
    access: A,
    goal: Vec<f64>,
    ease: Option<EaseFn<T>>,
) -> impl FnMut(&mut T, &Clock, &mut StepState) -> bool + 'static
where
    T: 'static,
    A: Fn(&mut T) -> &mut [f64] + 'static,
{
    transition(access, move |_: &T| goal.clone(), ease)
}

fn write(into: &mut [f64], value: &[f64]) {
    for (i, v) in into.iter_mut().zip(value) {
        *i = *v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::context::Cx;
    use crate::runner::run_timeline;
    use crate::timeline::OnceTimeline;

    #[derive(Default)]
    struct Camera {
        position: [f64; 3],
    }

    fn frames_to_arrive(ease: Option<EaseFn<Camera>>, goal: [f64; 3], delta: f64) -> (u32, Camera) {
        let mut runner = run_timeline(
            OnceTimeline::new(move |cx: Cx<Camera>| async move {
                cx.action(Action::new().update(transition_to(
                    |camera: &mut Camera| &mut camera.position[..],
                    goal.to_vec(),
                    ease,
                )))
                .await;
                Ok(())
            }),
            None,
        );

        let mut camera = Camera::default();
        let mut frames = 0;
        while !runner.is_done() && frames < 10_000 {
            runner.update(&mut camera, delta);
            frames += 1;
        }
        (frames, camera)
    }

    #[test]
    fn test_no_ease_jumps_in_one_frame() {
        let (frames, camera) = frames_to_arrive(None, [1.0, 2.0, 3.0], 0.1);
        assert_eq!(frames, 1);
        assert_eq!(camera.position, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_velocity_is_speed_limited() {
        let (frames, camera) = frames_to_arrive(Some(velocity(1.0)), [0.0, 0.0, 1.0], 0.25);
        assert_eq!(frames, 4);
        assert_eq!(camera.position, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_duration_arrives_on_time() {
        let (frames, camera) = frames_to_arrive(Some(duration(0.5)), [2.0, 0.0, 0.0], 0.125);
        assert_eq!(frames, 4);
        assert_eq!(camera.position, [2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_spring_settles_on_goal() {
        let (frames, camera) = frames_to_arrive(Some(spring(100.0, 20.0)), [1.0, 1.0, 0.0], 1.0 / 120.0);
        assert!(frames > 10 && frames < 10_000);
        assert_eq!(camera.position, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_previous_value_is_last_frames_current() {
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let s = seen.clone();
        let recording: EaseFn<Camera> = ease_fn(move |_: &Camera, _: &Clock, previous: Option<&[f64]>, current: &[f64], goal: &[f64], out: &mut [f64], _: &mut Memo| {
            s.borrow_mut().push(previous.map(|p| p[0]));
            out[0] = current[0] + 1.0;
            out[0] < goal[0]
        });
        let (frames, _) = frames_to_arrive(Some(recording), [3.0, 0.0, 0.0], 0.1);
        assert_eq!(frames, 3);
        assert_eq!(*seen.borrow(), vec![None, Some(0.0), Some(1.0)]);
    }
}

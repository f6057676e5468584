//! Camera choreography demo for the Rust Timeline Library
//!
//! Moves a virtual camera through a scripted shot list in real time:
//! eased moves, a hold, a race between a slow pan and a timeout, and a
//! replaceable "look-at" track that is hot-swapped halfway through.
//!
//! Usage:
//!   cargo run --bin camera_demo                         # 60 fps
//!   cargo run --bin camera_demo -- --fps 30             # custom frame rate
//!   RUST_LOG=rust_timeline_lib=debug cargo run --bin camera_demo

use rust_timeline_lib::ease::{default_spring, duration, transition_to, velocity, EaseFn};
use rust_timeline_lib::{
    all, race, time_passed, Action, Branch, Cx, FrameLoop, OnceTimeline, ReplaceableTimeline,
    ReusableTimeline, RunnerConfig, SequentialTimeline, Timeline, TimelineRunner,
};
use std::env;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Camera {
    position: [f64; 3],
    target: [f64; 3],
}

fn move_to(goal: [f64; 3], ease: Option<EaseFn<Camera>>) -> ReusableTimeline<Camera> {
    ReusableTimeline::new(move |cx: Cx<Camera>| {
        let ease = ease.clone();
        async move {
            cx.action(Action::new().update(transition_to(
                |camera: &mut Camera| &mut camera.position[..],
                goal.to_vec(),
                ease,
            )))
            .await;
            tracing::info!(?goal, "camera arrived");
            Ok(())
        }
    })
}

fn look_at(goal: [f64; 3]) -> ReusableTimeline<Camera> {
    ReusableTimeline::new(move |cx: Cx<Camera>| async move {
        cx.action(Action::new().update(transition_to(
            |camera: &mut Camera| &mut camera.target[..],
            goal.to_vec(),
            Some(default_spring()),
        )))
        .await;
        // Keep holding the target until swapped out.
        cx.idle().await;
        Ok(())
    })
}

fn hold(seconds: f64) -> ReusableTimeline<Camera> {
    ReusableTimeline::new(move |cx: Cx<Camera>| async move {
        time_passed(&cx, seconds).await;
        Ok(())
    })
}

fn parse_fps() -> f64 {
    let args: Vec<String> = env::args().collect();
    args.iter()
        .position(|a| a == "--fps")
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(60.0)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let shots = SequentialTimeline::with_slots(vec![
        Some(move_to([0.0, 2.0, 10.0], Some(duration(1.5)))),
        Some(hold(0.5)),
        Some(move_to([5.0, 2.0, 5.0], Some(velocity(4.0)))),
        Some(move_to([0.0, 8.0, 0.0], Some(default_spring()))),
    ]);

    let tracking = ReplaceableTimeline::with_timeline(look_at([0.0, 0.0, 0.0]));

    let root = OnceTimeline::new(move |cx: Cx<Camera>| async move {
        let swap = {
            let tracking = tracking.clone();
            Timeline::once(move |cx: Cx<Camera>| async move {
                time_passed(&cx, 2.0).await;
                tracing::info!("swapping look-at target");
                tracking.attach(look_at([5.0, 0.0, -5.0]));
                Ok(())
            })
        };
        let track = Timeline::once(move |cx: Cx<Camera>| async move { tracking.run(&cx).await });
        let script = Timeline::once(move |cx: Cx<Camera>| async move {
            shots.run(&cx).await?;

            // A slow pan that may not finish before the timeout.
            let pan = move_to([-10.0, 8.0, 0.0], Some(velocity(2.0)));
            race(&cx, [Branch::from(pan), Branch::from(hold(3.0))]).await
        });

        // The script ends the shot; tracking and the swap only live alongside it.
        let side = Timeline::once(move |cx: Cx<Camera>| async move {
            all(&cx, [Branch::Run(swap), Branch::Run(track)]).await
        });
        race(&cx, [Branch::Run(script), Branch::Run(side)]).await
    });

    let fps = parse_fps();
    let mut runner = TimelineRunner::new(root, RunnerConfig::default());
    let mut camera = Camera::default();
    let frames = FrameLoop::new(fps).run_until(&mut runner, &mut camera, |_| false);

    tracing::info!(
        frames,
        seconds = runner.clock().time,
        position = ?camera.position,
        target = ?camera.target,
        "shot list finished"
    );
}

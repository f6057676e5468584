//! State graph demo for the Rust Timeline Library
//!
//! A small simulated creature driven by a [`TimelineGraph`]: it wanders until
//! it gets hungry or tired, eats or sleeps, and leaves once the day is over.
//! Alongside the graph a [`SwitchTimeline`] picks its posture from its
//! energy, and a [`QueueTimeline`] plays queued emotes one after another.
//!
//! Usage:
//!   cargo run --bin state_graph_demo                # realtime at 60 fps
//!   cargo run --bin state_graph_demo -- --offline   # as fast as possible
//!   RUST_LOG=rust_timeline_lib=debug cargo run --bin state_graph_demo

use rust_timeline_lib::{
    race, time_passed, Action, Branch, Clock, Cx, FrameLoop, GraphState, OnceTimeline, QueueTimeline,
    ReusableTimeline, RunnerConfig, StepState, SwitchCase, SwitchTimeline, Timeline, TimelineGraph,
    TimelineRunner, Transition,
};
use std::env;
use tracing_subscriber::EnvFilter;

/// Length of the simulated day in seconds.
const DAY_LENGTH: f64 = 12.0;

#[derive(Debug)]
struct Creature {
    energy: f64,
    hunger: f64,
    posture: &'static str,
}

impl Default for Creature {
    fn default() -> Self {
        Self {
            energy: 1.0,
            hunger: 0.0,
            posture: "upright",
        }
    }
}

/// Apply a per-second change to the creature every frame until cancelled.
fn drift(energy: f64, hunger: f64) -> Action<Creature> {
    Action::new().update(move |creature: &mut Creature, clock: &Clock, _: &mut StepState| {
        creature.energy = (creature.energy + energy * clock.delta).clamp(0.0, 1.0);
        creature.hunger = (creature.hunger + hunger * clock.delta).clamp(0.0, 1.0);
    })
}

fn wander() -> GraphState<Creature> {
    GraphState::from_timeline(ReusableTimeline::new(|cx: Cx<Creature>| async move {
        tracing::info!("wandering");
        cx.action(drift(-0.15, 0.2)).await;
        Ok(())
    }))
    .transition("leave", Transition::when_update(|_: &Creature, clock: &Clock| clock.time > DAY_LENGTH))
    .transition("eat", Transition::when_update(|c: &Creature, _: &Clock| c.hunger > 0.8))
    .transition("sleep", Transition::when_update(|c: &Creature, _: &Clock| c.energy < 0.2))
}

fn eat() -> GraphState<Creature> {
    GraphState::new(ReusableTimeline::new(|cx: Cx<Creature>| async move {
        tracing::info!("eating");
        cx.action(Action::new().update(|c: &mut Creature, clock: &Clock, _: &mut StepState| {
            c.hunger = (c.hunger - 0.5 * clock.delta).max(0.0);
            c.hunger > 0.1
        }))
        .await;
        Ok(Some("wander".to_string()))
    }))
}

fn sleep() -> GraphState<Creature> {
    GraphState::from_timeline(ReusableTimeline::new(|cx: Cx<Creature>| async move {
        tracing::info!("sleeping");
        cx.action(Action::new().update(|c: &mut Creature, clock: &Clock, _: &mut StepState| {
            c.energy = (c.energy + 0.4 * clock.delta).min(1.0);
            c.energy < 0.9
        }))
        .await;
        Ok(())
    }))
    .finally("wander")
}

fn posture(name: &'static str) -> ReusableTimeline<Creature> {
    ReusableTimeline::new(move |cx: Cx<Creature>| async move {
        cx.action(Action::new().update(move |c: &mut Creature, _: &Clock, _: &mut StepState| {
            c.posture = name;
        }))
        .await;
        Ok(())
    })
}

fn emote(text: &'static str) -> ReusableTimeline<Creature> {
    ReusableTimeline::new(move |cx: Cx<Creature>| async move {
        tracing::info!(emote = text, "emote");
        time_passed(&cx, 0.75).await;
        Ok(())
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let offline = env::args().any(|a| a == "--offline");

    let graph = match TimelineGraph::new(
        "wander",
        [
            ("wander".to_string(), wander()),
            ("eat".to_string(), eat()),
            ("sleep".to_string(), sleep()),
        ],
    ) {
        Ok(graph) => graph.with_exit_state("leave"),
        Err(err) => {
            tracing::error!(error = %err, "invalid graph");
            return;
        }
    };

    let postures = SwitchTimeline::new(vec![
        SwitchCase::when(|c: &Creature, _: &Clock| c.energy < 0.3, posture("slouching")),
        SwitchCase::otherwise(posture("upright")),
    ]);

    let emotes = QueueTimeline::new();
    for text in ["yawn", "stretch", "hum"] {
        emotes.attach(emote(text), None);
    }

    let g = graph.clone();
    let root = OnceTimeline::new(move |cx: Cx<Creature>| async move {
        let life = Timeline::once(move |cx: Cx<Creature>| async move { g.run(&cx).await });
        let posture = Timeline::once(move |cx: Cx<Creature>| async move { postures.run(&cx).await });
        let chatter = Timeline::once(move |cx: Cx<Creature>| async move {
            emotes.run(&cx).await?;
            cx.idle().await;
            Ok(())
        });
        // The day ends with the graph; the side tracks are cancelled with it.
        race(&cx, [Branch::Run(life), Branch::Run(posture), Branch::Run(chatter)]).await
    });

    let mut runner = TimelineRunner::new(root, RunnerConfig::default());
    let mut creature = Creature::default();
    let frames = if offline {
        let mut frames = 0;
        while !runner.is_done() {
            runner.update(&mut creature, 1.0 / 60.0);
            frames += 1;
        }
        frames
    } else {
        FrameLoop::new(60.0).run_until(&mut runner, &mut creature, |_| false)
    };

    tracing::info!(
        frames,
        state = %graph.current_state(),
        energy = creature.energy,
        hunger = creature.hunger,
        posture = creature.posture,
        "day over"
    );
}

//! Headless tests for [`ShatterPlugin`].
//!
//! These tests use [`MinimalPlugins`] with a manual time step, so frames
//! advance a fixed amount of simulated time and nothing depends on the wall
//! clock except the per-task budget.

use bevy::math::Affine3A;
use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;
use rubble::destroyer::Destroyer;
use rubble::explosion::ExplosionRequest;
use rubble::scene::{AnchorVolume, BodyId, FragmentState, SourceBody, SourceMesh};
use rubble::{ShatterConfig, ShatterPlugin, ShatterRuntime, SiteMode, TaskStatus};
use std::time::Duration;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn app(step: Duration) -> App {
    let mut app = App::new();
    app.add_plugins((MinimalPlugins, ShatterPlugin))
        .insert_resource(TimeUpdateStrategy::ManualDuration(step));
    app.update(); // startup: config load
    app
}

fn add_wall(app: &mut App) -> BodyId {
    let mut runtime = app.world_mut().resource_mut::<ShatterRuntime>();
    let scene = runtime.scene_mut();
    let ground = scene.add_anchor(AnchorVolume::axis_aligned(
        Vec3::new(0.0, -0.5, 0.0),
        Vec3::new(3.0, 0.55, 3.0),
    ));
    scene.add_source(
        SourceBody::new("Wall", SourceMesh::quad(2.0, 2.0))
            .with_placement(Affine3A::from_translation(Vec3::new(0.0, 1.0, 0.0)))
            .with_anchors([ground]),
    )
}

fn run_until_settled(app: &mut App, max_frames: usize) {
    for _ in 0..max_frames {
        app.update();
        if app.world().resource::<ShatterRuntime>().is_idle() {
            return;
        }
    }
    panic!("tasks still in flight after {max_frames} frames");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn plugin_registers_resources() {
    let app = app(Duration::from_millis(16));
    assert!(app.world().get_resource::<ShatterConfig>().is_some());
    assert!(app.world().get_resource::<ShatterRuntime>().is_some());
    assert!(app.world().get_resource::<Destroyer>().is_some());
}

#[test]
fn config_changes_reach_the_runtime() {
    let mut app = app(Duration::from_millis(16));
    app.world_mut().resource_mut::<ShatterConfig>().budget_ms = 3;
    app.update();
    assert_eq!(
        app.world().resource::<ShatterRuntime>().config().budget_ms,
        3,
        "runtime must pick up the changed config"
    );
}

#[test]
fn queued_fragmentation_finishes_across_frames() {
    let mut app = app(Duration::from_millis(16));
    let wall = add_wall(&mut app);
    let task = app
        .world_mut()
        .resource_mut::<ShatterRuntime>()
        .fragment(wall, None, SiteMode::PerTriangle);

    run_until_settled(&mut app, 10_000);

    let runtime = app.world().resource::<ShatterRuntime>();
    assert_eq!(runtime.status(task), TaskStatus::Finished);
    let body = runtime.fragment_stats(task).unwrap().fragmented_body.unwrap();
    assert!(runtime.scene().body(body).unwrap().graph.is_some());
}

#[test]
fn released_fragments_decay_with_frame_time() {
    let mut app = app(Duration::from_secs(1));
    let wall = add_wall(&mut app);
    app.world_mut()
        .resource_mut::<ShatterRuntime>()
        .fragment(wall, None, SiteMode::PerTriangle);
    run_until_settled(&mut app, 10_000);

    let task = app
        .world_mut()
        .resource_mut::<ShatterRuntime>()
        .explode(ExplosionRequest::new(Vec3::new(0.0, 1.0, 0.0), 50.0, 1.0));
    run_until_settled(&mut app, 10_000);
    let stats = app.world().resource::<ShatterRuntime>().explosion_stats(task).unwrap();
    assert!(stats.destroyed_all);

    let max_delay = app.world().resource::<ShatterConfig>().fragment_max_destroy_delay;
    for _ in 0..(max_delay as usize + 3) {
        app.update();
    }
    let runtime = app.world().resource::<ShatterRuntime>();
    assert!(
        runtime.scene().fragments().all(|f| f.state == FragmentState::Destroyed),
        "every released fragment must be disposed after the maximum delay"
    );
}

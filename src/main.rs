use bevy::log::LogPlugin;
use bevy::math::Affine3A;
use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;
use rubble::config::load_shatter_config;
use rubble::destroyer::{Destroyer, DestroyableState};
use rubble::scene::{AnchorVolume, FragmentState, SourceBody, SourceMesh};
use rubble::{ShatterConfig, ShatterPlugin, ShatterRuntime};
use std::env;
use std::time::Duration;

/// Simulated time per frame.
const FRAME_STEP: Duration = Duration::from_millis(100);
const DEFAULT_FRAMES: usize = 3000;

/// `SHATTER_SEED` overrides the configured seed so runs can be replayed.
fn seed_from_env(mut config: ResMut<ShatterConfig>) {
    if let Some(seed) = env::var("SHATTER_SEED").ok().and_then(|s| s.parse().ok()) {
        config.seed = Some(seed);
        info!("Using seed {} from SHATTER_SEED", seed);
    }
}

/// A wall standing on the ground with a door beside it.
fn build_scene(mut runtime: ResMut<ShatterRuntime>, mut destroyer: ResMut<Destroyer>) {
    let scene = runtime.scene_mut();
    let ground = scene.add_anchor(AnchorVolume::axis_aligned(
        Vec3::new(0.0, -0.25, 0.0),
        Vec3::new(10.0, 0.25, 10.0),
    ));

    let wall = scene.add_source(
        SourceBody::new("Wall", SourceMesh::cuboid(Vec3::new(2.0, 1.5, 0.1)))
            .with_placement(Affine3A::from_translation(Vec3::new(0.0, 1.5, 0.0)))
            .with_anchors([ground]),
    );
    let door = scene.add_source(
        SourceBody::new("Door", SourceMesh::quad(1.0, 2.0))
            .with_placement(Affine3A::from_translation(Vec3::new(3.0, 1.0, 0.0)))
            .with_anchors([ground]),
    );
    destroyer.register(wall, "Wall");
    destroyer.register(door, "Door");
}

fn report(app: &App) {
    let runtime = app.world().resource::<ShatterRuntime>();
    let destroyer = app.world().resource::<Destroyer>();
    for (_, entry) in destroyer.iter() {
        let standing = runtime
            .scene()
            .body(entry.current)
            .and_then(|b| b.graph.as_ref())
            .map_or(0, |g| g.current_fragment_count());
        info!("{}: {:?}, {} fragments standing", entry.name, entry.state, standing);
    }
    let fragments = runtime.scene().fragments();
    let (mut frozen, mut moving, mut destroyed) = (0, 0, 0);
    for f in fragments {
        match f.state {
            FragmentState::Frozen => frozen += 1,
            FragmentState::Moving => moving += 1,
            FragmentState::Destroyed => destroyed += 1,
        }
    }
    info!("Fragments: {} frozen, {} moving, {} destroyed", frozen, moving, destroyed);
}

fn main() {
    let frames = env::var("SHATTER_FRAMES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_FRAMES);

    let mut app = App::new();
    app.add_plugins((MinimalPlugins, LogPlugin::default()))
        .insert_resource(TimeUpdateStrategy::ManualDuration(FRAME_STEP))
        .add_plugins(ShatterPlugin)
        .add_systems(
            Startup,
            (seed_from_env.after(load_shatter_config), build_scene),
        );

    for _ in 0..frames {
        app.update();
        let done = app.world().resource::<Destroyer>().is_finished()
            && app.world().resource::<ShatterRuntime>().is_idle();
        if done {
            break;
        }
    }

    report(&app);
    let unfinished = app
        .world()
        .resource::<Destroyer>()
        .iter()
        .filter(|(_, d)| !matches!(d.state, DestroyableState::Destroyed))
        .count();
    info!("{} of the destroyables still stand after {} frames", unfinished, frames);
}

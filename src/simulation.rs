//! Bevy plugin and systems driving the shatter runtime.

use crate::config::{load_shatter_config, ShatterConfig};
use crate::destroyer::Destroyer;
use crate::physics::ParryWorld;
use crate::runtime::Runtime;
use bevy::log::debug;
use bevy::prelude::*;

/// Runtime over the reference physics world, as an ECS resource.
#[derive(Resource, Deref, DerefMut)]
pub struct ShatterRuntime(pub Runtime<ParryWorld>);

impl Default for ShatterRuntime {
    fn default() -> Self {
        Self(Runtime::new(ParryWorld::new(), ShatterConfig::default()))
    }
}

pub struct ShatterPlugin;

impl Plugin for ShatterPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ShatterConfig>()
            .init_resource::<ShatterRuntime>()
            .insert_resource(Destroyer::new(&ShatterConfig::default()))
            .add_systems(Startup, load_shatter_config)
            .add_systems(
                Update,
                (
                    apply_config_system.run_if(resource_changed::<ShatterConfig>),
                    destroyer_system,
                    tick_tasks_system,
                    joint_break_system,
                    decay_system,
                )
                    .chain(),
            );
    }
}

/// Push a changed `ShatterConfig` into the runtime and the destroyer.
pub fn apply_config_system(
    config: Res<ShatterConfig>,
    mut runtime: ResMut<ShatterRuntime>,
    mut destroyer: ResMut<Destroyer>,
) {
    runtime.set_config(config.clone());
    destroyer.reconfigure(&config);
}

pub fn destroyer_system(time: Res<Time>, mut destroyer: ResMut<Destroyer>, mut runtime: ResMut<ShatterRuntime>) {
    destroyer.update(time.elapsed_secs(), &mut runtime.0);
}

/// Step every in-flight task under the frame budget.
pub fn tick_tasks_system(mut runtime: ResMut<ShatterRuntime>) {
    if runtime.is_idle() {
        return;
    }
    let settled = runtime.tick();
    if settled > 0 {
        debug!("{} shatter tasks settled, {} in flight", settled, runtime.in_flight());
    }
}

/// Apply joint breaks reported by the physics world (one frame late).
pub fn joint_break_system(mut runtime: ResMut<ShatterRuntime>) {
    let severed = runtime.scene_mut().process_joint_breaks();
    if severed > 0 {
        debug!("Joint breaks removed {} graph edges", severed);
    }
}

/// Advance the disposal clock of released fragments.
pub fn decay_system(time: Res<Time>, mut runtime: ResMut<ShatterRuntime>) {
    runtime.scene_mut().advance(time.delta_secs());
}

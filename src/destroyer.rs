//! Randomized destruction scheduler.
//!
//! Registered bodies are split by name into two categories: props (`Door*`,
//! `Window*`) and building parts (everything else). Each category wakes up at
//! a random time; from then on every update has a small chance of picking an
//! idle destroyable and advancing it:
//!
//! ```text
//! Decaying ─fragment─▶ Fragmenting ─first explosion─▶ Exploding ─┬─▶ Fragmented ─explode─▶ Exploding
//!                                                                └─▶ Destroyed
//! ```
//!
//! A destroyable with a task in flight is never picked again until that task
//! settles; manual requests for it fail with `TargetBusy`.

use crate::config::{ShatterConfig, SiteMode};
use crate::error::{ShatterError, ShatterResult};
use crate::explosion::ExplosionRequest;
use crate::physics::{Aabb, PhysicsWorld};
use crate::runtime::{Runtime, TaskId, TaskStatus};
use crate::scene::BodyId;
use bevy::log::{info, warn};
use bevy::math::Vec3;
use bevy::prelude::Resource;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeMap;

/// RNG stream reserved for the destroyer; tasks use their own ids.
const DESTROYER_STREAM: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyableKind {
    /// Doors and windows: small cells, immediate severance on the first blast.
    Misc,
    /// Walls, roofs and anything else.
    Build,
}

impl DestroyableKind {
    pub fn classify(name: &str) -> Self {
        if name.starts_with("Door") || name.starts_with("Window") {
            DestroyableKind::Misc
        } else {
            DestroyableKind::Build
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyableState {
    Decaying,
    Fragmenting(TaskId),
    Exploding(TaskId),
    Fragmented,
    Destroyed,
    /// A task failed; the destroyable is left alone from then on.
    Failed,
}

impl DestroyableState {
    pub fn is_idle(&self) -> bool {
        matches!(self, DestroyableState::Decaying | DestroyableState::Fragmented)
    }
}

#[derive(Debug, Clone)]
pub struct Destroyable {
    pub name: String,
    pub kind: DestroyableKind,
    pub state: DestroyableState,
    /// Source body until fragmented, then the fragmented body.
    pub current: BodyId,
}

#[derive(Resource)]
pub struct Destroyer {
    entries: BTreeMap<BodyId, Destroyable>,
    misc_start: f32,
    build_start: f32,
    rng: StdRng,
}

impl Destroyer {
    pub fn new(config: &ShatterConfig) -> Self {
        let mut rng = config.rng(DESTROYER_STREAM);
        let misc_start = sample(&mut rng, config.misc_start_min, config.misc_start_max);
        let build_start = sample(&mut rng, config.build_start_min, config.build_start_max);
        Self {
            entries: BTreeMap::new(),
            misc_start,
            build_start,
            rng,
        }
    }

    /// Redraw start times and reseed from `config`, keeping every registration.
    pub fn reconfigure(&mut self, config: &ShatterConfig) {
        let fresh = Self::new(config);
        self.misc_start = fresh.misc_start;
        self.build_start = fresh.build_start;
        self.rng = fresh.rng;
    }

    /// Seconds after which `kind` starts to be picked.
    pub fn start_time(&self, kind: DestroyableKind) -> f32 {
        match kind {
            DestroyableKind::Misc => self.misc_start,
            DestroyableKind::Build => self.build_start,
        }
    }

    pub fn register(&mut self, body: BodyId, name: impl Into<String>) {
        let name = name.into();
        let kind = DestroyableKind::classify(&name);
        self.entries.insert(
            body,
            Destroyable {
                name,
                kind,
                state: DestroyableState::Decaying,
                current: body,
            },
        );
    }

    /// Registered destroyables keyed by the source body they were registered with.
    pub fn get(&self, body: BodyId) -> Option<&Destroyable> {
        self.entries.get(&body)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BodyId, &Destroyable)> {
        self.entries.iter().map(|(id, d)| (*id, d))
    }

    /// True once nothing is left to destroy or in flight.
    pub fn is_finished(&self) -> bool {
        self.entries
            .values()
            .all(|d| matches!(d.state, DestroyableState::Destroyed | DestroyableState::Failed))
    }

    fn entry_mut(&mut self, body: BodyId) -> ShatterResult<&mut Destroyable> {
        self.entries.get_mut(&body).ok_or(ShatterError::UnknownBody { body })
    }

    /// Start fragmenting a decaying destroyable.
    pub fn fragment_now<P: PhysicsWorld>(&mut self, body: BodyId, runtime: &mut Runtime<P>) -> ShatterResult<TaskId> {
        let entry = self.entry_mut(body)?;
        match entry.state {
            DestroyableState::Decaying => {}
            DestroyableState::Fragmenting(_) | DestroyableState::Exploding(_) => {
                return Err(ShatterError::TargetBusy { body })
            }
            _ => return Err(ShatterError::UnknownBody { body: entry.current }),
        }
        let mode = match entry.kind {
            DestroyableKind::Misc => SiteMode::ByArea,
            DestroyableKind::Build => SiteMode::PerTriangle,
        };
        let task = runtime.fragment(entry.current, None, mode);
        info!("Fragmenting {}", entry.name);
        entry.state = DestroyableState::Fragmenting(task);
        Ok(task)
    }

    /// Blow up a fragmented destroyable at a random point of its bounds.
    pub fn explode_now<P: PhysicsWorld>(&mut self, body: BodyId, runtime: &mut Runtime<P>) -> ShatterResult<TaskId> {
        let entry = self.entries.get(&body).ok_or(ShatterError::UnknownBody { body })?;
        match entry.state {
            DestroyableState::Fragmented => {}
            DestroyableState::Fragmenting(_) | DestroyableState::Exploding(_) => {
                return Err(ShatterError::TargetBusy { body })
            }
            _ => return Err(ShatterError::UnknownBody { body: entry.current }),
        }
        self.launch_explosion(body, runtime, false)
    }

    fn launch_explosion<P: PhysicsWorld>(
        &mut self,
        body: BodyId,
        runtime: &mut Runtime<P>,
        first: bool,
    ) -> ShatterResult<TaskId> {
        let config = runtime.config().clone();
        let entry = self.entries.get(&body).ok_or(ShatterError::UnknownBody { body })?;
        let (current, kind) = (entry.current, entry.kind);
        let Some(bounds) = runtime.scene().body_bounds(current) else {
            self.entry_mut(body)?.state = DestroyableState::Destroyed;
            return Err(ShatterError::UnknownBody { body: current });
        };

        let top = if first { config.first_explosion_max_height } else { 1.0 };
        let center = explosion_point(&bounds, top, &mut self.rng);
        let mut request = match kind {
            DestroyableKind::Misc => {
                ExplosionRequest::new(center, config.misc_explosion_radius, config.misc_explosion_force)
            }
            DestroyableKind::Build => {
                ExplosionRequest::new(center, config.build_explosion_radius, config.build_explosion_force)
            }
        };
        if first && kind == DestroyableKind::Misc {
            request = request.with_immediate_severance();
        }
        let task = runtime.explode(request);
        let entry = self.entry_mut(body)?;
        info!("Exploding {}", entry.name);
        entry.state = DestroyableState::Exploding(task);
        Ok(task)
    }

    /// One frame of the scheduler. `elapsed` is the time since the scene
    /// started.
    pub fn update<P: PhysicsWorld>(&mut self, elapsed: f32, runtime: &mut Runtime<P>) {
        let (trigger, pick) = (runtime.config().trigger_chance, runtime.config().pick_chance);
        for kind in [DestroyableKind::Misc, DestroyableKind::Build] {
            if elapsed > self.start_time(kind) && self.rng.gen::<f32>() < trigger {
                self.pick(kind, pick, runtime);
            }
        }
        self.settle(runtime);
    }

    fn pick<P: PhysicsWorld>(&mut self, kind: DestroyableKind, chance: f32, runtime: &mut Runtime<P>) {
        let idle: Vec<BodyId> = self
            .entries
            .iter()
            .filter(|(_, d)| d.kind == kind && d.state.is_idle())
            .map(|(id, _)| *id)
            .collect();
        if idle.is_empty() || self.rng.gen::<f32>() >= chance {
            return;
        }
        let body = idle[self.rng.gen_range(0..idle.len())];
        let result = match self.entries.get(&body).map(|d| d.state) {
            Some(DestroyableState::Decaying) => self.fragment_now(body, runtime),
            Some(DestroyableState::Fragmented) => self.explode_now(body, runtime),
            _ => return,
        };
        if let Err(e) = result {
            warn!("Destroyer skipped {}: {}", body, e);
        }
    }

    /// Advance destroyables whose task settled.
    fn settle<P: PhysicsWorld>(&mut self, runtime: &mut Runtime<P>) {
        let in_flight: Vec<(BodyId, DestroyableState)> = self
            .entries
            .iter()
            .filter(|(_, d)| matches!(d.state, DestroyableState::Fragmenting(_) | DestroyableState::Exploding(_)))
            .map(|(id, d)| (*id, d.state))
            .collect();

        for (body, state) in in_flight {
            match state {
                DestroyableState::Fragmenting(task) => match runtime.status(task) {
                    TaskStatus::Running => {}
                    TaskStatus::Finished => {
                        let fragmented = runtime.fragment_stats(task).and_then(|s| s.fragmented_body);
                        runtime.forget(task);
                        let Some(fragmented) = fragmented else {
                            self.fail(body, "fragmentation produced no body");
                            continue;
                        };
                        if let Some(entry) = self.entries.get_mut(&body) {
                            entry.current = fragmented;
                        }
                        if let Err(e) = self.launch_explosion(body, runtime, true) {
                            warn!("First explosion of {} skipped: {}", body, e);
                        }
                    }
                    TaskStatus::Failed(_) | TaskStatus::Unknown => {
                        runtime.forget(task);
                        self.fail(body, "fragmentation failed");
                    }
                },
                DestroyableState::Exploding(task) => match runtime.status(task) {
                    TaskStatus::Running => {}
                    TaskStatus::Finished => {
                        let destroyed = runtime.explosion_stats(task).is_some_and(|s| s.destroyed_all);
                        runtime.forget(task);
                        let Some(entry) = self.entries.get_mut(&body) else {
                            continue;
                        };
                        let gone = destroyed
                            || runtime
                                .scene()
                                .body(entry.current)
                                .is_none_or(|b| b.is_destroyed());
                        entry.state = if gone {
                            info!("{} destroyed", entry.name);
                            DestroyableState::Destroyed
                        } else {
                            DestroyableState::Fragmented
                        };
                    }
                    TaskStatus::Failed(_) | TaskStatus::Unknown => {
                        runtime.forget(task);
                        self.fail(body, "explosion failed");
                    }
                },
                _ => {}
            }
        }
    }

    fn fail(&mut self, body: BodyId, reason: &str) {
        if let Some(entry) = self.entries.get_mut(&body) {
            warn!("Destroyer gave up on {}: {}", entry.name, reason);
            entry.state = DestroyableState::Failed;
        }
    }
}

fn sample(rng: &mut StdRng, lo: f32, hi: f32) -> f32 {
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

/// Random point of `bounds`: every axis spans the full extent except y,
/// which goes from the bottom up to `top` (in half-extent units, 1.0 = top).
pub fn explosion_point<R: Rng + ?Sized>(bounds: &Aabb, top: f32, rng: &mut R) -> Vec3 {
    let top = top.clamp(-1.0, 1.0);
    let offset = Vec3::new(
        rng.gen_range(-1.0..=1.0),
        rng.gen_range(-1.0..=top),
        rng.gen_range(-1.0..=1.0),
    );
    bounds.center() + bounds.half_extents() * offset
}

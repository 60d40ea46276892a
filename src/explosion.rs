//! Destruction pipeline.
//!
//! An [`ExplosionTask`] releases every frozen fragment inside the blast
//! sphere, then re-evaluates each fragment graph it touched:
//!
//! - no anchors, or too few fragments left: the whole body collapses;
//! - otherwise a flood fill from the anchors finds the fragments that lost
//!   their support, and only those are released (or everything, when the
//!   supported part itself is too small).
//!
//! Every hit, flood-fill visit and released fragment is one unit of work.

use crate::budget::{FrameBudget, SliceClock, Step};
use crate::config::ShatterConfig;
use crate::error::{validate_explosion, ShatterResult};
use crate::graph::{FloodFill, FragmentGraph};
use crate::physics::{ColliderHandle, PhysicsWorld};
use crate::scene::{BodyId, BodyStatus, FragmentId, FragmentState, Release, Scene};
use bevy::log::{debug, info};
use bevy::math::Vec3;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplosionRequest {
    pub center: Vec3,
    pub radius: f32,
    pub force: f32,
    /// On collapse, remove the joints of released fragments right away
    /// instead of after the joint destroy delay.
    pub immediate_severance: bool,
}

impl ExplosionRequest {
    pub fn new(center: Vec3, radius: f32, force: f32) -> Self {
        Self {
            center,
            radius,
            force,
            immediate_severance: false,
        }
    }

    pub fn with_immediate_severance(mut self) -> Self {
        self.immediate_severance = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplosionStats {
    pub is_done: bool,
    /// Frozen fragments released by a direct hit.
    pub fragments_exploded: usize,
    /// Frozen fragments released because they lost their support.
    pub fragments_detached: usize,
    /// Some touched body collapsed completely.
    pub destroyed_all: bool,
    pub clock: SliceClock,
}

/// Verdict of a structural check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    Stable,
    /// These fragments are no longer connected to an anchor.
    Detach(Vec<FragmentId>),
    Collapse,
}

fn too_few(count: usize, initial: usize, collapse_fraction: f32) -> bool {
    count as f32 <= collapse_fraction * initial as f32
}

/// Checks before any traversal: no anchors, or live fraction at or below
/// `collapse_fraction` of the initial count.
fn collapses_outright(graph: &FragmentGraph, collapse_fraction: f32) -> bool {
    !graph.has_anchors()
        || too_few(
            graph.current_fragment_count(),
            graph.initial_fragment_count(),
            collapse_fraction,
        )
}

/// Verdict for a finished flood fill.
fn judge_flood(graph: &FragmentGraph, fill: &FloodFill<FragmentId>, collapse_fraction: f32) -> Integrity {
    if too_few(fill.reached_count(), graph.initial_fragment_count(), collapse_fraction) {
        return Integrity::Collapse;
    }
    let unreached = graph.unreached(fill);
    if unreached.is_empty() {
        Integrity::Stable
    } else {
        Integrity::Detach(unreached)
    }
}

/// Structural check of `graph` in one go.
pub fn assess_integrity(graph: &FragmentGraph, collapse_fraction: f32) -> Integrity {
    if collapses_outright(graph, collapse_fraction) {
        return Integrity::Collapse;
    }
    let mut fill = graph.flood_from_anchors();
    fill.advance(graph.graph(), &FrameBudget::unlimited());
    judge_flood(graph, &fill, collapse_fraction)
}

enum Phase {
    Start,
    Hits { next: usize },
    Evaluate { next: usize },
    Flooding { body: BodyId, fill: FloodFill<FragmentId>, resume: usize },
    Releasing { body: BodyId, pending: Vec<FragmentId>, next: usize, collapse: bool, resume: usize },
    Done,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Hits { .. } => "hits",
            Phase::Evaluate { .. } => "evaluate",
            Phase::Flooding { .. } => "flooding",
            Phase::Releasing { .. } => "releasing",
            Phase::Done => "done",
        }
    }
}

pub struct ExplosionTask {
    request: ExplosionRequest,
    config: ShatterConfig,
    rng: StdRng,
    phase: Phase,
    stats: ExplosionStats,
    hits: Vec<ColliderHandle>,
    touched: BTreeSet<BodyId>,
}

impl ExplosionTask {
    pub fn new(request: ExplosionRequest, config: ShatterConfig, rng: StdRng) -> Self {
        Self {
            request,
            config,
            rng,
            phase: Phase::Start,
            stats: ExplosionStats::default(),
            hits: Vec::new(),
            touched: BTreeSet::new(),
        }
    }

    pub fn request(&self) -> &ExplosionRequest {
        &self.request
    }

    pub fn stats(&self) -> &ExplosionStats {
        &self.stats
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    /// Run units of work until the budget is spent or the task finishes.
    pub fn step<P: PhysicsWorld>(&mut self, scene: &mut Scene<P>, budget: &FrameBudget) -> ShatterResult<Step> {
        while !self.is_done() {
            let phase = std::mem::replace(&mut self.phase, Phase::Done);
            self.phase = match phase {
                Phase::Start => self.start(scene)?,
                Phase::Hits { next } => self.hit(scene, next)?,
                Phase::Evaluate { next } => self.evaluate(scene, next),
                Phase::Flooding { body, fill, resume } => self.flood(scene, body, fill, resume, budget),
                Phase::Releasing {
                    body,
                    pending,
                    next,
                    collapse,
                    resume,
                } => self.release(scene, body, pending, next, collapse, resume)?,
                Phase::Done => Phase::Done,
            };
            if !self.is_done() && budget.exhausted() {
                self.stats.clock.record_yield(budget);
                debug!(
                    "Explosion at {:?} yielded while {} ({} exploded, {} detached)",
                    self.request.center,
                    self.phase.name(),
                    self.stats.fragments_exploded,
                    self.stats.fragments_detached
                );
                return Ok(Step::Yield);
            }
        }
        self.stats.clock.record_finish(budget);
        self.stats.is_done = true;
        info!(
            "Explosion at {:?} done: {} exploded, {} detached{}",
            self.request.center,
            self.stats.fragments_exploded,
            self.stats.fragments_detached,
            if self.stats.destroyed_all { ", body destroyed" } else { "" }
        );
        Ok(Step::Done)
    }

    fn hit_release(&self, sever_joints: bool) -> Release {
        Release {
            center: self.request.center,
            radius: self.request.radius,
            force: self.request.force,
            sever_joints,
            dispose_after: (
                self.config.fragment_min_destroy_delay,
                self.config.fragment_max_destroy_delay,
            ),
        }
    }

    fn start<P: PhysicsWorld>(&mut self, scene: &mut Scene<P>) -> ShatterResult<Phase> {
        let ExplosionRequest { center, radius, force, .. } = self.request;
        validate_explosion(radius, force)?;
        self.hits = scene.physics.overlap_sphere(center, radius);
        debug!("Explosion at {:?} r={} hits {} colliders", center, radius, self.hits.len());
        Ok(Phase::Hits { next: 0 })
    }

    fn hit<P: PhysicsWorld>(&mut self, scene: &mut Scene<P>, next: usize) -> ShatterResult<Phase> {
        let Some(&collider) = self.hits.get(next) else {
            return Ok(Phase::Evaluate { next: 0 });
        };
        let Some(id) = scene.owner_of(collider) else {
            return Ok(Phase::Hits { next: next + 1 });
        };
        let (state, owner) = {
            let fragment = scene.expect_fragment(id, "explosion hit")?;
            (fragment.state, fragment.body)
        };
        match state {
            FragmentState::Frozen => {
                if let Some(body) = owner {
                    let severed = match scene.body_mut(body).and_then(|b| b.graph.as_mut()) {
                        Some(graph) if graph.contains(id) => graph.detach(id)?,
                        _ => Vec::new(),
                    };
                    for (_, joint) in severed {
                        scene.remove_joint(joint);
                    }
                    self.touched.insert(body);
                }
                let release = self.hit_release(self.request.immediate_severance);
                if scene.release_fragment(id, &release, &mut self.rng)? {
                    self.stats.fragments_exploded += 1;
                }
            }
            FragmentState::Moving => {
                let ExplosionRequest { center, radius, force, .. } = self.request;
                scene.physics.apply_explosion_force(collider, force, center, radius);
            }
            FragmentState::Destroyed => {}
        }
        Ok(Phase::Hits { next: next + 1 })
    }

    fn evaluate<P: PhysicsWorld>(&self, scene: &Scene<P>, next: usize) -> Phase {
        let Some(&body) = self.touched.iter().nth(next) else {
            return Phase::Done;
        };
        let Some(graph) = scene.body(body).and_then(|b| b.graph.as_ref()) else {
            return Phase::Evaluate { next: next + 1 };
        };
        if collapses_outright(graph, self.config.collapse_fraction) {
            return Phase::Releasing {
                body,
                pending: graph.fragments(),
                next: 0,
                collapse: true,
                resume: next,
            };
        }
        Phase::Flooding {
            body,
            fill: graph.flood_from_anchors(),
            resume: next,
        }
    }

    fn flood<P: PhysicsWorld>(
        &self,
        scene: &Scene<P>,
        body: BodyId,
        mut fill: FloodFill<FragmentId>,
        resume: usize,
        budget: &FrameBudget,
    ) -> Phase {
        let Some(graph) = scene.body(body).and_then(|b| b.graph.as_ref()) else {
            return Phase::Evaluate { next: resume + 1 };
        };
        if !fill.advance(graph.graph(), budget) {
            return Phase::Flooding { body, fill, resume };
        }
        match judge_flood(graph, &fill, self.config.collapse_fraction) {
            Integrity::Stable => Phase::Evaluate { next: resume + 1 },
            Integrity::Detach(pending) => {
                debug!("{} lost support for {} fragments", body, pending.len());
                Phase::Releasing {
                    body,
                    pending,
                    next: 0,
                    collapse: false,
                    resume,
                }
            }
            Integrity::Collapse => Phase::Releasing {
                body,
                pending: graph.fragments(),
                next: 0,
                collapse: true,
                resume,
            },
        }
    }

    fn release<P: PhysicsWorld>(
        &mut self,
        scene: &mut Scene<P>,
        body: BodyId,
        pending: Vec<FragmentId>,
        next: usize,
        collapse: bool,
        resume: usize,
    ) -> ShatterResult<Phase> {
        let Some(&id) = pending.get(next) else {
            if collapse {
                if let Some(record) = scene.body_mut(body) {
                    record.graph = None;
                    record.status = BodyStatus::Destroyed;
                    info!("{} '{}' collapsed", body, record.name);
                }
                self.stats.destroyed_all = true;
            }
            return Ok(Phase::Evaluate { next: resume + 1 });
        };

        let severed = match scene.body_mut(body).and_then(|b| b.graph.as_mut()) {
            Some(graph) if graph.contains(id) => Some(graph.detach(id)?),
            _ => None,
        };
        if let Some(severed) = severed {
            let (lo, hi) = (self.config.joint_min_destroy_delay, self.config.joint_max_destroy_delay);
            let immediate = self.request.immediate_severance;
            for (_, joint) in severed {
                if collapse && !immediate {
                    let delay = self.rng.gen_range(lo.min(hi)..=hi.max(lo));
                    scene.remove_joint_later(joint, delay);
                } else {
                    scene.remove_joint(joint);
                }
            }
            if scene.release_fragment(id, &self.hit_release(immediate), &mut self.rng)? {
                self.stats.fragments_detached += 1;
            }
        }
        Ok(Phase::Releasing {
            body,
            pending,
            next: next + 1,
            collapse,
            resume,
        })
    }
}

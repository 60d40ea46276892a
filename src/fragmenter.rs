//! Fragmentation pipeline.
//!
//! A [`FragmentTask`] turns one source body into a fragmented body:
//!
//! ```text
//! Start → IteratingTriangles → BuildingGraph → DetectingAnchors → Finalizing → Done
//! ```
//!
//! 1. **Start** resolves parameters through the group hierarchy, validates
//!    the mesh and the tunables and registers the new body.
//! 2. **IteratingTriangles** subdivides one world-space triangle per unit and
//!    spawns a frozen, hidden fragment per non-empty cell.
//! 3. **BuildingGraph** scans one fragment per unit: candidates come from a
//!    [`SpatialGrid`] over the fragment boxes, confirmed by probing with an
//!    enlarged copy of the fragment. Each unordered pair is tested once.
//! 4. **DetectingAnchors** tests one fragment per unit against the body's
//!    anchor volumes.
//! 5. **Finalizing** reveals everything, hands the graph to the body and
//!    retires the source.
//!
//! A task that fails after `Start` removes its half-built body again.

use crate::budget::{FrameBudget, SliceClock, Step};
use crate::config::{FragmentParams, ShatterConfig, SiteMode};
use crate::error::{ShatterError, ShatterResult};
use crate::geometry::{extrude_polygon_to_solid, generate_cells_for_triangle, SiteCount};
use crate::graph::FragmentGraph;
use crate::physics::{Aabb, BodyKind, ColliderHandle, Drag, JointSpec, PhysicsWorld};
use crate::scene::{BodyId, BodyStatus, FragmentId, Scene, SourceMesh};
use crate::spatial_partition::SpatialGrid;
use bevy::log::{debug, info, warn};
use bevy::math::{Affine3A, Vec3};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};

/// What to fragment and how.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentRequest {
    pub body: BodyId,
    /// Takes precedence over the body's and its groups' parameters.
    pub params: Option<FragmentParams>,
    pub site_mode: SiteMode,
}

impl FragmentRequest {
    pub fn new(body: BodyId) -> Self {
        Self {
            body,
            params: None,
            site_mode: SiteMode::PerTriangle,
        }
    }
}

/// Progress of a fragmentation task, readable while it runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentStats {
    pub is_done: bool,
    /// Fragments created so far.
    pub fragments: usize,
    /// Set once the task finished.
    pub fragmented_body: Option<BodyId>,
    /// Sites or cells that produced no fragment.
    pub rejected_sites: usize,
    pub clock: SliceClock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    IteratingTriangles { submesh: usize, triangle: usize },
    BuildingGraph { next: usize },
    DetectingAnchors { next: usize },
    Finalizing,
    Done,
}

/// Inputs captured from the source body in `Start`.
struct Prepared {
    target: BodyId,
    params: FragmentParams,
    sites: SiteCount,
    mesh: SourceMesh,
    placement: Affine3A,
    material_count: usize,
    anchors: Option<Vec<ColliderHandle>>,
}

pub struct FragmentTask {
    request: FragmentRequest,
    config: ShatterConfig,
    rng: StdRng,
    phase: Phase,
    stats: FragmentStats,
    prepared: Option<Prepared>,
    fragments: Vec<FragmentId>,
    graph: FragmentGraph,
    boxes: BTreeMap<FragmentId, Aabb>,
    grid: SpatialGrid<FragmentId>,
    tested: HashSet<(FragmentId, FragmentId)>,
    anchored: HashSet<FragmentId>,
}

impl FragmentTask {
    pub fn new(request: FragmentRequest, config: ShatterConfig, rng: StdRng) -> Self {
        Self {
            request,
            config,
            rng,
            phase: Phase::Start,
            stats: FragmentStats::default(),
            prepared: None,
            fragments: Vec::new(),
            graph: FragmentGraph::new(),
            boxes: BTreeMap::new(),
            grid: SpatialGrid::new(1.0),
            tested: HashSet::new(),
            anchored: HashSet::new(),
        }
    }

    pub fn request(&self) -> &FragmentRequest {
        &self.request
    }

    pub fn stats(&self) -> &FragmentStats {
        &self.stats
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Run units of work until the budget is spent or the task finishes.
    pub fn step<P: PhysicsWorld>(&mut self, scene: &mut Scene<P>, budget: &FrameBudget) -> ShatterResult<Step> {
        while self.phase != Phase::Done {
            let next = match self.phase {
                Phase::Start => self.start(scene),
                Phase::IteratingTriangles { submesh, triangle } => self.iterate(scene, submesh, triangle),
                Phase::BuildingGraph { next } => self.scan_neighbours(scene, next),
                Phase::DetectingAnchors { next } => self.detect_anchor(scene, next),
                Phase::Finalizing => self.finalize(scene),
                Phase::Done => Ok(Phase::Done),
            };
            self.phase = match next {
                Ok(phase) => phase,
                Err(e) => {
                    self.abandon(scene);
                    return Err(e);
                }
            };
            if self.phase != Phase::Done && budget.exhausted() {
                self.stats.clock.record_yield(budget);
                debug!(
                    "Fragmenting {} yielded in {:?} ({} fragments so far)",
                    self.request.body, self.phase, self.stats.fragments
                );
                return Ok(Step::Yield);
            }
        }
        self.stats.clock.record_finish(budget);
        self.stats.is_done = true;
        Ok(Step::Done)
    }

    /// Drop whatever a failed run already put into the scene. The source
    /// body stays so the request can be retried.
    fn abandon<P: PhysicsWorld>(&mut self, scene: &mut Scene<P>) {
        self.phase = Phase::Done;
        let Some(prepared) = self.prepared.take() else {
            return;
        };
        let dropped = scene.discard_body(prepared.target);
        warn!(
            "Fragmenting {} failed; discarded {} and its {} fragments",
            self.request.body, prepared.target, dropped
        );
    }

    fn prepared(&self) -> ShatterResult<&Prepared> {
        self.prepared.as_ref().ok_or(ShatterError::UnknownBody {
            body: self.request.body,
        })
    }

    fn start<P: PhysicsWorld>(&mut self, scene: &mut Scene<P>) -> ShatterResult<Phase> {
        let body = self.request.body;
        let source = scene.source(body).ok_or(ShatterError::UnknownBody { body })?;
        let mesh = source.mesh.clone().ok_or(ShatterError::MissingMesh { body })?;
        if source.material_count == 0 {
            return Err(ShatterError::MissingMaterial { body });
        }
        mesh.validate()?;
        self.config.validate()?;
        let (name, group, placement, material_count) =
            (source.name.clone(), source.group, source.placement, source.material_count);

        let params = scene.resolve_params(body, self.request.params.as_ref(), &self.config.fragment)?;
        params.validate()?;
        let anchors = scene.anchors_for(body);
        let triangles: usize = (0..mesh.submeshes.len()).map(|s| mesh.triangle_count(s)).sum();
        info!(
            "Fragmenting {} '{}': {} triangles, {} anchors",
            body,
            name,
            triangles,
            anchors.as_ref().map_or(0, Vec::len)
        );

        let target = scene.begin_body(name, params, group);
        self.prepared = Some(Prepared {
            target,
            params,
            sites: params.site_count(self.request.site_mode),
            mesh,
            placement,
            material_count,
            anchors,
        });
        Ok(Phase::IteratingTriangles { submesh: 0, triangle: 0 })
    }

    fn iterate<P: PhysicsWorld>(&mut self, scene: &mut Scene<P>, submesh: usize, triangle: usize) -> ShatterResult<Phase> {
        let prepared = self.prepared()?;
        if submesh >= prepared.mesh.submeshes.len() {
            self.build_grid(scene);
            return Ok(Phase::BuildingGraph { next: 0 });
        }
        if triangle >= prepared.mesh.triangle_count(submesh) {
            return Ok(Phase::IteratingTriangles {
                submesh: submesh + 1,
                triangle: 0,
            });
        }

        let corners = prepared.mesh.world_triangle(submesh, triangle, &prepared.placement)?;
        let (target, params, sites) = (prepared.target, prepared.params, prepared.sites);
        let material = submesh % prepared.material_count;
        let cells = generate_cells_for_triangle(&corners, sites, &self.config.voronoi_options(), &mut self.rng);
        self.stats.rejected_sites += cells.rejected_sites;

        let drag = Drag {
            linear: self.config.fragment_linear_drag,
            angular: self.config.fragment_angular_drag,
        };
        for cell in cells.cells {
            let thickness = self.rng.gen_range(params.min_thickness..=params.max_thickness);
            let contraction = self
                .rng
                .gen_range(self.config.min_contraction..=self.config.max_contraction);
            let solid = match extrude_polygon_to_solid(&cell.polygon, thickness, contraction) {
                Ok(solid) => solid,
                Err(e) => {
                    debug!("Dropped cell of triangle {}/{}: {}", submesh, triangle, e);
                    self.stats.rejected_sites += 1;
                    continue;
                }
            };
            let Some(id) = scene.spawn_fragment(target, solid, material, params.density) else {
                self.stats.rejected_sites += 1;
                continue;
            };
            if let Some(collider) = scene.fragment(id).and_then(|f| f.collider) {
                scene.physics.set_drag(collider, drag);
            }
            self.graph.add_fragment(id)?;
            self.fragments.push(id);
            self.stats.fragments += 1;
        }
        Ok(Phase::IteratingTriangles {
            submesh,
            triangle: triangle + 1,
        })
    }

    fn build_grid<P: PhysicsWorld>(&mut self, scene: &Scene<P>) {
        self.boxes = self
            .fragments
            .iter()
            .filter_map(|id| scene.fragment_aabb(*id).map(|b| (*id, b)))
            .collect();
        let boxes: Vec<_> = self.boxes.iter().map(|(id, b)| (*id, *b)).collect();
        self.grid = SpatialGrid::for_boxes(&boxes);
    }

    fn scan_neighbours<P: PhysicsWorld>(&mut self, scene: &mut Scene<P>, next: usize) -> ShatterResult<Phase> {
        let Some(&id) = self.fragments.get(next) else {
            return Ok(Phase::DetectingAnchors { next: 0 });
        };
        let Some(own_box) = self.boxes.get(&id).copied() else {
            return Ok(Phase::BuildingGraph { next: next + 1 });
        };
        let target = self.prepared()?.target;

        let fragment = scene.expect_fragment(id, "adjacency scan")?;
        let upscale = self.config.mesh_upscaling;
        let probe = fragment.mesh.scaled_about_centroid(upscale).hull_points();
        let position = fragment.position;
        let margin = (own_box.max - own_box.min) * (upscale - 1.0);
        let reach = Aabb::new(own_box.min - margin, own_box.max + margin);

        for other in self.grid.candidates_excluding(id, &reach) {
            let pair = (id.min(other), id.max(other));
            if !self.tested.insert(pair) {
                continue;
            }
            let Some(other_box) = self.boxes.get(&other) else {
                continue;
            };
            if !reach.intersects(other_box) {
                continue;
            }
            let neighbour = scene.expect_fragment(other, "adjacency candidate")?;
            let (Some(other_collider), other_position) = (neighbour.collider, neighbour.position) else {
                return Err(ShatterError::MissingFragment {
                    fragment: other,
                    context: "adjacency candidate without collider",
                });
            };
            if !scene.physics.probe_penetrates(&probe, position, other_collider) {
                continue;
            }
            let own_collider = scene
                .expect_fragment(id, "adjacency scan")?
                .collider
                .ok_or(ShatterError::MissingFragment {
                    fragment: id,
                    context: "adjacency scan without collider",
                })?;
            let spec = JointSpec {
                anchor: (position + other_position) * 0.5,
                axis: (other_position - position).try_normalize().unwrap_or(Vec3::X),
                break_force: self.config.joint_break_force,
                min_angle_deg: self.config.joint_min_angle,
                max_angle_deg: self.config.joint_max_angle,
            };
            let Some(joint) = scene.physics.create_joint(own_collider, other_collider, spec) else {
                debug!("Physics refused a joint between {} and {}", id, other);
                continue;
            };
            self.graph.connect(id, other, joint)?;
            scene.register_joint(joint, target);
        }
        Ok(Phase::BuildingGraph { next: next + 1 })
    }

    fn detect_anchor<P: PhysicsWorld>(&mut self, scene: &Scene<P>, next: usize) -> ShatterResult<Phase> {
        let prepared = self.prepared()?;
        let Some(anchors) = prepared.anchors.as_ref() else {
            return Ok(Phase::Finalizing);
        };
        let Some(&id) = self.fragments.get(next) else {
            return Ok(Phase::Finalizing);
        };
        let collider = scene
            .expect_fragment(id, "anchor detection")?
            .collider
            .ok_or(ShatterError::MissingFragment {
                fragment: id,
                context: "anchor detection without collider",
            })?;
        if let Some(own_box) = scene.physics.aabb(collider) {
            let touches = anchors.iter().any(|&anchor| {
                scene.physics.aabb(anchor).is_some_and(|b| b.intersects(&own_box))
                    && scene.physics.penetrates(collider, anchor)
            });
            if touches {
                self.anchored.insert(id);
            }
        }
        Ok(Phase::DetectingAnchors { next: next + 1 })
    }

    fn finalize<P: PhysicsWorld>(&mut self, scene: &mut Scene<P>) -> ShatterResult<Phase> {
        let prepared = self.prepared()?;
        let target = prepared.target;
        let has_anchor_list = prepared.anchors.is_some();

        for &id in &self.fragments {
            let anchored = self.anchored.contains(&id);
            let fragment = scene.fragment_mut(id).ok_or(ShatterError::MissingFragment {
                fragment: id,
                context: "finalize",
            })?;
            fragment.visible = true;
            let Some(collider) = fragment.collider else {
                continue;
            };
            scene.physics.set_collisions_enabled(collider, true);
            let kind = if anchored { BodyKind::Kinematic } else { BodyKind::Dynamic };
            scene.physics.set_body_kind(collider, kind);
        }

        let mut graph = std::mem::take(&mut self.graph);
        graph.set_anchors(has_anchor_list.then(|| std::mem::take(&mut self.anchored)));
        graph.seal();
        let (edges, anchored) = (graph.graph().edge_count(), graph.initial_anchored_count());

        let body = scene
            .body_mut(target)
            .ok_or(ShatterError::UnknownBody { body: target })?;
        body.graph = Some(graph);
        body.status = BodyStatus::Standing;
        scene.retire_source(self.request.body);

        self.stats.fragmented_body = Some(target);
        info!(
            "Fragmented {} into {}: {} fragments, {} joints, {} anchored, {} rejected sites",
            self.request.body, target, self.stats.fragments, edges, anchored, self.stats.rejected_sites
        );
        Ok(Phase::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::ParryWorld;
    use crate::scene::{AnchorVolume, FragmentState, Release, SourceBody};
    use rand::SeedableRng;

    fn config() -> ShatterConfig {
        ShatterConfig {
            seed: Some(7),
            fragment: FragmentParams {
                sites_per_triangle: 4,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn run(scene: &mut Scene<ParryWorld>, request: FragmentRequest) -> ShatterResult<FragmentStats> {
        let mut task = FragmentTask::new(request, config(), StdRng::seed_from_u64(1));
        while task.step(scene, &FrameBudget::unlimited())? == Step::Yield {}
        Ok(task.stats().clone())
    }

    #[test]
    fn quad_wall_becomes_connected_anchored_body() {
        let mut scene = Scene::new(ParryWorld::new());
        let anchor = scene.add_anchor(AnchorVolume::axis_aligned(Vec3::new(0.0, -1.0, 0.0), Vec3::new(2.0, 0.2, 2.0)));
        let wall = scene.add_source(SourceBody::new("Wall", SourceMesh::quad(2.0, 2.0)).with_anchors([anchor]));

        let stats = run(&mut scene, FragmentRequest::new(wall)).unwrap();
        assert!(stats.is_done);
        assert!(stats.fragments > 2, "two triangles with 4 sites each, got {}", stats.fragments);
        assert!(scene.source(wall).is_none(), "source is retired");

        let body_id = stats.fragmented_body.unwrap();
        let body = scene.body(body_id).unwrap();
        assert_eq!(body.status, BodyStatus::Standing);
        let graph = body.graph.as_ref().unwrap();
        assert_eq!(graph.initial_fragment_count(), stats.fragments);
        assert!(graph.graph().edge_count() > 0);
        assert!(graph.initial_anchored_count() > 0, "bottom row touches the anchor");

        for id in graph.fragments() {
            let f = scene.fragment(id).unwrap();
            assert_eq!(f.state, FragmentState::Frozen);
            assert!(f.visible);
            let kind = scene.physics.body_kind(f.collider.unwrap());
            let expected = if graph.is_anchored(id) { BodyKind::Kinematic } else { BodyKind::Dynamic };
            assert_eq!(kind, Some(expected));
        }
    }

    #[test]
    fn body_without_anchor_list_has_no_anchor_set() {
        let mut scene = Scene::new(ParryWorld::new());
        let crate_id = scene.add_source(SourceBody::new("Crate", SourceMesh::quad(1.0, 1.0)));
        let stats = run(&mut scene, FragmentRequest::new(crate_id)).unwrap();
        let graph = scene.body(stats.fragmented_body.unwrap()).unwrap().graph.as_ref().unwrap();
        assert!(graph.anchors().is_none());
        assert!(!graph.has_anchors());
    }

    #[test]
    fn preconditions_are_fatal() {
        let mut scene = Scene::new(ParryWorld::new());
        assert!(matches!(
            run(&mut scene, FragmentRequest::new(BodyId(42))),
            Err(ShatterError::UnknownBody { .. })
        ));

        let mut hollow = SourceBody::new("Ghost", SourceMesh::quad(1.0, 1.0));
        hollow.mesh = None;
        let hollow = scene.add_source(hollow);
        assert!(matches!(
            run(&mut scene, FragmentRequest::new(hollow)),
            Err(ShatterError::MissingMesh { .. })
        ));

        let bare = scene.add_source(SourceBody::new("Bare", SourceMesh::quad(1.0, 1.0)).with_materials(0));
        assert!(matches!(
            run(&mut scene, FragmentRequest::new(bare)),
            Err(ShatterError::MissingMaterial { .. })
        ));

        let bad = scene.add_source(SourceBody::new("Bad", SourceMesh::quad(1.0, 1.0)));
        let request = FragmentRequest {
            params: Some(FragmentParams {
                min_thickness: 0.5,
                max_thickness: 0.1,
                ..Default::default()
            }),
            ..FragmentRequest::new(bad)
        };
        assert!(matches!(run(&mut scene, request), Err(ShatterError::InvalidParams { .. })));
    }

    #[test]
    fn inverted_contraction_range_fails_the_task() {
        let mut scene = Scene::new(ParryWorld::new());
        let slab = scene.add_source(SourceBody::new("Slab", SourceMesh::quad(1.0, 1.0)));
        let mut cfg = config();
        cfg.min_contraction = 0.3;
        cfg.max_contraction = 0.2;
        let mut task = FragmentTask::new(FragmentRequest::new(slab), cfg, StdRng::seed_from_u64(1));
        assert!(matches!(
            task.step(&mut scene, &FrameBudget::unlimited()),
            Err(ShatterError::InvalidParams { name: "max_contraction", .. })
        ));
        assert_eq!(scene.bodies().count(), 0);
        assert!(scene.source(slab).is_some());
    }

    #[test]
    fn failure_mid_build_discards_the_partial_body() {
        let mut scene = Scene::new(ParryWorld::new());
        let anchor = scene.add_anchor(AnchorVolume::axis_aligned(Vec3::new(0.0, -1.0, 0.0), Vec3::new(2.0, 0.2, 2.0)));
        let wall = scene.add_source(SourceBody::new("Wall", SourceMesh::quad(2.0, 2.0)).with_anchors([anchor]));
        let mut task = FragmentTask::new(FragmentRequest::new(wall), config(), StdRng::seed_from_u64(1));

        let zero = FrameBudget::start(std::time::Duration::ZERO);
        while task.stats().fragments == 0 {
            assert_eq!(task.step(&mut scene, &zero).unwrap(), Step::Yield);
        }
        let (body, victim) = scene
            .fragments()
            .find_map(|f| f.body.map(|b| (b, f.id)))
            .unwrap();
        assert_eq!(scene.body(body).unwrap().status, BodyStatus::Building);

        // Pull a fragment out from under the task so anchor detection fails.
        let release = Release {
            center: Vec3::ZERO,
            radius: 1.0,
            force: 1.0,
            sever_joints: false,
            dispose_after: (0.0, 0.0),
        };
        assert!(scene.release_fragment(victim, &release, &mut StdRng::seed_from_u64(2)).unwrap());
        assert_eq!(scene.advance(0.1), 1);

        let result = loop {
            match task.step(&mut scene, &FrameBudget::unlimited()) {
                Ok(Step::Yield) => continue,
                other => break other,
            }
        };
        assert!(matches!(result, Err(ShatterError::MissingFragment { .. })));
        assert!(task.is_done());
        assert!(scene.body(body).is_none(), "partial body is removed");
        assert_eq!(scene.fragments().count(), 0);
        assert_eq!(scene.physics.collider_count(), 1, "only the anchor is left");
        assert_eq!(scene.physics.joint_count(), 0);
        assert!(scene.source(wall).is_some(), "source stays for a retry");
    }

    #[test]
    fn material_slot_wraps_by_submesh() {
        let mut mesh = SourceMesh::quad(1.0, 1.0);
        mesh.submeshes = vec![vec![0, 1, 2], vec![0, 2, 3], vec![0, 1, 2]];
        let mut scene = Scene::new(ParryWorld::new());
        let id = scene.add_source(SourceBody::new("Tiles", mesh).with_materials(2));
        let stats = run(&mut scene, FragmentRequest::new(id)).unwrap();
        let slots: HashSet<usize> = scene
            .fragments()
            .filter(|f| f.body == stats.fragmented_body)
            .map(|f| f.material)
            .collect();
        assert_eq!(slots, HashSet::from([0, 1]));
    }
}

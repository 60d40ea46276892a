//! Scene arena shared by the pipelines.
//!
//! The scene owns everything a task mutates: source bodies waiting to be
//! fragmented, fragmented bodies with their graphs, fragments, anchor
//! volumes, the configuration hierarchy and the physics world. Everything is
//! addressed by id; fragments know the body that currently owns them but
//! never hold a reference to its graph.
//!
//! Besides storage the scene runs the two per-frame chores of fragments:
//! delayed disposal ([`Scene::advance`]) and the joint-break listener
//! ([`Scene::process_joint_breaks`]).

use crate::config::{resolve_params, FragmentParams};
use crate::error::{ShatterError, ShatterResult};
use crate::geometry::{Mesh, Solid, Vertex};
use crate::graph::FragmentGraph;
use crate::physics::{Aabb, BodyKind, ColliderHandle, Drag, JointHandle, PhysicsWorld};
use bevy::log::debug;
use bevy::math::{Affine3A, Quat, Vec2, Vec3};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ── Ids ───────────────────────────────────────────────────────────────────────

macro_rules! scene_id {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, " #{}"), self.0)
            }
        }
    };
}

scene_id!(BodyId, "body");
scene_id!(FragmentId, "fragment");
scene_id!(GroupId, "group");
scene_id!(AnchorId, "anchor");

// ── Source bodies ─────────────────────────────────────────────────────────────

/// Mesh data of a body before fragmentation, in body space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMesh {
    pub positions: Vec<Vec3>,
    /// May be empty; missing normals read as zero.
    pub normals: Vec<Vec3>,
    /// May be empty; missing UVs read as zero.
    pub uvs: Vec<Vec2>,
    /// Triangle index lists, one per material slot.
    pub submeshes: Vec<Vec<u32>>,
}

impl SourceMesh {
    /// Axis-aligned box centred on the origin with outward faces.
    pub fn cuboid(half_extents: Vec3) -> Self {
        // (normal, u, v) with u × v = normal
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (-Vec3::Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, Vec3::Y, Vec3::X),
        ];
        let mut mesh = SourceMesh {
            submeshes: vec![Vec::with_capacity(36)],
            ..Default::default()
        };
        for (face, (n, u, v)) in faces.into_iter().enumerate() {
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                mesh.positions.push((n + u * su + v * sv) * half_extents);
                mesh.normals.push(n);
                mesh.uvs.push(Vec2::new((su + 1.0) * 0.5, (sv + 1.0) * 0.5));
            }
            let base = 4 * face as u32;
            mesh.submeshes[0].extend([base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// `width × height` rectangle in the XY plane facing +Z.
    pub fn quad(width: f32, height: f32) -> Self {
        let (hw, hh) = (width * 0.5, height * 0.5);
        SourceMesh {
            positions: vec![
                Vec3::new(-hw, -hh, 0.0),
                Vec3::new(hw, -hh, 0.0),
                Vec3::new(hw, hh, 0.0),
                Vec3::new(-hw, hh, 0.0),
            ],
            normals: vec![Vec3::Z; 4],
            uvs: vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y],
            submeshes: vec![vec![0, 1, 2, 0, 2, 3]],
        }
    }

    pub fn triangle_count(&self, submesh: usize) -> usize {
        self.submeshes.get(submesh).map_or(0, |s| s.len() / 3)
    }

    /// Every index list must be whole triangles referencing existing vertices.
    pub fn validate(&self) -> ShatterResult<()> {
        let count = self.positions.len();
        for indices in &self.submeshes {
            if indices.len() % 3 != 0 || indices.iter().any(|&i| i as usize >= count) {
                return Err(ShatterError::InvalidMesh {
                    context: "source submesh indices",
                    vertex_count: count,
                });
            }
        }
        Ok(())
    }

    /// Triangle `index` of `submesh` transformed to world space.
    pub fn world_triangle(
        &self,
        submesh: usize,
        index: usize,
        placement: &Affine3A,
    ) -> ShatterResult<[Vertex; 3]> {
        let indices = self
            .submeshes
            .get(submesh)
            .and_then(|s| s.get(3 * index..3 * index + 3))
            .ok_or(ShatterError::InvalidMesh {
                context: "triangle lookup",
                vertex_count: self.positions.len(),
            })?;
        let normal_matrix = placement.matrix3.inverse().transpose();
        let mut corners = [Vertex::default(); 3];
        for (corner, &i) in corners.iter_mut().zip(indices) {
            let i = i as usize;
            let position = *self.positions.get(i).ok_or(ShatterError::InvalidMesh {
                context: "triangle vertex",
                vertex_count: self.positions.len(),
            })?;
            let normal = self.normals.get(i).copied().unwrap_or(Vec3::ZERO);
            *corner = Vertex {
                position: placement.transform_point3(position),
                normal: (normal_matrix * normal).normalize_or_zero(),
                uv: self.uvs.get(i).copied().unwrap_or(Vec2::ZERO),
            };
        }
        Ok(corners)
    }
}

/// A body that can be fragmented.
#[derive(Debug, Clone)]
pub struct SourceBody {
    pub name: String,
    pub mesh: Option<SourceMesh>,
    pub material_count: usize,
    pub placement: Affine3A,
    pub params: Option<FragmentParams>,
    pub group: Option<GroupId>,
    pub anchors: Vec<AnchorId>,
}

impl SourceBody {
    pub fn new(name: impl Into<String>, mesh: SourceMesh) -> Self {
        Self {
            name: name.into(),
            mesh: Some(mesh),
            material_count: 1,
            placement: Affine3A::IDENTITY,
            params: None,
            group: None,
            anchors: Vec::new(),
        }
    }

    pub fn with_placement(mut self, placement: Affine3A) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_params(mut self, params: FragmentParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_materials(mut self, count: usize) -> Self {
        self.material_count = count;
        self
    }

    pub fn in_group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_anchors(mut self, anchors: impl IntoIterator<Item = AnchorId>) -> Self {
        self.anchors = anchors.into_iter().collect();
        self
    }
}

/// A node of the configuration hierarchy.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub name: String,
    pub parent: Option<GroupId>,
    pub params: Option<FragmentParams>,
    pub anchors: Vec<AnchorId>,
}

/// Load-bearing oriented box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorVolume {
    pub center: Vec3,
    pub rotation: Quat,
    pub half_extents: Vec3,
}

impl AnchorVolume {
    pub fn axis_aligned(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            center,
            rotation: Quat::IDENTITY,
            half_extents,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    volume: AnchorVolume,
    collider: ColliderHandle,
}

// ── Fragments ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    /// Part of a standing structure.
    Frozen,
    /// Released and falling; disposed after a delay.
    Moving,
    /// Removed from the physics world.
    Destroyed,
}

#[derive(Debug, Clone)]
pub struct Fragment {
    pub id: FragmentId,
    pub label: String,
    /// Body that currently owns the fragment; cleared on release.
    pub body: Option<BodyId>,
    /// Positions relative to `position`.
    pub mesh: Mesh,
    /// World-space pivot (estimated centroid).
    pub position: Vec3,
    pub volume: f32,
    pub mass: f32,
    pub material: usize,
    pub state: FragmentState,
    pub visible: bool,
    /// Whether joint breaks involving this fragment reach the graph.
    pub listening: bool,
    pub collider: Option<ColliderHandle>,
    /// Scene time at which a moving fragment is disposed.
    pub dispose_at: Option<f32>,
}

/// How a frozen fragment is let go.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Release {
    pub center: Vec3,
    pub radius: f32,
    pub force: f32,
    /// Also cut every joint still attached to the fragment.
    pub sever_joints: bool,
    /// Disposal delay window in seconds.
    pub dispose_after: (f32, f32),
}

// ── Fragmented bodies ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStatus {
    /// A fragmentation task is still building it.
    Building,
    /// Fragments are connected and (possibly) anchored.
    Standing,
    /// Collapsed; the graph has been released.
    Destroyed,
}

#[derive(Debug, Clone)]
pub struct FragmentedBody {
    pub name: String,
    pub params: FragmentParams,
    pub group: Option<GroupId>,
    pub status: BodyStatus,
    /// Every fragment ever created for this body.
    pub fragments: Vec<FragmentId>,
    /// Present only while the body is standing.
    pub graph: Option<FragmentGraph>,
}

impl FragmentedBody {
    pub fn is_destroyed(&self) -> bool {
        self.status == BodyStatus::Destroyed
    }
}

// ── Scene ─────────────────────────────────────────────────────────────────────

pub struct Scene<P> {
    pub physics: P,
    sources: BTreeMap<BodyId, SourceBody>,
    bodies: BTreeMap<BodyId, FragmentedBody>,
    groups: BTreeMap<GroupId, Group>,
    anchors: BTreeMap<AnchorId, Anchor>,
    fragments: BTreeMap<FragmentId, Fragment>,
    owners: HashMap<ColliderHandle, FragmentId>,
    joint_bodies: HashMap<JointHandle, BodyId>,
    pending_breaks: Vec<JointHandle>,
    joint_removals: Vec<(f32, JointHandle)>,
    clock: f32,
    next_id: u32,
}

impl<P: PhysicsWorld> Scene<P> {
    pub fn new(physics: P) -> Self {
        Self {
            physics,
            sources: BTreeMap::new(),
            bodies: BTreeMap::new(),
            groups: BTreeMap::new(),
            anchors: BTreeMap::new(),
            fragments: BTreeMap::new(),
            owners: HashMap::new(),
            joint_bodies: HashMap::new(),
            pending_breaks: Vec::new(),
            joint_removals: Vec::new(),
            clock: 0.0,
            next_id: 0,
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Seconds advanced through [`Scene::advance`].
    pub fn clock(&self) -> f32 {
        self.clock
    }

    pub fn add_group(&mut self, group: Group) -> GroupId {
        let id = GroupId(self.allocate());
        self.groups.insert(id, group);
        id
    }

    pub fn add_anchor(&mut self, volume: AnchorVolume) -> AnchorId {
        let collider = self
            .physics
            .insert_box(volume.center, volume.rotation, volume.half_extents);
        let id = AnchorId(self.allocate());
        self.anchors.insert(id, Anchor { volume, collider });
        id
    }

    pub fn anchor_volume(&self, id: AnchorId) -> Option<AnchorVolume> {
        self.anchors.get(&id).map(|a| a.volume)
    }

    pub fn add_source(&mut self, body: SourceBody) -> BodyId {
        let id = BodyId(self.allocate());
        self.sources.insert(id, body);
        id
    }

    pub fn source(&self, id: BodyId) -> Option<&SourceBody> {
        self.sources.get(&id)
    }

    pub fn retire_source(&mut self, id: BodyId) -> Option<SourceBody> {
        self.sources.remove(&id)
    }

    pub fn body(&self, id: BodyId) -> Option<&FragmentedBody> {
        self.bodies.get(&id)
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut FragmentedBody> {
        self.bodies.get_mut(&id)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyId, &FragmentedBody)> {
        self.bodies.iter().map(|(id, body)| (*id, body))
    }

    /// Register a fragmented body that is still being built.
    pub fn begin_body(&mut self, name: String, params: FragmentParams, group: Option<GroupId>) -> BodyId {
        let id = BodyId(self.allocate());
        self.bodies.insert(
            id,
            FragmentedBody {
                name,
                params,
                group,
                status: BodyStatus::Building,
                fragments: Vec::new(),
                graph: None,
            },
        );
        id
    }

    pub fn fragment(&self, id: FragmentId) -> Option<&Fragment> {
        self.fragments.get(&id)
    }

    pub fn fragment_mut(&mut self, id: FragmentId) -> Option<&mut Fragment> {
        self.fragments.get_mut(&id)
    }

    /// Fragment record that the caller requires to exist.
    pub fn expect_fragment(&self, id: FragmentId, context: &'static str) -> ShatterResult<&Fragment> {
        self.fragments
            .get(&id)
            .ok_or(ShatterError::MissingFragment { fragment: id, context })
    }

    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.values()
    }

    pub fn owner_of(&self, collider: ColliderHandle) -> Option<FragmentId> {
        self.owners.get(&collider).copied()
    }

    pub fn fragment_aabb(&self, id: FragmentId) -> Option<Aabb> {
        self.physics.aabb(self.fragments.get(&id)?.collider?)
    }

    /// Bounds of the fragments still attached to `body`.
    pub fn body_bounds(&self, body: BodyId) -> Option<Aabb> {
        let body = self.bodies.get(&body)?;
        body.graph
            .as_ref()?
            .fragments()
            .into_iter()
            .filter_map(|id| self.fragment_aabb(id))
            .reduce(|a, b| a.merged(&b))
    }

    /// Parameters for fragmenting `body`: the override, the body's own, the
    /// nearest group's, then `fallback`.
    pub fn resolve_params(
        &self,
        body: BodyId,
        override_params: Option<&FragmentParams>,
        fallback: &FragmentParams,
    ) -> ShatterResult<FragmentParams> {
        let source = self.sources.get(&body).ok_or(ShatterError::UnknownBody { body })?;
        let ancestors = self.group_chain(source.group).map(|g| g.params.as_ref());
        Ok(resolve_params(
            [override_params, source.params.as_ref()]
                .into_iter()
                .chain(ancestors)
                .chain(std::iter::once(Some(fallback))),
        ))
    }

    /// Anchor colliders for `body`: its own list, else the nearest group's.
    /// `None` when nothing up the chain lists any anchors.
    pub fn anchors_for(&self, body: BodyId) -> Option<Vec<ColliderHandle>> {
        let source = self.sources.get(&body)?;
        let lists = std::iter::once(&source.anchors)
            .chain(self.group_chain(source.group).map(|g| &g.anchors));
        for list in lists {
            let colliders: Vec<_> = list
                .iter()
                .filter_map(|id| self.anchors.get(id).map(|a| a.collider))
                .collect();
            if !colliders.is_empty() {
                return Some(colliders);
            }
        }
        None
    }

    /// Groups from `start` up to the root. Stops on cycles.
    fn group_chain(&self, start: Option<GroupId>) -> impl Iterator<Item = &Group> {
        let mut next = start;
        let mut remaining = self.groups.len();
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            remaining -= 1;
            let group = self.groups.get(&next?)?;
            next = group.parent;
            Some(group)
        })
    }

    /// Create a frozen, hidden fragment for `body`. Returns `None` when the
    /// physics world refuses the hull.
    pub fn spawn_fragment(
        &mut self,
        body: BodyId,
        solid: Solid,
        material: usize,
        density: f32,
    ) -> Option<FragmentId> {
        let mass = density * solid.volume;
        let collider = self
            .physics
            .insert_convex(&solid.mesh.hull_points(), solid.pivot, mass)?;
        let id = FragmentId(self.allocate());
        let ordinal = self.bodies.get(&body).map_or(0, |b| b.fragments.len());
        self.fragments.insert(
            id,
            Fragment {
                id,
                label: format!("FrozenFragment{ordinal}"),
                body: Some(body),
                mesh: solid.mesh,
                position: solid.pivot,
                volume: solid.volume,
                mass,
                material,
                state: FragmentState::Frozen,
                visible: false,
                listening: true,
                collider: Some(collider),
                dispose_at: None,
            },
        );
        self.owners.insert(collider, id);
        if let Some(b) = self.bodies.get_mut(&body) {
            b.fragments.push(id);
        }
        Some(id)
    }

    /// Remove a body together with its fragments, colliders and joints.
    /// Returns the number of fragments dropped.
    pub fn discard_body(&mut self, id: BodyId) -> usize {
        let Some(body) = self.bodies.remove(&id) else {
            return 0;
        };
        let physics = &mut self.physics;
        self.joint_bodies.retain(|joint, owner| {
            if *owner == id {
                physics.remove_joint(*joint);
                false
            } else {
                true
            }
        });
        for fragment_id in &body.fragments {
            let Some(fragment) = self.fragments.remove(fragment_id) else {
                continue;
            };
            if let Some(collider) = fragment.collider {
                self.physics.remove_collider(collider);
                self.owners.remove(&collider);
            }
        }
        body.fragments.len()
    }

    /// Remember which body a joint belongs to, for the break listener.
    pub fn register_joint(&mut self, joint: JointHandle, body: BodyId) {
        self.joint_bodies.insert(joint, body);
    }

    /// Remove a joint from the physics world now.
    pub fn remove_joint(&mut self, joint: JointHandle) {
        self.joint_bodies.remove(&joint);
        self.physics.remove_joint(joint);
    }

    /// Remove a joint from the physics world once `delay` seconds have passed.
    pub fn remove_joint_later(&mut self, joint: JointHandle, delay: f32) {
        self.joint_bodies.remove(&joint);
        self.joint_removals.push((self.clock + delay.max(0.0), joint));
    }

    /// Let a frozen fragment go: it becomes dynamic, takes the explosion
    /// impulse, stops listening for joint breaks, leaves its body and is
    /// scheduled for disposal. Fragments that are not frozen are left alone
    /// and `Ok(false)` is returned.
    pub fn release_fragment<R: Rng + ?Sized>(
        &mut self,
        id: FragmentId,
        release: &Release,
        rng: &mut R,
    ) -> ShatterResult<bool> {
        let clock = self.clock;
        let fragment = self
            .fragments
            .get_mut(&id)
            .ok_or(ShatterError::MissingFragment {
                fragment: id,
                context: "release fragment",
            })?;
        if fragment.state != FragmentState::Frozen {
            return Ok(false);
        }
        let collider = fragment.collider.ok_or(ShatterError::MissingFragment {
            fragment: id,
            context: "release fragment without collider",
        })?;
        let (lo, hi) = release.dispose_after;
        fragment.state = FragmentState::Moving;
        fragment.label = fragment.label.replacen("Frozen", "Moving", 1);
        fragment.listening = false;
        fragment.body = None;
        fragment.visible = true;
        fragment.dispose_at = Some(clock + rng.gen_range(lo.min(hi)..=hi.max(lo)));

        self.physics.set_body_kind(collider, BodyKind::Dynamic);
        self.physics.set_collisions_enabled(collider, true);
        self.physics.set_drag(collider, Drag::NONE);
        self.physics
            .apply_explosion_force(collider, release.force, release.center, release.radius);
        if release.sever_joints {
            for joint in self.physics.joints_of(collider) {
                self.remove_joint(joint);
            }
        }
        Ok(true)
    }

    /// Advance the scene clock: dispose of fragments whose delay elapsed and
    /// perform due joint removals. Returns the number of fragments disposed.
    pub fn advance(&mut self, dt: f32) -> usize {
        self.clock += dt.max(0.0);
        let now = self.clock;

        let physics = &mut self.physics;
        self.joint_removals.retain(|(due, joint)| {
            if *due <= now {
                physics.remove_joint(*joint);
                false
            } else {
                true
            }
        });

        let mut disposed = 0;
        for fragment in self.fragments.values_mut() {
            if fragment.state != FragmentState::Moving || fragment.dispose_at.is_none_or(|t| t > now) {
                continue;
            }
            if let Some(collider) = fragment.collider.take() {
                self.physics.remove_collider(collider);
                self.owners.remove(&collider);
            }
            fragment.state = FragmentState::Destroyed;
            fragment.visible = false;
            fragment.dispose_at = None;
            disposed += 1;
        }
        if disposed > 0 {
            debug!("Disposed {} fragments at t={:.2}s", disposed, now);
        }
        disposed
    }

    /// Joint-break listener. Breaks reported by the physics world are queued
    /// and applied on the following call, removing the matching graph edge
    /// when the joint is really gone. Returns the number of edges removed.
    pub fn process_joint_breaks(&mut self) -> usize {
        let mut severed = 0;
        for joint in std::mem::take(&mut self.pending_breaks) {
            if self.physics.contains_joint(joint) {
                continue;
            }
            let Some(body) = self.joint_bodies.remove(&joint) else {
                continue;
            };
            let graph = self.bodies.get_mut(&body).and_then(|b| b.graph.as_mut());
            if graph.and_then(|g| g.sever_joint(joint)).is_some() {
                severed += 1;
            }
        }

        for joint in self.physics.drain_broken_joints() {
            let Some(body) = self.joint_bodies.get(&joint) else {
                continue;
            };
            let endpoints = self
                .bodies
                .get(body)
                .and_then(|b| b.graph.as_ref())
                .and_then(|g| g.endpoints(joint));
            let listening = endpoints.is_some_and(|(a, b)| {
                [a, b]
                    .iter()
                    .any(|id| self.fragments.get(id).is_some_and(|f| f.listening))
            });
            if listening {
                self.pending_breaks.push(joint);
            }
        }
        severed
    }
}

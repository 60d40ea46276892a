//! `parry3d`-backed physics collaborator.
//!
//! Shapes, bounding boxes and intersection tests come from parry. There is no
//! solver: explosion impulses change a body's velocity directly and a joint
//! breaks when an impulse applied to either endpoint exceeds its break force.
//! That is enough for the pipelines, which only need queries, impulses and
//! break events.

use super::{Aabb, BodyKind, ColliderHandle, Drag, JointHandle, JointSpec, PhysicsWorld};
use crate::constants::{FRAGMENT_ANGULAR_DRAG, FRAGMENT_LINEAR_DRAG};
use bevy::log::debug;
use bevy::math::{Quat, Vec3};
use parry3d::math::{Isometry, Point, Real};
use parry3d::na::{Quaternion, Translation3, UnitQuaternion};
use parry3d::query;
use parry3d::shape::{Ball, SharedShape};
use std::collections::BTreeMap;

struct Body {
    shape: SharedShape,
    position: Vec3,
    rotation: Quat,
    kind: BodyKind,
    collisions: bool,
    mass: f32,
    drag: Drag,
    linvel: Vec3,
}

impl Body {
    fn isometry(&self) -> Isometry<Real> {
        isometry(self.position, self.rotation)
    }
}

#[derive(Debug, Clone, Copy)]
struct Joint {
    a: ColliderHandle,
    b: ColliderHandle,
    spec: JointSpec,
}

/// Query-only physics world built on parry3d shapes.
#[derive(Default)]
pub struct ParryWorld {
    bodies: BTreeMap<ColliderHandle, Body>,
    joints: BTreeMap<JointHandle, Joint>,
    broken: Vec<JointHandle>,
    next_collider: u32,
    next_joint: u32,
}

fn isometry(position: Vec3, rotation: Quat) -> Isometry<Real> {
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
        rotation.w, rotation.x, rotation.y, rotation.z,
    ));
    Isometry::from_parts(Translation3::new(position.x, position.y, position.z), rotation)
}

fn to_points(points: &[Vec3]) -> Vec<Point<Real>> {
    points.iter().map(|p| Point::new(p.x, p.y, p.z)).collect()
}

impl ParryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_body(&mut self, body: Body) -> ColliderHandle {
        let handle = ColliderHandle(self.next_collider);
        self.next_collider += 1;
        self.bodies.insert(handle, body);
        handle
    }

    /// Break a joint as if the solver had exceeded its threshold.
    pub fn break_joint(&mut self, joint: JointHandle) -> bool {
        if self.joints.remove(&joint).is_some() {
            self.broken.push(joint);
            true
        } else {
            false
        }
    }

    pub fn velocity(&self, collider: ColliderHandle) -> Option<Vec3> {
        self.bodies.get(&collider).map(|b| b.linvel)
    }

    pub fn body_kind(&self, collider: ColliderHandle) -> Option<BodyKind> {
        self.bodies.get(&collider).map(|b| b.kind)
    }

    pub fn collisions_enabled(&self, collider: ColliderHandle) -> Option<bool> {
        self.bodies.get(&collider).map(|b| b.collisions)
    }

    pub fn drag(&self, collider: ColliderHandle) -> Option<Drag> {
        self.bodies.get(&collider).map(|b| b.drag)
    }

    pub fn contains_collider(&self, collider: ColliderHandle) -> bool {
        self.bodies.contains_key(&collider)
    }

    pub fn collider_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }
}

impl PhysicsWorld for ParryWorld {
    fn insert_convex(&mut self, points: &[Vec3], position: Vec3, mass: f32) -> Option<ColliderHandle> {
        if points.len() < 4 {
            debug!("Rejected hull with only {} points", points.len());
            return None;
        }
        let Some(shape) = SharedShape::convex_hull(&to_points(points)) else {
            debug!("Rejected degenerate hull with {} points", points.len());
            return None;
        };
        Some(self.insert_body(Body {
            shape,
            position,
            rotation: Quat::IDENTITY,
            kind: BodyKind::Kinematic,
            collisions: false,
            mass,
            drag: Drag {
                linear: FRAGMENT_LINEAR_DRAG,
                angular: FRAGMENT_ANGULAR_DRAG,
            },
            linvel: Vec3::ZERO,
        }))
    }

    fn insert_box(&mut self, center: Vec3, rotation: Quat, half_extents: Vec3) -> ColliderHandle {
        let he = half_extents.abs();
        self.insert_body(Body {
            shape: SharedShape::cuboid(he.x, he.y, he.z),
            position: center,
            rotation,
            kind: BodyKind::Kinematic,
            collisions: true,
            mass: 0.0,
            drag: Drag::NONE,
            linvel: Vec3::ZERO,
        })
    }

    fn remove_collider(&mut self, collider: ColliderHandle) {
        if self.bodies.remove(&collider).is_some() {
            self.joints.retain(|_, j| j.a != collider && j.b != collider);
        }
    }

    fn aabb(&self, collider: ColliderHandle) -> Option<Aabb> {
        let body = self.bodies.get(&collider)?;
        let aabb = body.shape.compute_aabb(&body.isometry());
        Some(Aabb::new(
            Vec3::new(aabb.mins.x, aabb.mins.y, aabb.mins.z),
            Vec3::new(aabb.maxs.x, aabb.maxs.y, aabb.maxs.z),
        ))
    }

    fn overlap_sphere(&self, center: Vec3, radius: f32) -> Vec<ColliderHandle> {
        let ball = Ball::new(radius);
        let ball_pos = isometry(center, Quat::IDENTITY);
        self.bodies
            .iter()
            .filter(|(_, body)| body.collisions)
            .filter(|(_, body)| {
                query::intersection_test(&ball_pos, &ball, &body.isometry(), &*body.shape)
                    .unwrap_or(false)
            })
            .map(|(handle, _)| *handle)
            .collect()
    }

    fn penetrates(&self, a: ColliderHandle, b: ColliderHandle) -> bool {
        let (Some(a), Some(b)) = (self.bodies.get(&a), self.bodies.get(&b)) else {
            return false;
        };
        query::intersection_test(&a.isometry(), &*a.shape, &b.isometry(), &*b.shape).unwrap_or(false)
    }

    fn probe_penetrates(&self, points: &[Vec3], position: Vec3, other: ColliderHandle) -> bool {
        let Some(other) = self.bodies.get(&other) else {
            return false;
        };
        if points.len() < 4 {
            return false;
        }
        let Some(probe) = SharedShape::convex_hull(&to_points(points)) else {
            return false;
        };
        query::intersection_test(
            &isometry(position, Quat::IDENTITY),
            &*probe,
            &other.isometry(),
            &*other.shape,
        )
        .unwrap_or(false)
    }

    fn set_body_kind(&mut self, collider: ColliderHandle, kind: BodyKind) {
        if let Some(body) = self.bodies.get_mut(&collider) {
            body.kind = kind;
            if kind == BodyKind::Kinematic {
                body.linvel = Vec3::ZERO;
            }
        }
    }

    fn set_collisions_enabled(&mut self, collider: ColliderHandle, enabled: bool) {
        if let Some(body) = self.bodies.get_mut(&collider) {
            body.collisions = enabled;
        }
    }

    fn set_drag(&mut self, collider: ColliderHandle, drag: Drag) {
        if let Some(body) = self.bodies.get_mut(&collider) {
            body.drag = drag;
        }
    }

    fn apply_explosion_force(&mut self, collider: ColliderHandle, force: f32, center: Vec3, radius: f32) {
        let Some(body) = self.bodies.get_mut(&collider) else {
            return;
        };
        if body.kind != BodyKind::Dynamic || radius <= 0.0 {
            return;
        }
        let offset = body.position - center;
        let distance = offset.length();
        if distance > radius {
            return;
        }
        let direction = offset.try_normalize().unwrap_or(Vec3::Y);
        let impulse = direction * force * (1.0 - distance / radius);
        body.linvel += impulse / body.mass.max(f32::EPSILON);

        let magnitude = impulse.length();
        let snapped: Vec<JointHandle> = self
            .joints
            .iter()
            .filter(|(_, j)| (j.a == collider || j.b == collider) && magnitude > j.spec.break_force)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in snapped {
            self.break_joint(handle);
        }
    }

    fn create_joint(&mut self, a: ColliderHandle, b: ColliderHandle, spec: JointSpec) -> Option<JointHandle> {
        if a == b || !self.bodies.contains_key(&a) || !self.bodies.contains_key(&b) {
            return None;
        }
        let handle = JointHandle(self.next_joint);
        self.next_joint += 1;
        self.joints.insert(handle, Joint { a, b, spec });
        Some(handle)
    }

    fn remove_joint(&mut self, joint: JointHandle) {
        self.joints.remove(&joint);
    }

    fn contains_joint(&self, joint: JointHandle) -> bool {
        self.joints.contains_key(&joint)
    }

    fn joints_of(&self, collider: ColliderHandle) -> Vec<JointHandle> {
        self.joints
            .iter()
            .filter(|(_, j)| j.a == collider || j.b == collider)
            .map(|(handle, _)| *handle)
            .collect()
    }

    fn drain_broken_joints(&mut self) -> Vec<JointHandle> {
        std::mem::take(&mut self.broken)
    }
}

//! Physics collaborator interface.
//!
//! Fragmentation and destruction never integrate rigid bodies themselves.
//! They ask a [`PhysicsWorld`] for overlap and penetration queries, impulses
//! and breakable joints. Handles are opaque; a handle the world no longer
//! knows is treated as "no effect" by every method.
//!
//! [`ParryWorld`] is the reference implementation used by the plugin and the
//! tests.

mod parry_world;

pub use parry_world::ParryWorld;

use bevy::math::{Quat, Vec3};

/// Opaque collider handle issued by a [`PhysicsWorld`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColliderHandle(pub u32);

/// Opaque joint handle issued by a [`PhysicsWorld`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointHandle(pub u32);

/// Whether a body is moved by the solver or held in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Kinematic,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drag {
    pub linear: f32,
    pub angular: f32,
}

impl Drag {
    pub const NONE: Drag = Drag {
        linear: 0.0,
        angular: 0.0,
    };
}

/// Parameters of a breakable hinge between two fragments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointSpec {
    /// World-space anchor point.
    pub anchor: Vec3,
    /// Hinge axis (unit length).
    pub axis: Vec3,
    /// Impulse above which the joint breaks and a break event is raised.
    pub break_force: f32,
    pub min_angle_deg: f32,
    pub max_angle_deg: f32,
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Tightest box around `points`, or `None` for an empty slice.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;
        Some(points.iter().fold(Self::new(first, first), |acc, p| Self {
            min: acc.min.min(*p),
            max: acc.max.max(*p),
        }))
    }

    /// Boxes that merely touch count as intersecting.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

/// Everything the pipelines need from a physics engine.
pub trait PhysicsWorld {
    /// Insert a kinematic convex body whose shape is the hull of `points`
    /// (relative to `position`). Collisions start disabled. Returns `None`
    /// when the hull is degenerate.
    fn insert_convex(&mut self, points: &[Vec3], position: Vec3, mass: f32) -> Option<ColliderHandle>;

    /// Insert a static oriented box (anchor volume).
    fn insert_box(&mut self, center: Vec3, rotation: Quat, half_extents: Vec3) -> ColliderHandle;

    /// Remove a collider and every joint attached to it.
    fn remove_collider(&mut self, collider: ColliderHandle);

    fn aabb(&self, collider: ColliderHandle) -> Option<Aabb>;

    /// Colliders with collisions enabled that intersect the sphere.
    fn overlap_sphere(&self, center: Vec3, radius: f32) -> Vec<ColliderHandle>;

    /// Exact intersection test between two colliders.
    fn penetrates(&self, a: ColliderHandle, b: ColliderHandle) -> bool;

    /// Exact intersection test between an ad-hoc convex probe and a collider.
    fn probe_penetrates(&self, points: &[Vec3], position: Vec3, other: ColliderHandle) -> bool;

    fn set_body_kind(&mut self, collider: ColliderHandle, kind: BodyKind);

    fn set_collisions_enabled(&mut self, collider: ColliderHandle, enabled: bool);

    fn set_drag(&mut self, collider: ColliderHandle, drag: Drag);

    /// Push a dynamic body away from `center` with a strength falling off
    /// linearly to zero at `radius`.
    fn apply_explosion_force(&mut self, collider: ColliderHandle, force: f32, center: Vec3, radius: f32);

    fn create_joint(&mut self, a: ColliderHandle, b: ColliderHandle, spec: JointSpec) -> Option<JointHandle>;

    fn remove_joint(&mut self, joint: JointHandle);

    fn contains_joint(&self, joint: JointHandle) -> bool;

    /// Joints attached to `collider`.
    fn joints_of(&self, collider: ColliderHandle) -> Vec<JointHandle>;

    /// Joints broken since the last call, in break order.
    fn drain_broken_joints(&mut self) -> Vec<JointHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_boxes_intersect() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let c = Aabb::new(Vec3::splat(1.5), Vec3::splat(2.0));
        assert!(a.intersects(&b), "shared face must count as overlap");
        assert!(!a.intersects(&c));
    }

    #[test]
    fn aabb_from_points_bounds_all_points() {
        let pts = [Vec3::new(1.0, -2.0, 0.5), Vec3::new(-1.0, 3.0, 0.0)];
        let aabb = Aabb::from_points(&pts).unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 3.0, 0.5));
        assert!(Aabb::from_points(&[]).is_none());
    }
}

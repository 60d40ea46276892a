//! Pure geometry used by the fragmentation pipeline.
//!
//! - [`voronoi`]: random sites inside a triangle, their Voronoi cells clipped
//!   to the triangle, and barycentric attribute interpolation.
//! - [`solid`]: extrusion of a clipped cell into a closed frustum mesh and
//!   the matching volume/centroid estimate.
//!
//! Nothing here touches physics or scene state.

pub mod solid;
pub mod voronoi;

pub use solid::{estimate_volume_and_center, extrude_polygon_to_solid, Solid};
pub use voronoi::{generate_cells_for_triangle, ClippedCell, SiteCount, TriangleCells, VoronoiOptions};

use bevy::math::{Vec2, Vec3};

/// One corner of a source triangle or clipped cell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

/// Indexed triangle mesh. Front faces wind counter-clockwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Mean of all vertex positions.
    pub fn vertex_centroid(&self) -> Vec3 {
        centroid(&self.positions)
    }

    /// Copy of the mesh with positions scaled by `factor` about the vertex centroid.
    pub fn scaled_about_centroid(&self, factor: f32) -> Mesh {
        let center = self.vertex_centroid();
        Mesh {
            positions: self
                .positions
                .iter()
                .map(|p| center + (*p - center) * factor)
                .collect(),
            ..self.clone()
        }
    }

    /// Distinct positions, in first-seen order. Input for convex hulls.
    pub fn hull_points(&self) -> Vec<Vec3> {
        let mut unique: Vec<Vec3> = Vec::with_capacity(self.positions.len() / 3);
        for p in &self.positions {
            if !unique.iter().any(|q| q.distance_squared(*p) <= f32::EPSILON) {
                unique.push(*p);
            }
        }
        unique
    }

    /// Axis-aligned bounds in mesh space.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.positions.first()?;
        Some(
            self.positions
                .iter()
                .fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p))),
        )
    }
}

/// Mean of `points`, or zero for an empty slice.
pub fn centroid(points: &[Vec3]) -> Vec3 {
    if points.is_empty() {
        return Vec3::ZERO;
    }
    points.iter().copied().sum::<Vec3>() / points.len() as f32
}

/// Newell normal of a planar polygon, scaled by twice its area.
fn newell(points: &[Vec3]) -> Vec3 {
    let n = points.len();
    (0..n).fold(Vec3::ZERO, |acc, i| acc + points[i].cross(points[(i + 1) % n]))
}

/// Area of a planar polygon in 3D (either winding).
pub fn polygon_area(points: &[Vec3]) -> f32 {
    newell(points).length() * 0.5
}

/// Unit normal of a planar polygon following its winding, or zero when degenerate.
pub fn polygon_normal(points: &[Vec3]) -> Vec3 {
    newell(points).normalize_or_zero()
}

pub fn triangle_area(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    (b - a).cross(c - a).length() * 0.5
}

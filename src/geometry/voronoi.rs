//! Triangle-local Voronoi subdivision.
//!
//! The triangle is scaled by a constant, rotated flat onto the XY plane and
//! sampled with random sites. Each site's cell is the triangle cut by the
//! perpendicular bisector against every other site that can still reach it.
//! Cells are rotated back with the stored inverse rotation and unscaled;
//! normals and UVs come from the barycentric weights of the source triangle.

use super::{triangle_area, Vertex};
use crate::constants::{
    DEGENERATE_TRIANGLE_RATIO, MAX_SITE_ATTEMPTS, SITE_SAMPLE_MAX, SITE_SAMPLE_MIN, VORONOI_SCALE,
};
use bevy::math::{Quat, Vec2, Vec3};
use rand::Rng;

/// Minimum distance between two sites in scaled units. Closer sites have no
/// usable bisector.
const MIN_SITE_SEPARATION: f32 = 1e-2;

/// Consecutive cell vertices closer than this (scaled units) are merged.
const WELD_DISTANCE: f32 = 1e-3;

/// How many sites a triangle receives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SiteCount {
    /// The same number of sites for every triangle.
    Fixed(usize),
    /// `max(3, area / target_area)` sites.
    TargetArea(f32),
}

impl SiteCount {
    pub fn for_area(&self, area: f32) -> usize {
        match *self {
            SiteCount::Fixed(n) => n,
            SiteCount::TargetArea(target) if target > 0.0 => ((area / target) as usize).max(3),
            SiteCount::TargetArea(_) => 3,
        }
    }
}

/// Numerical knobs of the subdivision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoronoiOptions {
    pub scale: f32,
    pub max_site_attempts: usize,
}

impl Default for VoronoiOptions {
    fn default() -> Self {
        Self {
            scale: VORONOI_SCALE,
            max_site_attempts: MAX_SITE_ATTEMPTS,
        }
    }
}

/// A Voronoi cell clipped to its triangle, wound like the triangle.
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedCell {
    pub site: Vec3,
    pub polygon: Vec<Vertex>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleCells {
    pub cells: Vec<ClippedCell>,
    /// Sites that could not be placed, or whose cell came out empty.
    pub rejected_sites: usize,
}

/// Rigid map between a triangle's scaled world frame and the XY plane.
struct PlaneFrame {
    center: Vec3,
    to_plane: Quat,
    from_plane: Quat,
    depth: f32,
    scale: f32,
}

impl PlaneFrame {
    fn flatten(&self, p: Vec3) -> Vec3 {
        self.to_plane * (p * self.scale - self.center)
    }

    fn lift(&self, q: Vec2) -> Vec3 {
        (self.from_plane * q.extend(self.depth) + self.center) / self.scale
    }
}

/// Subdivide one triangle into clipped Voronoi cells.
///
/// Degenerate triangles yield no cells.
pub fn generate_cells_for_triangle<R: Rng + ?Sized>(
    triangle: &[Vertex; 3],
    sites: SiteCount,
    options: &VoronoiOptions,
    rng: &mut R,
) -> TriangleCells {
    let [a, b, c] = [triangle[0].position, triangle[1].position, triangle[2].position];
    let area = triangle_area(a, b, c);
    let longest = (b - a)
        .length_squared()
        .max((c - b).length_squared())
        .max((a - c).length_squared());
    if !area.is_finite() || longest <= 0.0 || area <= DEGENERATE_TRIANGLE_RATIO * longest {
        return TriangleCells::default();
    }

    let scale = options.scale.max(f32::EPSILON);
    let normal = (b - a).cross(c - a).normalize();
    let to_plane = Quat::from_rotation_arc(normal, Vec3::Z);
    let mut frame = PlaneFrame {
        center: (a + b + c) * scale / 3.0,
        to_plane,
        from_plane: to_plane.inverse(),
        depth: 0.0,
        scale,
    };
    let flat3 = [frame.flatten(a), frame.flatten(b), frame.flatten(c)];
    frame.depth = (flat3[0].z + flat3[1].z + flat3[2].z) / 3.0;
    let flat = flat3.map(|p| p.truncate());

    let mut result = TriangleCells::default();
    let wanted = sites.for_area(area);
    let mut placed: Vec<Vec2> = Vec::with_capacity(wanted);
    for _ in 0..wanted {
        match sample_site(&flat, &placed, options.max_site_attempts, rng) {
            Some(site) => placed.push(site),
            None => result.rejected_sites += 1,
        }
    }

    for (index, site) in placed.iter().enumerate() {
        let cell = clip_cell(*site, index, &placed, &flat);
        if cell.len() < 3 || polygon_area_2d(&cell) <= WELD_DISTANCE * WELD_DISTANCE {
            result.rejected_sites += 1;
            continue;
        }
        let polygon = cell
            .iter()
            .map(|q| {
                let w = barycentric(*q, &flat);
                Vertex {
                    position: frame.lift(*q),
                    normal: (triangle[0].normal * w.x
                        + triangle[1].normal * w.y
                        + triangle[2].normal * w.z)
                        .normalize_or_zero(),
                    uv: triangle[0].uv * w.x + triangle[1].uv * w.y + triangle[2].uv * w.z,
                }
            })
            .collect();
        result.cells.push(ClippedCell {
            site: frame.lift(*site),
            polygon,
        });
    }
    result
}

/// Uniform random point strictly inside the triangle, away from existing sites.
fn sample_site<R: Rng + ?Sized>(
    triangle: &[Vec2; 3],
    existing: &[Vec2],
    attempts: usize,
    rng: &mut R,
) -> Option<Vec2> {
    for _ in 0..attempts {
        let r1: f32 = rng.gen_range(SITE_SAMPLE_MIN..=SITE_SAMPLE_MAX);
        let r2: f32 = rng.gen_range(SITE_SAMPLE_MIN..=SITE_SAMPLE_MAX);
        let s = r1.sqrt();
        let p = triangle[0] * (1.0 - s) + triangle[1] * (s * (1.0 - r2)) + triangle[2] * (s * r2);
        let separated = existing
            .iter()
            .all(|q| q.distance_squared(p) > MIN_SITE_SEPARATION * MIN_SITE_SEPARATION);
        if point_in_triangle(p, triangle) && separated {
            return Some(p);
        }
    }
    None
}

fn point_in_triangle(p: Vec2, triangle: &[Vec2; 3]) -> bool {
    let w = barycentric(p, triangle);
    w.x > 0.0 && w.y > 0.0 && w.z > 0.0
}

/// Barycentric weights of `p` with respect to a counter-clockwise triangle.
fn barycentric(p: Vec2, triangle: &[Vec2; 3]) -> Vec3 {
    let [a, b, c] = *triangle;
    let total = (b - a).perp_dot(c - a);
    if total.abs() <= f32::EPSILON {
        return Vec3::new(1.0, 0.0, 0.0);
    }
    let wa = (b - p).perp_dot(c - p) / total;
    let wb = (c - p).perp_dot(a - p) / total;
    Vec3::new(wa, wb, 1.0 - wa - wb)
}

/// Cell of `sites[index]`: the triangle cut by every bisector that reaches it.
fn clip_cell(site: Vec2, index: usize, sites: &[Vec2], triangle: &[Vec2; 3]) -> Vec<Vec2> {
    let mut others: Vec<Vec2> = sites
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != index)
        .map(|(_, s)| *s)
        .collect();
    others.sort_by(|p, q| p.distance_squared(site).total_cmp(&q.distance_squared(site)));

    let mut cell = triangle.to_vec();
    for other in others {
        let reach = cell
            .iter()
            .map(|v| v.distance_squared(site))
            .fold(0.0_f32, f32::max);
        // Sorted by distance: once a bisector lies beyond the farthest corner, all later ones do too.
        if other.distance_squared(site) * 0.25 >= reach {
            break;
        }
        cell = clip_half_plane(&cell, (site + other) * 0.5, other - site);
        if cell.len() < 3 {
            return Vec::new();
        }
    }
    weld(cell)
}

/// Keep the part of a convex polygon where `(p - origin) · axis <= 0`.
fn clip_half_plane(polygon: &[Vec2], origin: Vec2, axis: Vec2) -> Vec<Vec2> {
    let mut kept = Vec::with_capacity(polygon.len() + 1);
    let n = polygon.len();
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let da = (a - origin).dot(axis);
        let db = (b - origin).dot(axis);
        if da <= 0.0 {
            kept.push(a);
        }
        if (da < 0.0 && db > 0.0) || (da > 0.0 && db < 0.0) {
            let t = da / (da - db);
            kept.push(a + (b - a) * t);
        }
    }
    kept
}

/// Merge runs of nearly identical vertices, including the wrap-around pair.
fn weld(polygon: Vec<Vec2>) -> Vec<Vec2> {
    let mut out: Vec<Vec2> = Vec::with_capacity(polygon.len());
    for p in polygon {
        if out
            .last()
            .map_or(true, |q| q.distance_squared(p) > WELD_DISTANCE * WELD_DISTANCE)
        {
            out.push(p);
        }
    }
    while out.len() > 1
        && out[0].distance_squared(out[out.len() - 1]) <= WELD_DISTANCE * WELD_DISTANCE
    {
        out.pop();
    }
    out
}

fn polygon_area_2d(polygon: &[Vec2]) -> f32 {
    let n = polygon.len();
    (0..n)
        .map(|i| polygon[i].perp_dot(polygon[(i + 1) % n]))
        .sum::<f32>()
        * 0.5
}

//! Cell extrusion and frustum volume estimation.
//!
//! Vertex layout of an extruded cell with `n` corners:
//!
//! | range        | contents                                   |
//! |--------------|--------------------------------------------|
//! | `0..n`       | front face (the cell itself)               |
//! | `n..2n`      | back face, inset and contracted            |
//! | `2n..6n`     | side quads, 4 vertices per edge            |
//!
//! [`estimate_volume_and_center`] relies on this layout and rejects anything
//! else.

use super::{centroid, polygon_area, polygon_normal, Mesh, Vertex};
use crate::error::{validate_fraction, validate_positive, ShatterError, ShatterResult};
use bevy::math::Vec3;

/// A closed fragment mesh centred on its estimated centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct Solid {
    /// Positions relative to `pivot`.
    pub mesh: Mesh,
    /// World-space centroid.
    pub pivot: Vec3,
    pub volume: f32,
}

/// Build a closed frustum from a planar polygon.
///
/// The back face sits `thickness` behind the front along the average vertex
/// normal and is shrunk toward its own centroid by `contraction` (0 keeps a
/// prism). Winding is taken from the normals, so a polygon wound against its
/// normals is reversed first.
pub fn extrude_polygon_to_solid(
    polygon: &[Vertex],
    thickness: f32,
    contraction: f32,
) -> ShatterResult<Solid> {
    let n = polygon.len();
    if n < 3 {
        return Err(ShatterError::InvalidMesh {
            context: "extrude polygon",
            vertex_count: n,
        });
    }
    validate_positive("thickness", thickness)?;
    validate_fraction("contraction", contraction)?;

    let mut corners: Vec<Vertex> = polygon.to_vec();
    let face_normal = polygon_normal(&corners.iter().map(|v| v.position).collect::<Vec<_>>());
    let mut normal = corners.iter().map(|v| v.normal).sum::<Vec3>().normalize_or_zero();
    if normal == Vec3::ZERO {
        normal = face_normal;
    }
    if normal == Vec3::ZERO {
        return Err(ShatterError::InvalidMesh {
            context: "extrude polygon without area",
            vertex_count: n,
        });
    }
    if face_normal.dot(normal) < 0.0 {
        corners.reverse();
    }

    let front: Vec<Vec3> = corners.iter().map(|v| v.position).collect();
    let back_center = centroid(&front) - normal * thickness;
    let back: Vec<Vec3> = front
        .iter()
        .map(|p| (*p - normal * thickness).lerp(back_center, contraction))
        .collect();

    let mut positions = Vec::with_capacity(6 * n);
    let mut normals = Vec::with_capacity(6 * n);
    let mut uvs = Vec::with_capacity(6 * n);
    let mut indices: Vec<u32> = Vec::with_capacity(12 * (n - 1));

    positions.extend_from_slice(&front);
    normals.extend(corners.iter().map(|v| if v.normal == Vec3::ZERO { normal } else { v.normal }));
    uvs.extend(corners.iter().map(|v| v.uv));

    positions.extend_from_slice(&back);
    normals.extend(std::iter::repeat(-normal).take(n));
    uvs.extend(corners.iter().map(|v| v.uv));

    for i in 0..n {
        let j = (i + 1) % n;
        let quad = [front[i], back[i], front[j], back[j]];
        let side = (quad[1] - quad[0]).cross(quad[2] - quad[0]).normalize_or_zero();
        positions.extend_from_slice(&quad);
        normals.extend([side; 4]);
        uvs.extend([corners[i].uv, corners[i].uv, corners[j].uv, corners[j].uv]);
    }

    let nu = n as u32;
    for i in 1..nu - 1 {
        indices.extend([0, i, i + 1]);
    }
    for i in 1..nu - 1 {
        indices.extend([nu, nu + i + 1, nu + i]);
    }
    for i in 0..nu {
        let s = 2 * nu + 4 * i;
        indices.extend([s, s + 1, s + 2, s + 1, s + 3, s + 2]);
    }

    let mut mesh = Mesh {
        positions,
        normals,
        uvs,
        indices,
    };
    let (volume, pivot) = estimate_volume_and_center(&mesh)?;
    for p in &mut mesh.positions {
        *p -= pivot;
    }
    Ok(Solid {
        mesh,
        pivot,
        volume,
    })
}

/// Frustum approximation of an extruded cell: `(volume, centroid)`.
///
/// The first `n` vertices are the base, the next `n` the top.
pub fn estimate_volume_and_center(mesh: &Mesh) -> ShatterResult<(f32, Vec3)> {
    let len = mesh.positions.len();
    if len < 18 || len % 6 != 0 {
        return Err(ShatterError::InvalidMesh {
            context: "volume estimate",
            vertex_count: len,
        });
    }
    let n = len / 6;
    let base = &mesh.positions[..n];
    let top = &mesh.positions[n..2 * n];

    let base_area = polygon_area(base);
    let top_area = polygon_area(top);
    let base_center = centroid(base);
    let top_center = centroid(top);
    let axis = polygon_normal(base);
    let height = if axis == Vec3::ZERO {
        base_center.distance(top_center)
    } else {
        (top_center - base_center).dot(axis).abs()
    };

    let mix = (base_area * top_area).sqrt();
    let weight = base_area + top_area + mix;
    let volume = height / 3.0 * weight;
    let along = if weight > 0.0 {
        (base_area + 2.0 * mix + 3.0 * top_area) / (4.0 * weight)
    } else {
        0.5
    };
    Ok((volume, base_center.lerp(top_center, along)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Vec2;

    fn square(normal: Vec3) -> Vec<Vertex> {
        [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
            .into_iter()
            .map(|(x, y)| Vertex {
                position: Vec3::new(x, y, 0.0),
                normal,
                uv: Vec2::new(x, y),
            })
            .collect()
    }

    /// Divergence-theorem volume; positive iff triangles face outward.
    fn signed_volume(mesh: &Mesh) -> f32 {
        mesh.indices
            .chunks_exact(3)
            .map(|t| {
                let [a, b, c] = [t[0], t[1], t[2]].map(|i| mesh.positions[i as usize]);
                a.dot(b.cross(c)) / 6.0
            })
            .sum()
    }

    #[test]
    fn unit_square_prism_is_a_unit_cube() {
        let solid = extrude_polygon_to_solid(&square(Vec3::Z), 1.0, 0.0).unwrap();
        assert!((solid.volume - 1.0).abs() < 1e-5, "volume {}", solid.volume);
        assert!(
            solid.pivot.distance(Vec3::new(0.5, 0.5, -0.5)) < 1e-5,
            "pivot {:?}",
            solid.pivot
        );
        assert!((signed_volume(&solid.mesh) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn contracted_back_face_matches_frustum_formula() {
        let solid = extrude_polygon_to_solid(&square(Vec3::Z), 1.0, 0.25).unwrap();
        // top side 0.75: V = 1/3 (1 + 0.5625 + 0.75)
        let expected = (1.0 + 0.5625 + 0.75) / 3.0;
        assert!((solid.volume - expected).abs() < 1e-5, "volume {}", solid.volume);
        assert!(
            (signed_volume(&solid.mesh) - expected).abs() < 1e-4,
            "closed mesh volume must agree with the estimate"
        );
    }

    #[test]
    fn layout_has_six_vertices_per_corner() {
        let solid = extrude_polygon_to_solid(&square(Vec3::Z), 0.3, 0.2).unwrap();
        assert_eq!(solid.mesh.vertex_count(), 24);
        assert_eq!(solid.mesh.triangle_count(), 4 * 4 - 4);
        assert_eq!(solid.mesh.normals.len(), 24);
        assert_eq!(solid.mesh.uvs.len(), 24);
        assert!(solid.mesh.vertex_centroid().length() < 0.2, "mesh is recentred on the pivot");
    }

    #[test]
    fn polygon_wound_against_normals_is_flipped() {
        let poly = square(-Vec3::Z);
        let solid = extrude_polygon_to_solid(&poly, 0.5, 0.0).unwrap();
        assert!(signed_volume(&solid.mesh) > 0.0, "faces must point outward");
        assert!(solid.pivot.z > 0.0, "extrusion goes behind the front face");
    }

    #[test]
    fn missing_normals_fall_back_to_winding() {
        let solid = extrude_polygon_to_solid(&square(Vec3::ZERO), 1.0, 0.0).unwrap();
        assert!((solid.volume - 1.0).abs() < 1e-5);
        assert!(solid.pivot.z < 0.0);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(extrude_polygon_to_solid(&square(Vec3::Z)[..2], 1.0, 0.0).is_err());
        assert!(extrude_polygon_to_solid(&square(Vec3::Z), 0.0, 0.0).is_err());
        assert!(extrude_polygon_to_solid(&square(Vec3::Z), 1.0, 1.5).is_err());

        let not_extruded = Mesh {
            positions: vec![Vec3::ZERO; 10],
            ..Default::default()
        };
        assert!(matches!(
            estimate_volume_and_center(&not_extruded),
            Err(ShatterError::InvalidMesh { vertex_count: 10, .. })
        ));
    }
}

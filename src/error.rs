//! Fragmentation and destruction error types.
//!
//! Tasks propagate errors through these types rather than panicking. A task
//! that returns an error is aborted by the [`crate::runtime::Runtime`] and its
//! error is kept for polling; every other in-flight task keeps running.
//!
//! ## Taxonomy
//!
//! - Precondition failures (`MissingMesh`, `MissingMaterial`, `UnknownBody`,
//!   `InvalidMesh`, `InvalidParams`, `InvalidExplosion`) are reported before
//!   any work is done.
//! - Graph consistency failures (`Graph`, `MissingFragment`) mean an invariant
//!   was broken elsewhere and are never ignored.
//! - Site sampling failures and physics misses are not errors; they are
//!   counted or treated as "no effect" by the pipelines.

use crate::graph::GraphError;
use crate::scene::{BodyId, FragmentId};
use std::fmt;

/// Top-level error enum for fragmentation and destruction tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum ShatterError {
    /// The body has no mesh to fragment.
    MissingMesh {
        body: BodyId,
    },

    /// The body has no materials, so fragments cannot be assigned a slot.
    MissingMaterial {
        body: BodyId,
    },

    /// No source or fragmented body is registered under this id.
    UnknownBody {
        body: BodyId,
    },

    /// Mesh data is malformed (index out of range, wrong layout).
    InvalidMesh {
        /// Human-readable description of where the check failed.
        context: &'static str,
        /// Number of vertices in the offending mesh.
        vertex_count: usize,
    },

    /// A fragmentation parameter is outside its valid range.
    InvalidParams {
        /// Name of the parameter (for logging).
        name: &'static str,
        /// The value that was rejected.
        value: f32,
        /// Human-readable description of the valid range.
        safe_range: &'static str,
    },

    /// Explosion radius or force is not strictly positive.
    InvalidExplosion {
        radius: f32,
        force: f32,
    },

    /// A fragment referenced by a graph or collider has no record in the scene.
    MissingFragment {
        fragment: FragmentId,
        /// Human-readable description of where the lookup occurred.
        context: &'static str,
    },

    /// The target already has a task in flight.
    TargetBusy {
        body: BodyId,
    },

    /// Graph lookup or insertion failed.
    Graph(GraphError),
}

impl fmt::Display for ShatterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShatterError::MissingMesh { body } => write!(f, "{} has no mesh to fragment", body),
            ShatterError::MissingMaterial { body } => {
                write!(f, "{} has no materials to assign to fragments", body)
            }
            ShatterError::UnknownBody { body } => write!(f, "{} is not registered", body),
            ShatterError::InvalidMesh {
                context,
                vertex_count,
            } => write!(
                f,
                "invalid mesh during '{}' ({} vertices)",
                context, vertex_count
            ),
            ShatterError::InvalidParams {
                name,
                value,
                safe_range,
            } => write!(
                f,
                "parameter '{}' = {} is outside valid range {}",
                name, value, safe_range
            ),
            ShatterError::InvalidExplosion { radius, force } => write!(
                f,
                "explosion needs radius > 0 and force > 0, got radius {} and force {}",
                radius, force
            ),
            ShatterError::MissingFragment { fragment, context } => {
                write!(f, "{} not found during '{}'", fragment, context)
            }
            ShatterError::TargetBusy { body } => {
                write!(f, "{} already has a task in flight", body)
            }
            ShatterError::Graph(err) => write!(f, "fragment graph: {}", err),
        }
    }
}

impl std::error::Error for ShatterError {}

impl From<GraphError> for ShatterError {
    fn from(err: GraphError) -> Self {
        ShatterError::Graph(err)
    }
}

/// Convenience alias: a `Result` using `ShatterError` as the error type.
pub type ShatterResult<T> = Result<T, ShatterError>;

// ── Validation helpers ────────────────────────────────────────────────────────

/// Returns an error unless both `radius` and `force` are finite and positive.
pub fn validate_explosion(radius: f32, force: f32) -> ShatterResult<()> {
    let ok = |v: f32| v.is_finite() && v > 0.0;
    if ok(radius) && ok(force) {
        Ok(())
    } else {
        Err(ShatterError::InvalidExplosion { radius, force })
    }
}

/// Returns an error if `value` is not finite and strictly positive.
pub fn validate_positive(name: &'static str, value: f32) -> ShatterResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ShatterError::InvalidParams {
            name,
            value,
            safe_range: "(0.0, ∞)",
        })
    }
}

/// Returns an error if `value` lies outside `[0, 1]`.
pub fn validate_fraction(name: &'static str, value: f32) -> ShatterResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ShatterError::InvalidParams {
            name,
            value,
            safe_range: "[0.0, 1.0]",
        })
    }
}

//! Voronoi fragmentation and structural destruction.
//!
//! Source meshes are cut triangle by triangle into convex fragments, joined by
//! breakable connections into a fragment graph, and torn down by explosions
//! that release hit fragments and whatever loses its path to an anchor.
//! Both pipelines are time-sliced so a frame never stalls.

pub mod budget;
pub mod config;
pub mod constants;
pub mod destroyer;
pub mod error;
pub mod explosion;
pub mod fragmenter;
pub mod geometry;
pub mod graph;
pub mod physics;
pub mod runtime;
pub mod scene;
pub mod simulation;
pub mod spatial_partition;

pub use config::{FragmentParams, ShatterConfig, SiteMode};
pub use error::{ShatterError, ShatterResult};
pub use explosion::ExplosionRequest;
pub use runtime::{Runtime, TaskId, TaskStatus};
pub use simulation::{ShatterPlugin, ShatterRuntime};

//! Centralised fragmentation and destruction constants.
//!
//! All tuneable values live here so they can be found, reasoned-about, and
//! modified in one place without source-diving across multiple modules.
//! [`crate::config::ShatterConfig`] mirrors every value and is the runtime
//! override path; these consts remain the authoritative defaults.
//!
//! ## Tuning guidance
//!
//! Each constant includes the tested range and the observable consequence of
//! changing it.

// ── Fragment Shape ────────────────────────────────────────────────────────────

/// Minimum extrusion depth of a fragment (world units).
pub const DEFAULT_MIN_THICKNESS: f32 = 0.3;

/// Maximum extrusion depth of a fragment (world units).
///
/// Each fragment picks a thickness uniformly in `[min, max]`, so a narrow band
/// keeps the broken surface looking like one slab.
pub const DEFAULT_MAX_THICKNESS: f32 = 0.35;

/// Voronoi sites sampled per source triangle in fixed-count mode.
///
/// Cost grows quadratically per triangle (every cell is clipped against every
/// other site). Tested range: 5–40.
pub const DEFAULT_SITES_PER_TRIANGLE: usize = 20;

/// Target cell area used by area mode: `sites = max(3, area / max_area)`.
pub const DEFAULT_MAX_AREA: f32 = 50.0;

/// Material density (kg/m³) used for `mass = density × volume`. Concrete.
pub const DEFAULT_DENSITY: f32 = 2300.0;

/// Lower bound of the back-face contraction toward its centroid.
pub const MIN_CONTRACTION: f32 = 0.2;

/// Upper bound of the back-face contraction toward its centroid.
pub const MAX_CONTRACTION: f32 = 0.3;

// ── Numerics ──────────────────────────────────────────────────────────────────

/// Uniform scale applied to a triangle before its Voronoi diagram is computed.
///
/// Small triangles lose precision in the bisector clipping; scaling up by a
/// constant keeps cell vertices well separated. Not derived from the mesh.
pub const VORONOI_SCALE: f32 = 500.0;

/// Attempts made to place one Voronoi site before it is recorded as rejected.
pub const MAX_SITE_ATTEMPTS: usize = 50;

/// Barycentric sample range `[lo, hi]` for both random site parameters.
///
/// Keeping away from 0 and 1 avoids sites sitting on the triangle boundary.
pub const SITE_SAMPLE_MIN: f32 = 0.1;
pub const SITE_SAMPLE_MAX: f32 = 0.9;

/// Relative area below which a triangle is treated as degenerate.
///
/// Compared against `area / longest_edge²`, so the test is scale free.
pub const DEGENERATE_TRIANGLE_RATIO: f32 = 1e-6;

/// Growth factor of the adjacency probe.
///
/// Neighbouring fragments only share faces and edges; the probe is the
/// fragment scaled about its centroid so that touching neighbours overlap.
/// Values below 1.05 miss edge-only contacts. Above 1.3 joins fragments that
/// are one cell apart.
pub const MESH_UPSCALING: f32 = 1.1;

// ── Scheduling ────────────────────────────────────────────────────────────────

/// Wall-clock budget (ms) a single task may spend per tick before yielding.
///
/// 15 ms leaves headroom in a 60 Hz frame when one task is active.
pub const FRAME_BUDGET_MS: u64 = 15;

// ── Joints ────────────────────────────────────────────────────────────────────

/// Impulse magnitude above which a fragment joint breaks.
pub const JOINT_BREAK_FORCE: f32 = 1.0e4;

/// Hinge limits (degrees) applied to fragment joints.
pub const JOINT_MIN_ANGLE: f32 = 0.0;
pub const JOINT_MAX_ANGLE: f32 = 10.0;

// ── Fragment Bodies ───────────────────────────────────────────────────────────

/// Linear drag of a frozen fragment. Released fragments get zero drag.
pub const FRAGMENT_LINEAR_DRAG: f32 = 1.5;

/// Angular drag of a frozen fragment.
pub const FRAGMENT_ANGULAR_DRAG: f32 = 500.0;

/// Disposal delay window (seconds) for released fragments.
pub const FRAGMENT_MIN_DESTROY_DELAY: f32 = 10.0;
pub const FRAGMENT_MAX_DESTROY_DELAY: f32 = 30.0;

/// Removal delay window (seconds) for joints of a collapsing structure.
///
/// Staggering joint removal makes a collapse crumble rather than pop.
pub const JOINT_MIN_DESTROY_DELAY: f32 = FRAGMENT_MIN_DESTROY_DELAY * 0.05;
pub const JOINT_MAX_DESTROY_DELAY: f32 = FRAGMENT_MIN_DESTROY_DELAY * 0.8;

// ── Structural Integrity ──────────────────────────────────────────────────────

/// Live (or anchor-reachable) fraction of the initial fragment count at or
/// below which a whole structure collapses.
pub const COLLAPSE_FRACTION: f32 = 0.25;

// ── Explosions ────────────────────────────────────────────────────────────────

/// Explosion used by the destroyer against building parts (walls).
pub const BUILD_EXPLOSION_RADIUS: f32 = 1.0;
pub const BUILD_EXPLOSION_FORCE: f32 = 300.0;

/// Explosion used by the destroyer against small props (doors, windows).
pub const MISC_EXPLOSION_RADIUS: f32 = 0.5;
pub const MISC_EXPLOSION_FORCE: f32 = 3.0;

// ── Destroyer ─────────────────────────────────────────────────────────────────

/// Start window (seconds since launch) for destroying misc props.
pub const DESTROYER_MISC_START_MIN: f32 = 5.0;
pub const DESTROYER_MISC_START_MAX: f32 = 6.0;

/// Start window (seconds since launch) for destroying building parts.
pub const DESTROYER_BUILD_START_MIN: f32 = 40.0;
pub const DESTROYER_BUILD_START_MAX: f32 = 50.0;

/// Per-frame chance that a category is considered at all.
pub const DESTROYER_TRIGGER_CHANCE: f32 = 0.05;

/// Chance that a considered category actually starts work on a destroyable.
pub const DESTROYER_PICK_CHANCE: f32 = 0.25;

/// Lowest vertical offset (in half extents) of the first explosion point.
///
/// The first blast lands in the lower part of the bounds so walls fall in.
pub const FIRST_EXPLOSION_MAX_HEIGHT: f32 = -0.3;

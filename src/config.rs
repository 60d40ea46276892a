//! Runtime configuration loaded from `assets/shatter.toml`.
//!
//! [`ShatterConfig`] is a Bevy [`Resource`] that mirrors every constant in
//! [`crate::constants`]. At startup, [`load_shatter_config`] reads
//! `assets/shatter.toml` and overwrites the defaults with any values present
//! in the file. Missing keys fall back to the compile-time defaults, so a
//! minimal TOML can override just the values you care about.
//!
//! Per-body fragmentation settings are [`FragmentParams`]. A body may carry
//! its own, inherit them from an ancestor group, or use
//! [`ShatterConfig::fragment`]; [`resolve_params`] picks the first one found.
//!
//! Keep `src/constants.rs` in sync: it remains the **authoritative default**
//! source used by `ShatterConfig::default()`.

use crate::constants::*;
use crate::error::{validate_fraction, validate_positive, ShatterError, ShatterResult};
use crate::geometry::{SiteCount, VoronoiOptions};
use bevy::log::{info, warn};
use bevy::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::time::Duration;

/// Default location of the TOML override file.
pub const CONFIG_PATH: &str = "assets/shatter.toml";

/// How the number of Voronoi sites per triangle is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiteMode {
    /// `sites_per_triangle` sites on every triangle.
    #[default]
    PerTriangle,
    /// Sites proportional to triangle area (`max_area` per cell, at least 3).
    ByArea,
}

/// Fragmentation settings of one body.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FragmentParams {
    pub min_thickness: f32,
    pub max_thickness: f32,
    pub sites_per_triangle: usize,
    pub max_area: f32,
    pub density: f32,
}

impl Default for FragmentParams {
    fn default() -> Self {
        Self {
            min_thickness: DEFAULT_MIN_THICKNESS,
            max_thickness: DEFAULT_MAX_THICKNESS,
            sites_per_triangle: DEFAULT_SITES_PER_TRIANGLE,
            max_area: DEFAULT_MAX_AREA,
            density: DEFAULT_DENSITY,
        }
    }
}

impl FragmentParams {
    pub fn validate(&self) -> ShatterResult<()> {
        validate_positive("min_thickness", self.min_thickness)?;
        validate_positive("max_thickness", self.max_thickness)?;
        if self.max_thickness < self.min_thickness {
            return Err(ShatterError::InvalidParams {
                name: "max_thickness",
                value: self.max_thickness,
                safe_range: "[min_thickness, ∞)",
            });
        }
        validate_positive("max_area", self.max_area)?;
        validate_positive("density", self.density)
    }

    pub fn site_count(&self, mode: SiteMode) -> SiteCount {
        match mode {
            SiteMode::PerTriangle => SiteCount::Fixed(self.sites_per_triangle),
            SiteMode::ByArea => SiteCount::TargetArea(self.max_area),
        }
    }
}

/// First parameters found along a node-first chain (override, own, parent,
/// ..., root), or the defaults.
pub fn resolve_params<'a>(
    chain: impl IntoIterator<Item = Option<&'a FragmentParams>>,
) -> FragmentParams {
    chain.into_iter().flatten().next().copied().unwrap_or_default()
}

/// Engine-wide tunables.
///
/// All fields default to the corresponding compile-time constant from
/// `src/constants.rs`.
#[derive(Resource, Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShatterConfig {
    // ── Scheduling ────────────────────────────────────────────────────────────
    pub budget_ms: u64,
    /// Seed for every task RNG. `None` draws from entropy.
    pub seed: Option<u64>,

    // ── Fragmentation ─────────────────────────────────────────────────────────
    /// Parameters for bodies and groups that carry none.
    pub fragment: FragmentParams,
    pub voronoi_scale: f32,
    pub max_site_attempts: usize,
    pub min_contraction: f32,
    pub max_contraction: f32,
    pub mesh_upscaling: f32,

    // ── Joints ────────────────────────────────────────────────────────────────
    pub joint_break_force: f32,
    pub joint_min_angle: f32,
    pub joint_max_angle: f32,

    // ── Fragment Bodies ───────────────────────────────────────────────────────
    pub fragment_linear_drag: f32,
    pub fragment_angular_drag: f32,
    pub fragment_min_destroy_delay: f32,
    pub fragment_max_destroy_delay: f32,
    pub joint_min_destroy_delay: f32,
    pub joint_max_destroy_delay: f32,

    // ── Structural Integrity ──────────────────────────────────────────────────
    pub collapse_fraction: f32,

    // ── Explosions ────────────────────────────────────────────────────────────
    pub build_explosion_radius: f32,
    pub build_explosion_force: f32,
    pub misc_explosion_radius: f32,
    pub misc_explosion_force: f32,

    // ── Destroyer ─────────────────────────────────────────────────────────────
    pub misc_start_min: f32,
    pub misc_start_max: f32,
    pub build_start_min: f32,
    pub build_start_max: f32,
    pub trigger_chance: f32,
    pub pick_chance: f32,
    pub first_explosion_max_height: f32,
}

impl Default for ShatterConfig {
    fn default() -> Self {
        Self {
            // Scheduling
            budget_ms: FRAME_BUDGET_MS,
            seed: None,
            // Fragmentation
            fragment: FragmentParams::default(),
            voronoi_scale: VORONOI_SCALE,
            max_site_attempts: MAX_SITE_ATTEMPTS,
            min_contraction: MIN_CONTRACTION,
            max_contraction: MAX_CONTRACTION,
            mesh_upscaling: MESH_UPSCALING,
            // Joints
            joint_break_force: JOINT_BREAK_FORCE,
            joint_min_angle: JOINT_MIN_ANGLE,
            joint_max_angle: JOINT_MAX_ANGLE,
            // Fragment Bodies
            fragment_linear_drag: FRAGMENT_LINEAR_DRAG,
            fragment_angular_drag: FRAGMENT_ANGULAR_DRAG,
            fragment_min_destroy_delay: FRAGMENT_MIN_DESTROY_DELAY,
            fragment_max_destroy_delay: FRAGMENT_MAX_DESTROY_DELAY,
            joint_min_destroy_delay: JOINT_MIN_DESTROY_DELAY,
            joint_max_destroy_delay: JOINT_MAX_DESTROY_DELAY,
            // Structural Integrity
            collapse_fraction: COLLAPSE_FRACTION,
            // Explosions
            build_explosion_radius: BUILD_EXPLOSION_RADIUS,
            build_explosion_force: BUILD_EXPLOSION_FORCE,
            misc_explosion_radius: MISC_EXPLOSION_RADIUS,
            misc_explosion_force: MISC_EXPLOSION_FORCE,
            // Destroyer
            misc_start_min: DESTROYER_MISC_START_MIN,
            misc_start_max: DESTROYER_MISC_START_MAX,
            build_start_min: DESTROYER_BUILD_START_MIN,
            build_start_max: DESTROYER_BUILD_START_MAX,
            trigger_chance: DESTROYER_TRIGGER_CHANCE,
            pick_chance: DESTROYER_PICK_CHANCE,
            first_explosion_max_height: FIRST_EXPLOSION_MAX_HEIGHT,
        }
    }
}

impl ShatterConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn voronoi_options(&self) -> VoronoiOptions {
        VoronoiOptions {
            scale: self.voronoi_scale,
            max_site_attempts: self.max_site_attempts,
        }
    }

    /// Deterministic per-task RNG when a seed is configured.
    pub fn rng(&self, stream: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            None => StdRng::from_entropy(),
        }
    }

    /// Check the ranges the pipelines rely on.
    pub fn validate(&self) -> ShatterResult<()> {
        self.fragment.validate()?;
        validate_positive("voronoi_scale", self.voronoi_scale)?;
        validate_fraction("min_contraction", self.min_contraction)?;
        validate_fraction("max_contraction", self.max_contraction)?;
        if self.max_contraction < self.min_contraction {
            return Err(ShatterError::InvalidParams {
                name: "max_contraction",
                value: self.max_contraction,
                safe_range: "[min_contraction, 1.0]",
            });
        }
        if self.mesh_upscaling < 1.0 {
            return Err(ShatterError::InvalidParams {
                name: "mesh_upscaling",
                value: self.mesh_upscaling,
                safe_range: "[1.0, ∞)",
            });
        }
        validate_positive("joint_break_force", self.joint_break_force)?;
        validate_fraction("collapse_fraction", self.collapse_fraction)?;
        validate_fraction("trigger_chance", self.trigger_chance)?;
        validate_fraction("pick_chance", self.pick_chance)
    }
}

/// Startup system: attempt to load `assets/shatter.toml` and overwrite the
/// `ShatterConfig` resource with any values present in the file.
///
/// Missing keys retain their compiled defaults. Parse errors and values that
/// fail validation are logged and ignored. A missing file keeps the defaults.
pub fn load_shatter_config(mut config: ResMut<ShatterConfig>) {
    match std::fs::read_to_string(CONFIG_PATH) {
        Ok(contents) => match ShatterConfig::from_toml_str(&contents) {
            Ok(loaded) => match loaded.validate() {
                Ok(()) => {
                    *config = loaded;
                    info!("Loaded shatter config from {CONFIG_PATH}");
                }
                Err(e) => warn!("Rejected {CONFIG_PATH}: {e}; using defaults"),
            },
            Err(e) => warn!("Failed to parse {CONFIG_PATH}: {e}; using defaults"),
        },
        Err(_) => info!("No {CONFIG_PATH} found; using compiled defaults"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn defaults_match_constants_and_validate() {
        let config = ShatterConfig::default();
        assert_eq!(config.fragment.sites_per_triangle, DEFAULT_SITES_PER_TRIANGLE);
        assert_eq!(config.budget(), Duration::from_millis(FRAME_BUDGET_MS));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_overrides_only_given_keys() {
        let config = ShatterConfig::from_toml_str(
            "budget_ms = 4\nseed = 9\n\n[fragment]\nsites_per_triangle = 7\n",
        )
        .unwrap();
        assert_eq!(config.budget_ms, 4);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.fragment.sites_per_triangle, 7);
        assert_eq!(config.fragment.density, DEFAULT_DENSITY, "unset keys keep defaults");
        assert_eq!(config.collapse_fraction, COLLAPSE_FRACTION);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(ShatterConfig::from_toml_str("budget_ms = \"soon\"").is_err());
    }

    #[test]
    fn inverted_thickness_range_is_rejected() {
        let params = FragmentParams {
            min_thickness: 0.5,
            max_thickness: 0.1,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ShatterError::InvalidParams { name: "max_thickness", .. })
        ));
    }

    #[test]
    fn resolution_prefers_nearest_params() {
        let own = FragmentParams {
            density: 1.0,
            ..Default::default()
        };
        let root = FragmentParams {
            density: 2.0,
            ..Default::default()
        };
        assert_eq!(resolve_params([Some(&own), None, Some(&root)]).density, 1.0);
        assert_eq!(resolve_params([None, None, Some(&root)]).density, 2.0);
        assert_eq!(resolve_params([None, None]), FragmentParams::default());
    }

    #[test]
    fn seeded_rngs_are_reproducible_per_stream() {
        let config = ShatterConfig {
            seed: Some(42),
            ..Default::default()
        };
        let a: u32 = config.rng(1).gen();
        let b: u32 = config.rng(1).gen();
        let c: u32 = config.rng(2).gen();
        assert_eq!(a, b);
        assert_ne!(a, c, "distinct streams should not collide");
    }

    #[test]
    fn site_mode_selects_site_count() {
        let params = FragmentParams::default();
        assert_eq!(params.site_count(SiteMode::PerTriangle), SiteCount::Fixed(20));
        assert_eq!(params.site_count(SiteMode::ByArea), SiteCount::TargetArea(50.0));
    }
}

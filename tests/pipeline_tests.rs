//! End-to-end tests of the fragmentation and destruction pipelines.
//!
//! Everything runs against the parry-backed physics world with a fixed seed,
//! so results are deterministic and no Bevy app is needed.
//!
//! Covered scenarios:
//! 1. Fragment graphs are symmetric and fragments carry density × volume mass.
//! 2. A zero budget yields but produces the same body as an unsliced run.
//! 3. Explosions release hit fragments and keep counts consistent; cutting
//!    through a wall releases the part that lost its support.
//! 4. Bodies without anchors, or hit everywhere, collapse completely.
//! 5. Joint-break events and delayed disposal.
//! 6. Destroyer mutual exclusion and its full cycle.

use bevy::math::{Affine3A, Vec3};
use rubble::budget::FrameBudget;
use rubble::destroyer::{DestroyableState, Destroyer};
use rubble::explosion::ExplosionRequest;
use rubble::physics::ParryWorld;
use rubble::scene::{AnchorVolume, BodyId, BodyStatus, FragmentState, SourceBody, SourceMesh};
use rubble::{FragmentParams, Runtime, ShatterConfig, ShatterError, SiteMode, TaskStatus};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn config(budget_ms: u64) -> ShatterConfig {
    ShatterConfig {
        seed: Some(1234),
        budget_ms,
        fragment: FragmentParams {
            sites_per_triangle: 5,
            density: 1000.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// 2 × 2 wall in the XY plane whose bottom edge rests on an anchor slab.
fn wall_runtime(budget_ms: u64, anchored: bool) -> (Runtime<ParryWorld>, BodyId) {
    let mut rt = Runtime::new(ParryWorld::new(), config(budget_ms));
    let scene = rt.scene_mut();
    let mut wall = SourceBody::new("Wall", SourceMesh::quad(2.0, 2.0))
        .with_placement(Affine3A::from_translation(Vec3::new(0.0, 1.0, 0.0)));
    if anchored {
        let ground = scene.add_anchor(AnchorVolume::axis_aligned(
            Vec3::new(0.0, -0.5, 0.0),
            Vec3::new(3.0, 0.55, 3.0),
        ));
        wall = wall.with_anchors([ground]);
    }
    let source = scene.add_source(wall);
    (rt, source)
}

/// Fragment `source` to completion and return the fragmented body.
fn fragment(rt: &mut Runtime<ParryWorld>, source: BodyId) -> BodyId {
    let task = rt.fragment(source, None, SiteMode::PerTriangle);
    rt.run_until_idle(100_000);
    assert_eq!(rt.status(task), TaskStatus::Finished, "fragmentation must finish");
    rt.fragment_stats(task)
        .and_then(|s| s.fragmented_body)
        .expect("finished task publishes its body")
}

fn explode(rt: &mut Runtime<ParryWorld>, request: ExplosionRequest) -> rubble::explosion::ExplosionStats {
    let task = rt.explode(request);
    rt.run_until_idle(100_000);
    assert_eq!(rt.status(task), TaskStatus::Finished, "explosion must finish");
    rt.explosion_stats(task).expect("stats of finished explosion")
}

// ── Fragmentation ─────────────────────────────────────────────────────────────

#[test]
fn fragment_graph_edges_are_symmetric() {
    let (mut rt, source) = wall_runtime(15, true);
    let body = fragment(&mut rt, source);
    let graph = rt.scene().body(body).unwrap().graph.as_ref().unwrap();
    let ids = graph.fragments();
    assert!(graph.graph().edge_count() > 0, "a wall must have connections");
    for &a in &ids {
        for &b in &ids {
            assert_eq!(
                graph.graph().contains_edge(a, b),
                graph.graph().contains_edge(b, a),
                "edge {a}–{b} must be symmetric"
            );
        }
    }
}

#[test]
fn fragments_have_positive_volume_and_density_mass() {
    let (mut rt, source) = wall_runtime(15, true);
    let body = fragment(&mut rt, source);
    let density = rt.scene().body(body).unwrap().params.density;
    let mut seen = 0;
    for f in rt.scene().fragments().filter(|f| f.body == Some(body)) {
        assert!(f.volume > 0.0, "{} has volume {}", f.id, f.volume);
        assert!(
            (f.mass - density * f.volume).abs() <= 1e-3 * f.mass.max(1.0),
            "{} mass {} != {} × {}",
            f.id,
            f.mass,
            density,
            f.volume
        );
        seen += 1;
    }
    let graph = rt.scene().body(body).unwrap().graph.as_ref().unwrap();
    assert_eq!(seen, graph.initial_fragment_count());
    assert_eq!(graph.current_fragment_count(), graph.initial_fragment_count());
}

#[test]
fn zero_budget_yields_and_matches_unsliced_run() {
    let (mut sliced, sliced_source) = wall_runtime(0, true);
    let task = sliced.fragment(sliced_source, None, SiteMode::PerTriangle);
    sliced.run_until_idle(100_000);
    let sliced_stats = sliced.fragment_stats(task).unwrap();
    assert!(sliced_stats.clock.yields >= 1, "zero budget must yield at least once");

    let (mut whole, whole_source) = wall_runtime(u64::MAX / 4, true);
    let task = whole.fragment(whole_source, None, SiteMode::PerTriangle);
    assert_eq!(whole.tick(), 1, "a generous budget finishes in one tick");
    let whole_stats = whole.fragment_stats(task).unwrap();
    assert_eq!(whole_stats.clock.yields, 0);

    assert_eq!(sliced_stats.fragments, whole_stats.fragments);
    assert_eq!(sliced_stats.rejected_sites, whole_stats.rejected_sites);
    let edges = |rt: &Runtime<ParryWorld>, body| {
        let g = rt.scene().body(body).unwrap().graph.as_ref().unwrap();
        (g.graph().edge_count(), g.initial_anchored_count())
    };
    assert_eq!(
        edges(&sliced, sliced_stats.fragmented_body.unwrap()),
        edges(&whole, whole_stats.fragmented_body.unwrap()),
        "same seed, same graph"
    );
}

#[test]
fn area_mode_produces_fewer_sites_on_small_props() {
    let (mut rt, source) = wall_runtime(15, true);
    let task = rt.fragment(source, None, SiteMode::ByArea);
    rt.run_until_idle(100_000);
    let stats = rt.fragment_stats(task).unwrap();
    // two triangles of area 2 with max_area 50: three sites each
    assert!(stats.fragments <= 6, "got {} fragments", stats.fragments);
    assert!(stats.fragments > 0);
}

// ── Destruction ───────────────────────────────────────────────────────────────

#[test]
fn explosion_releases_hit_fragments_and_keeps_counts() {
    let (mut rt, source) = wall_runtime(15, true);
    let body = fragment(&mut rt, source);
    let initial = rt.scene().body(body).unwrap().graph.as_ref().unwrap().initial_fragment_count();

    let stats = explode(&mut rt, ExplosionRequest::new(Vec3::new(0.0, 1.8, 0.0), 0.4, 10.0));
    assert!(stats.is_done);
    assert!(stats.fragments_exploded >= 1, "something near the top must be hit");

    let record = rt.scene().body(body).unwrap();
    if let Some(graph) = record.graph.as_ref() {
        assert_eq!(graph.current_fragment_count(), graph.graph().node_count());
        assert_eq!(
            graph.current_fragment_count(),
            initial - stats.fragments_exploded - stats.fragments_detached
        );
        for id in graph.fragments() {
            assert_eq!(rt.scene().fragment(id).unwrap().state, FragmentState::Frozen);
        }
    } else {
        assert!(stats.destroyed_all);
    }

    let moving = rt
        .scene()
        .fragments()
        .filter(|f| f.state == FragmentState::Moving)
        .count();
    assert_eq!(moving, stats.fragments_exploded + stats.fragments_detached);
    for f in rt.scene().fragments().filter(|f| f.state == FragmentState::Moving) {
        assert_eq!(f.body, None, "released fragments leave their body");
        assert!(!f.listening);
    }
}

#[test]
fn blast_covering_the_whole_wall_destroys_it() {
    let (mut rt, source) = wall_runtime(15, true);
    let body = fragment(&mut rt, source);
    let stats = explode(&mut rt, ExplosionRequest::new(Vec3::new(0.0, 1.0, 0.0), 50.0, 10.0));
    assert!(stats.destroyed_all);
    let record = rt.scene().body(body).unwrap();
    assert_eq!(record.status, BodyStatus::Destroyed);
    assert!(record.graph.is_none(), "graph is released on collapse");
}

#[test]
fn unanchored_body_collapses_on_first_hit() {
    let (mut rt, source) = wall_runtime(15, false);
    let body = fragment(&mut rt, source);
    let initial = rt.scene().body(body).unwrap().graph.as_ref().unwrap().initial_fragment_count();

    let stats = explode(&mut rt, ExplosionRequest::new(Vec3::new(0.9, 1.9, 0.0), 0.3, 1.0));
    assert!(stats.fragments_exploded >= 1);
    assert!(stats.destroyed_all);
    assert_eq!(stats.fragments_exploded + stats.fragments_detached, initial);
    assert!(rt.scene().body(body).unwrap().is_destroyed());
}

#[test]
fn second_explosion_only_pushes_moving_fragments() {
    let (mut rt, source) = wall_runtime(15, true);
    fragment(&mut rt, source);
    let request = ExplosionRequest::new(Vec3::new(0.0, 1.8, 0.0), 0.4, 10.0);
    let first = explode(&mut rt, request);
    let moving_before: Vec<_> = rt
        .scene()
        .fragments()
        .filter(|f| f.state == FragmentState::Moving)
        .map(|f| f.id)
        .collect();

    let tiny = ExplosionRequest::new(rt.scene().fragment(moving_before[0]).unwrap().position, 0.001, 10.0);
    let second = explode(&mut rt, tiny);
    assert!(first.fragments_exploded >= 1);
    assert_eq!(second.fragments_exploded, 0, "moving fragments are not exploded again");
}

#[test]
fn cutting_a_band_detaches_the_unsupported_top() {
    let (mut rt, source) = wall_runtime(15, true);
    let mut cfg = config(15);
    cfg.fragment.sites_per_triangle = 40;
    rt.set_config(cfg);
    let body = fragment(&mut rt, source);

    // Two overlapping rows of small blasts clear every fragment crossing
    // y = 1.1 or y = 1.35, so nothing above the band touches anything below.
    let (mut exploded, mut detached) = (0, 0);
    for y in [1.1, 1.35] {
        for i in 0..=8 {
            let x = -1.0 + 0.25 * i as f32;
            let stats = explode(&mut rt, ExplosionRequest::new(Vec3::new(x, y, 0.0), 0.25, 10.0));
            assert!(!stats.destroyed_all, "the anchored lower part must keep the wall standing");
            exploded += stats.fragments_exploded;
            detached += stats.fragments_detached;
        }
    }
    assert!(exploded > 0);
    assert!(detached > 0, "the top lost its support and must be released");

    let record = rt.scene().body(body).unwrap();
    assert_eq!(record.status, BodyStatus::Standing);
    let graph = record.graph.as_ref().unwrap();
    assert!(graph.current_fragment_count() > 0);
    assert_eq!(
        graph.current_fragment_count(),
        graph.initial_fragment_count() - exploded - detached
    );
    let mut fill = graph.flood_from_anchors();
    while !fill.advance(graph.graph(), &FrameBudget::unlimited()) {}
    assert!(graph.unreached(&fill).is_empty(), "every survivor is still supported");
    for id in graph.fragments() {
        let f = rt.scene().fragment(id).unwrap();
        assert_eq!(f.state, FragmentState::Frozen);
        assert!(f.position.y < 1.1, "{} at {} survived above the cut", f.id, f.position);
    }
}

#[test]
fn invalid_config_fails_fragmentation_without_leftovers() {
    let (mut rt, source) = wall_runtime(15, true);
    let mut cfg = config(15);
    cfg.min_contraction = 0.3;
    cfg.max_contraction = 0.2;
    rt.set_config(cfg);

    let task = rt.fragment(source, None, SiteMode::PerTriangle);
    rt.run_until_idle(100);
    assert!(matches!(
        rt.status(task),
        TaskStatus::Failed(ShatterError::InvalidParams { .. })
    ));
    assert_eq!(rt.scene().bodies().count(), 0);
    assert_eq!(rt.scene().fragments().count(), 0);
    assert!(rt.scene().source(source).is_some());
}

#[test]
fn invalid_explosion_is_reported_through_status() {
    let (mut rt, _) = wall_runtime(15, true);
    let task = rt.explode(ExplosionRequest::new(Vec3::ZERO, 1.0, 0.0));
    rt.run_until_idle(10);
    assert!(matches!(
        rt.status(task),
        TaskStatus::Failed(ShatterError::InvalidExplosion { .. })
    ));
}

// ── Listener & disposal ───────────────────────────────────────────────────────

#[test]
fn joint_break_removes_edge_one_frame_late() {
    let (mut rt, source) = wall_runtime(15, true);
    let body = fragment(&mut rt, source);
    let graph = rt.scene().body(body).unwrap().graph.as_ref().unwrap();
    let (a, joint) = graph
        .fragments()
        .into_iter()
        .find_map(|id| graph.joints_of(id).ok()?.first().map(|j| (id, *j)))
        .expect("wall has at least one joint");
    let (x, y) = graph.endpoints(joint).unwrap();
    assert!(a == x || a == y);

    assert!(rt.scene_mut().physics.break_joint(joint));
    assert_eq!(rt.scene_mut().process_joint_breaks(), 0, "queued, not applied yet");
    assert!(rt.scene().body(body).unwrap().graph.as_ref().unwrap().is_connected(x, y));

    assert_eq!(rt.scene_mut().process_joint_breaks(), 1);
    assert!(!rt.scene().body(body).unwrap().graph.as_ref().unwrap().is_connected(x, y));
}

#[test]
fn released_fragments_are_disposed_after_delay() {
    let (mut rt, source) = wall_runtime(15, true);
    fragment(&mut rt, source);
    let stats = explode(&mut rt, ExplosionRequest::new(Vec3::new(0.0, 1.8, 0.0), 0.4, 10.0));
    let released = stats.fragments_exploded + stats.fragments_detached;
    assert!(released > 0);

    let max_delay = rt.config().fragment_max_destroy_delay;
    assert_eq!(rt.scene_mut().advance(0.0), 0, "nothing is due immediately");
    let disposed = rt.scene_mut().advance(max_delay + 0.1);
    assert_eq!(disposed, released);
    for f in rt.scene().fragments().filter(|f| f.state == FragmentState::Destroyed) {
        assert!(f.collider.is_none());
        assert!(!f.visible);
    }
}

/// Collapse an unanchored wall and return the joints left in the physics world.
fn joints_after_collapse(immediate: bool) -> usize {
    let (mut rt, source) = wall_runtime(15, false);
    fragment(&mut rt, source);
    assert!(rt.scene().physics.joint_count() > 0, "a wall must have joints");
    let mut request = ExplosionRequest::new(Vec3::new(0.9, 1.9, 0.0), 0.3, 10.0);
    if immediate {
        request = request.with_immediate_severance();
    }
    let stats = explode(&mut rt, request);
    assert!(stats.destroyed_all);
    rt.scene().physics.joint_count()
}

#[test]
fn immediate_severance_removes_collapse_joints_at_once() {
    let delayed = joints_after_collapse(false);
    assert!(delayed > 0, "collapse without severance removes joints on a delay");
    assert_eq!(joints_after_collapse(true), 0, "severance removes every joint at once");
}

#[test]
fn delayed_collapse_joints_go_once_their_delay_passes() {
    let (mut rt, source) = wall_runtime(15, false);
    fragment(&mut rt, source);
    explode(&mut rt, ExplosionRequest::new(Vec3::new(0.9, 1.9, 0.0), 0.3, 10.0));
    assert!(rt.scene().physics.joint_count() > 0);
    let max_delay = rt.config().joint_max_destroy_delay;
    rt.scene_mut().advance(max_delay + 0.1);
    assert_eq!(rt.scene().physics.joint_count(), 0);
}

// ── Destroyer ─────────────────────────────────────────────────────────────────

#[test]
fn destroyer_refuses_busy_targets() {
    let (mut rt, source) = wall_runtime(15, true);
    let mut destroyer = Destroyer::new(rt.config());
    destroyer.register(source, "Wall");

    destroyer.fragment_now(source, &mut rt).unwrap();
    assert!(matches!(
        destroyer.fragment_now(source, &mut rt),
        Err(ShatterError::TargetBusy { .. })
    ));
    assert!(matches!(
        destroyer.explode_now(source, &mut rt),
        Err(ShatterError::TargetBusy { .. })
    ));
    assert!(matches!(
        destroyer.fragment_now(BodyId(999), &mut rt),
        Err(ShatterError::UnknownBody { .. })
    ));
}

#[test]
fn destroyer_fragments_then_explodes_props() {
    let mut cfg = config(15);
    cfg.misc_start_min = 0.0;
    cfg.misc_start_max = 0.0;
    cfg.trigger_chance = 1.0;
    cfg.pick_chance = 1.0;
    let mut rt = Runtime::new(ParryWorld::new(), cfg);
    let scene = rt.scene_mut();
    let ground = scene.add_anchor(AnchorVolume::axis_aligned(Vec3::new(0.0, -0.5, 0.0), Vec3::new(3.0, 0.55, 3.0)));
    let door = scene.add_source(
        SourceBody::new("Door", SourceMesh::quad(1.0, 2.0))
            .with_placement(Affine3A::from_translation(Vec3::new(0.0, 1.0, 0.0)))
            .with_anchors([ground]),
    );
    let mut destroyer = Destroyer::new(rt.config());
    destroyer.register(door, "Door");

    let mut exploded = false;
    for frame in 0..2000 {
        destroyer.update(1.0 + frame as f32 * 0.1, &mut rt);
        rt.tick();
        let state = destroyer.get(door).unwrap().state;
        if matches!(state, DestroyableState::Exploding(_)) {
            exploded = true;
        }
        if matches!(state, DestroyableState::Destroyed) {
            break;
        }
    }
    let entry = destroyer.get(door).unwrap();
    assert!(exploded, "door must reach the explosion stage");
    assert_ne!(entry.current, door, "entry follows the fragmented body");
    assert!(
        matches!(entry.state, DestroyableState::Destroyed | DestroyableState::Fragmented | DestroyableState::Exploding(_)),
        "unexpected state {:?}",
        entry.state
    );
    assert!(rt.scene().source(door).is_none(), "source retired after fragmentation");
}

use trackstudio::calibration::Point2;
use trackstudio::detect::ObjectClass;
use trackstudio::fusion::{FusionConfig, FusionEngine, GroundObservation};
use trackstudio::CameraId;

fn observation(camera: u32, local: &str, x: f64, y: f64, confidence: f32) -> GroundObservation {
    GroundObservation {
        camera_id: CameraId(camera),
        local_track_id: local.to_string(),
        position: Point2::new(x, y),
        confidence,
        class: ObjectClass::Person,
    }
}

fn engine(threshold: f64, expiry_ticks: u32) -> FusionEngine {
    FusionEngine::new(FusionConfig {
        distance_threshold: threshold,
        expiry_ticks,
        trajectory_capacity: 8,
        velocity_alpha: 0.5,
    })
}

#[test]
fn two_cameras_seeing_one_person_fuse_in_one_tick() {
    let mut fusion = engine(50.0, 5);
    let summary = fusion.update(
        &[
            observation(0, "cam0_1", 300.0, 300.0, 0.9),
            observation(1, "cam1_4", 320.0, 310.0, 0.7),
        ],
        0.0,
    );
    assert_eq!(summary.spawned.len(), 1);
    assert_eq!(summary.absorbed, 1);
    assert_eq!(fusion.tracks().len(), 1);

    let track = &fusion.tracks()[0];
    assert_eq!(track.cameras.len(), 2);
    assert_eq!(track.position, Point2::new(300.0, 300.0));
    assert_eq!(fusion.stats().multi_camera_associations, 1);
}

#[test]
fn tracks_beyond_threshold_stay_separate() {
    let mut fusion = engine(50.0, 5);
    fusion.update(
        &[
            observation(0, "cam0_1", 100.0, 100.0, 0.9),
            observation(1, "cam1_1", 400.0, 400.0, 0.9),
        ],
        0.0,
    );
    assert_eq!(fusion.tracks().len(), 2);
    assert_eq!(fusion.stats().total_created, 2);
}

#[test]
fn one_camera_never_merges_its_own_tracks() {
    let mut fusion = engine(50.0, 5);
    fusion.update(
        &[
            observation(0, "cam0_1", 100.0, 100.0, 0.9),
            observation(0, "cam0_2", 110.0, 100.0, 0.8),
        ],
        0.0,
    );
    assert_eq!(fusion.tracks().len(), 2);
}

#[test]
fn matched_track_follows_its_observation() {
    let mut fusion = engine(50.0, 5);
    fusion.update(&[observation(0, "cam0_1", 100.0, 100.0, 0.9)], 0.0);
    let id = fusion.tracks()[0].id;

    for tick in 1..=4 {
        let x = 100.0 + 10.0 * f64::from(tick);
        let summary = fusion.update(
            &[observation(0, "cam0_1", x, 100.0, 0.6)],
            f64::from(tick) * 100.0,
        );
        assert_eq!(summary.matched, 1);
    }

    let track = &fusion.tracks()[0];
    assert_eq!(track.id, id);
    assert_eq!(track.position, Point2::new(140.0, 100.0));
    assert_eq!(track.confidence, 0.6);
    assert_eq!(track.trajectory.len(), 5);
    assert_eq!(track.hits, 5);
    let (vx, vy) = track.velocity();
    assert!((vx - 100.0).abs() < 1e-9);
    assert_eq!(vy, 0.0);
}

#[test]
fn trajectory_is_capped() {
    let mut fusion = engine(50.0, 5);
    for tick in 0..20 {
        fusion.update(
            &[observation(0, "cam0_1", 100.0 + f64::from(tick), 100.0, 0.9)],
            f64::from(tick) * 100.0,
        );
    }
    let track = &fusion.tracks()[0];
    assert_eq!(track.trajectory.len(), 8);
    assert_eq!(track.trajectory.iter().next().map(|p| p.x), Some(112.0));
}

#[test]
fn expired_track_never_returns_with_its_old_id() {
    let mut fusion = engine(50.0, 3);
    fusion.update(&[observation(0, "cam0_1", 200.0, 200.0, 0.9)], 0.0);
    let old_id = fusion.tracks()[0].id;

    for tick in 1..=3 {
        let summary = fusion.update(&[], f64::from(tick) * 100.0);
        assert!(summary.expired.is_empty());
    }
    let summary = fusion.update(&[], 400.0);
    assert_eq!(summary.expired, vec![old_id]);
    assert!(fusion.tracks().is_empty());

    fusion.update(&[observation(0, "cam0_1", 200.0, 200.0, 0.9)], 500.0);
    assert_eq!(fusion.tracks().len(), 1);
    assert_ne!(fusion.tracks()[0].id, old_id);
    assert_eq!(fusion.stats().total_expired, 1);
}

#[test]
fn closest_observation_wins_the_track() {
    let mut fusion = engine(50.0, 5);
    fusion.update(&[observation(0, "cam0_1", 100.0, 100.0, 0.9)], 0.0);
    let id = fusion.tracks()[0].id;

    let summary = fusion.update(
        &[
            observation(0, "cam0_7", 130.0, 100.0, 0.9),
            observation(0, "cam0_1", 105.0, 100.0, 0.9),
        ],
        100.0,
    );
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.spawned.len(), 1);
    let kept = fusion.tracks().iter().find(|t| t.id == id).unwrap();
    assert_eq!(kept.position, Point2::new(105.0, 100.0));
}

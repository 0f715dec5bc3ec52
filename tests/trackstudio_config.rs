use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use trackstudio::config::TrackstudioConfig;
use trackstudio::CameraId;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRACKSTUDIO_CONFIG",
        "TRACKSTUDIO_SIGNALING_ADDR",
        "TRACKSTUDIO_CALIBRATION_PATH",
        "TRACKSTUDIO_SYNC_TOLERANCE_MS",
        "TRACKSTUDIO_FUSION_THRESHOLD",
        "TRACKSTUDIO_FUSION_EXPIRY_TICKS",
        "TRACKSTUDIO_VISION_FPS",
        "TRACKSTUDIO_TRACKER",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TrackstudioConfig::load().expect("load defaults");
    assert_eq!(cfg.signaling.addr, "127.0.0.1:8765");
    assert_eq!(cfg.cameras.len(), 2);
    assert_eq!(cfg.sync.tolerance_ms, 150.0);
    assert_eq!(cfg.sync.capacity, 30);
    assert_eq!(cfg.fusion.distance_threshold, 50.0);
    assert_eq!(cfg.fusion.expiry_ticks, 30);
    assert_eq!(cfg.session.connect_timeout, Duration::from_secs(15));
    assert_eq!(cfg.session.max_retries, 3);
    assert_eq!(cfg.vision.tracker, "stub");
    assert_eq!(cfg.canvas_size, 600.0);
    assert!(cfg.stream_delays.is_empty());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "signaling": { "addr": "0.0.0.0:9100", "keepalive_secs": 10 },
        "calibration": { "path": "/var/lib/trackstudio/calibration.json", "canvas_size": 800 },
        "cameras": [
            { "id": 0, "name": "Gate", "url": "stub://gate" },
            { "id": 3, "url": "stub://yard" },
            { "id": 5, "url": "rtsp://spare", "enabled": false }
        ],
        "sync": { "tolerance_ms": 100, "capacity": 60 },
        "fusion": { "distance_threshold": 75, "trajectory_capacity": 50 },
        "session": { "connect_timeout_ms": 5000, "max_retries": 5 },
        "vision": { "fps": 5 },
        "stream_delays": { "3": 250 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("TRACKSTUDIO_CONFIG", file.path());
    std::env::set_var("TRACKSTUDIO_FUSION_EXPIRY_TICKS", "12");
    std::env::set_var("TRACKSTUDIO_SYNC_TOLERANCE_MS", "120");

    let cfg = TrackstudioConfig::load().expect("load config");

    assert_eq!(cfg.signaling.addr, "0.0.0.0:9100");
    assert_eq!(cfg.signaling.keepalive, Duration::from_secs(10));
    assert_eq!(
        cfg.calibration_path.to_str(),
        Some("/var/lib/trackstudio/calibration.json")
    );
    assert_eq!(cfg.canvas_size, 800.0);
    assert_eq!(cfg.cameras.len(), 3);
    assert_eq!(cfg.cameras[1].name, "Camera 3");
    assert!(!cfg.cameras[2].enabled);
    assert_eq!(cfg.camera_set().unwrap().enabled_ids(), vec![CameraId(0), CameraId(3)]);
    assert_eq!(cfg.sync.tolerance_ms, 120.0);
    assert_eq!(cfg.session.sync.tolerance_ms, 120.0);
    assert_eq!(cfg.sync.capacity, 60);
    assert_eq!(cfg.sync.max_age_ms, 1000.0);
    assert_eq!(cfg.fusion.distance_threshold, 75.0);
    assert_eq!(cfg.fusion.expiry_ticks, 12);
    assert_eq!(cfg.fusion.trajectory_capacity, 50);
    assert_eq!(cfg.session.connect_timeout, Duration::from_secs(5));
    assert_eq!(cfg.session.negotiate_timeout, Duration::from_secs(20));
    assert_eq!(cfg.session.max_retries, 5);
    assert_eq!(cfg.vision.fps, 5.0);
    assert_eq!(cfg.stream_delays.get(&CameraId(3)), Some(&250));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        [signaling]
        addr = "127.0.0.1:9200"

        [[cameras]]
        id = 1
        url = "stub://north"

        [fusion]
        distance_threshold = 40.0
        expiry_ticks = 8

        [vision]
        tracker = "stub"
        fps = 15.0
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("TRACKSTUDIO_CONFIG", file.path());
    std::env::set_var("TRACKSTUDIO_SIGNALING_ADDR", "127.0.0.1:9300");

    let cfg = TrackstudioConfig::load().expect("load config");
    assert_eq!(cfg.signaling.addr, "127.0.0.1:9300");
    assert_eq!(cfg.cameras.len(), 1);
    assert_eq!(cfg.cameras[0].id, CameraId(1));
    assert_eq!(cfg.fusion.distance_threshold, 40.0);
    assert_eq!(cfg.fusion.expiry_ticks, 8);
    assert_eq!(cfg.vision.fps, 15.0);

    clear_env();
}

#[test]
fn rejects_out_of_range_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRACKSTUDIO_FUSION_THRESHOLD", "0");
    assert!(TrackstudioConfig::load().is_err());
    clear_env();

    std::env::set_var("TRACKSTUDIO_SYNC_TOLERANCE_MS", "500");
    assert!(TrackstudioConfig::load().is_err());
    clear_env();

    std::env::set_var("TRACKSTUDIO_VISION_FPS", "0");
    assert!(TrackstudioConfig::load().is_err());
    clear_env();

    std::env::set_var("TRACKSTUDIO_FUSION_EXPIRY_TICKS", "many");
    assert!(TrackstudioConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "cameras": [
            { "id": 0, "url": "stub://a" },
            { "id": 1, "url": "stub://b" },
            { "id": 2, "url": "stub://c" },
            { "id": 3, "url": "stub://d" },
            { "id": 4, "url": "stub://e" }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("TRACKSTUDIO_CONFIG", file.path());
    assert!(TrackstudioConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "stream_delays": { "0": 6000 } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("TRACKSTUDIO_CONFIG", file.path());
    assert!(TrackstudioConfig::load().is_err());

    clear_env();
}

use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use object_tally::config::TallyConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TALLY_CONFIG",
        "TALLY_SOURCE",
        "TALLY_BACKEND",
        "TALLY_MODEL_PATH",
        "TALLY_DASHBOARD_ADDR",
        "TALLY_TRACKED_LABELS",
        "TALLY_CONFIDENCE",
        "TALLY_OVERLAP",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let cfg = TallyConfig::load().expect("load defaults");

    assert_eq!(cfg.source.uri, "0");
    assert_eq!(cfg.source.width, 640);
    assert_eq!(cfg.source.height, 480);
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.parameters.confidence_threshold(), 0.5);
    assert_eq!(cfg.parameters.overlap_threshold(), 0.5);
    assert!(cfg.parameters.class_agnostic_suppression());
    assert_eq!(
        cfg.tracked_labels.iter().collect::<Vec<_>>(),
        vec!["bottle", "hotpack"]
    );
    assert_eq!(cfg.dashboard.addr, "127.0.0.1:8790");
    assert_eq!(cfg.dashboard.jpeg_quality, 80);
    assert!(cfg.cycle_interval.is_none());
    assert!(cfg.max_cycles.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let file = write_config(
        r#"{
            "source": {
                "uri": "stub://bench",
                "width": 320,
                "height": 240,
                "target_fps": 15,
                "max_frames": 50
            },
            "detector": {
                "backend": "Stub",
                "input_size": 416
            },
            "parameters": {
                "confidence": 0.3,
                "overlap": 0.45,
                "agnostic": false
            },
            "tracked_labels": ["bottle", "cup", "bottle"],
            "dashboard": {
                "addr": "127.0.0.1:9100",
                "jpeg_quality": 60
            },
            "pacing": {
                "cycle_interval_ms": 100,
                "max_cycles": 500
            }
        }"#,
    );

    std::env::set_var("TALLY_CONFIG", file.path());
    std::env::set_var("TALLY_SOURCE", "/dev/video2");
    std::env::set_var("TALLY_CONFIDENCE", "0.7");
    std::env::set_var("TALLY_TRACKED_LABELS", "hotpack, bottle,");

    let cfg = TallyConfig::load().expect("load config");

    assert_eq!(cfg.source.uri, "/dev/video2");
    assert_eq!(cfg.source.width, 320);
    assert_eq!(cfg.source.height, 240);
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.source.max_frames, Some(50));
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.input_size, 416);
    assert_eq!(cfg.parameters.confidence_threshold(), 0.7);
    assert_eq!(cfg.parameters.overlap_threshold(), 0.45);
    assert!(!cfg.parameters.class_agnostic_suppression());
    assert_eq!(
        cfg.tracked_labels.iter().collect::<Vec<_>>(),
        vec!["hotpack", "bottle"]
    );
    assert_eq!(cfg.dashboard.addr, "127.0.0.1:9100");
    assert_eq!(cfg.dashboard.jpeg_quality, 60);
    assert_eq!(cfg.cycle_interval, Some(Duration::from_millis(100)));
    assert_eq!(cfg.max_cycles, Some(500));

    clear_env();
}

#[test]
fn file_labels_are_deduplicated_in_order() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let file = write_config(r#"{ "tracked_labels": ["cup", "bottle", "cup"] }"#);
    let cfg = TallyConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(
        cfg.tracked_labels.iter().collect::<Vec<_>>(),
        vec!["cup", "bottle"]
    );
}

#[test]
fn rejects_out_of_range_thresholds() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let file = write_config(r#"{ "parameters": { "confidence": 1.5 } }"#);
    assert!(TallyConfig::load_from(Some(file.path())).is_err());

    std::env::set_var("TALLY_OVERLAP", "-0.1");
    assert!(TallyConfig::load().is_err());
    std::env::set_var("TALLY_OVERLAP", "half");
    assert!(TallyConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_empty_labels_and_bad_jpeg_quality() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let empty = write_config(r#"{ "tracked_labels": [] }"#);
    assert!(TallyConfig::load_from(Some(empty.path())).is_err());

    let blank = write_config(r#"{ "tracked_labels": ["bottle", " "] }"#);
    assert!(TallyConfig::load_from(Some(blank.path())).is_err());

    let quality = write_config(r#"{ "dashboard": { "jpeg_quality": 0 } }"#);
    assert!(TallyConfig::load_from(Some(quality.path())).is_err());
}

#[test]
fn rejects_unreadable_or_malformed_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let malformed = write_config("{ not json");
    let err = TallyConfig::load_from(Some(malformed.path())).expect_err("malformed");
    assert!(err.to_string().contains("invalid config file"));

    let missing = malformed.path().with_extension("missing");
    let err = TallyConfig::load_from(Some(&missing)).expect_err("missing");
    assert!(err.to_string().contains("failed to read config file"));
}

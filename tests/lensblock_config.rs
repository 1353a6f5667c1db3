use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use lensblock::{LensConfig, LiveSettings, ProtectionMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LENSBLOCK_CONFIG",
        "LENSBLOCK_CAMERA_INDEX",
        "LENSBLOCK_CAMERA_URI",
        "LENSBLOCK_MODEL_PATH",
        "LENSBLOCK_AUDIT_DB",
        "LENSBLOCK_MODE",
        "LENSBLOCK_VIRTUAL_CAMERA",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(toml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [detection]
        confidence_threshold = 0.45
        persistence_frames = 5
        lockout_duration_seconds = 20
        model_path = "models/custom.onnx"
        fail_closed = true

        [logging]
        enable_forensic_logging = false

        [system]
        camera_index = 2
        width = 1280
        height = 720
        fps = 15
        protection_mode = "censorship"

        [output]
        virtual_camera = "/dev/video20"
        "#,
    );

    std::env::set_var("LENSBLOCK_CONFIG", file.path());
    std::env::set_var("LENSBLOCK_CAMERA_INDEX", "1");
    std::env::set_var("LENSBLOCK_AUDIT_DB", "/tmp/audit.db");

    let cfg = LensConfig::load().expect("load config");

    assert_eq!(cfg.detection.confidence_threshold, 0.45);
    assert_eq!(cfg.detection.persistence_frames, 5);
    assert_eq!(cfg.detection.lockout_duration_seconds, 20);
    assert_eq!(cfg.detection.model_path.to_str(), Some("models/custom.onnx"));
    assert!(cfg.detection.fail_closed);
    assert!(!cfg.logging.enable_forensic_logging);
    assert_eq!(cfg.logging.audit_db_path.to_str(), Some("/tmp/audit.db"));
    assert_eq!(cfg.system.camera_index, 1);
    assert_eq!(cfg.camera_uri(), "/dev/video1");
    assert_eq!(cfg.system.protection_mode, ProtectionMode::Censorship);

    let capture = cfg.capture_config();
    assert_eq!((capture.width, capture.height, capture.fps), (1280, 720, 15));
    let output = cfg.output_config().expect("output configured");
    assert_eq!(output.device, "/dev/video20");
    assert_eq!((output.width, output.height, output.fps), (1280, 720, 15));

    clear_env();
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LENSBLOCK_CONFIG", "/nonexistent/lensblock.toml");
    let cfg = LensConfig::load().expect("defaults");
    assert_eq!(cfg, LensConfig::default());

    clear_env();
}

#[test]
fn malformed_file_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[detection\nconfidence_threshold = ");
    let cfg = LensConfig::load_from(Some(file.path())).expect("defaults");
    assert_eq!(cfg.detection.confidence_threshold, 0.60);
    assert_eq!(cfg.detection.persistence_frames, 3);

    clear_env();
}

#[test]
fn invalid_env_values_are_ignored() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LENSBLOCK_CAMERA_INDEX", "front");
    std::env::set_var("LENSBLOCK_MODE", "blur");
    std::env::set_var("LENSBLOCK_CAMERA_URI", "stub://desk");

    let cfg = LensConfig::load_from(None).expect("load config");
    assert_eq!(cfg.system.camera_index, 0);
    assert_eq!(cfg.system.protection_mode, ProtectionMode::Shield);
    assert_eq!(cfg.camera_uri(), "stub://desk");

    clear_env();
}

#[test]
fn out_of_range_values_fall_back_to_their_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        "[detection]\nconfidence_threshold = 1.5\npersistence_frames = 4\n\n[system]\nfps = 0\nwidth = 800\n",
    );
    let cfg = LensConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.detection.confidence_threshold, 0.60);
    assert_eq!(cfg.detection.persistence_frames, 4);
    assert_eq!(cfg.system.fps, 30);
    assert_eq!(cfg.system.width, 800);
}

#[test]
fn mistyped_key_only_loses_that_key() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [detection]
        confidence_threshold = "high"
        lockout_duration_seconds = 25

        [system]
        protection_mode = "censorship"
        camera_index = -1
        "#,
    );
    let cfg = LensConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.detection.confidence_threshold, 0.60);
    assert_eq!(cfg.detection.lockout_duration_seconds, 25);
    assert_eq!(cfg.system.protection_mode, ProtectionMode::Censorship);
    assert_eq!(cfg.system.camera_index, 0);
}

#[test]
fn live_changes_survive_save_and_reload() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("[system]\nprotection_mode = \"censorship\"\n");
    let mut cfg = LensConfig::load_from(Some(file.path())).expect("load config");

    let live = LiveSettings::from_config(&cfg);
    live.set("detection", "confidence_threshold", "0.8").unwrap();
    live.set("detection", "lockout_duration_seconds", "45").unwrap();
    live.write_back(&mut cfg);
    cfg.save(file.path()).expect("save config");

    let reloaded = LensConfig::load_from(Some(file.path())).expect("reload config");
    assert_eq!(reloaded, cfg);
    assert_eq!(reloaded.detection.confidence_threshold, 0.8);
    assert_eq!(reloaded.system.protection_mode, ProtectionMode::Censorship);
    assert_eq!(
        LiveSettings::from_config(&reloaded).snapshot().lockout_duration,
        Duration::from_secs(45)
    );
}

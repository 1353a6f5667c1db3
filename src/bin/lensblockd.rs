//! lensblockd - LensBlock daemon
//!
//! This daemon:
//! 1. Loads configuration (TOML file, env overrides, CLI flags)
//! 2. Opens the camera and the detection model
//! 3. Runs the threat controller on its own thread
//! 4. Writes protected frames to the virtual camera
//! 5. Records finished incidents in the hash-chained audit log

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use lensblock::detect::InferenceBackend;
use lensblock::ingest::{self, is_camera_unavailable, CaptureConfig, FrameSource};
use lensblock::output::open_virtual_camera;
use lensblock::{
    config::CONFIG_ENV, AuditLog, DetectionEngine, FailurePolicy, LensConfig, LiveSettings,
    ProtectionMode, ScriptedBackend, SqliteAuditLog, ThreatController,
};

/// Model paths with this prefix load a scripted backend instead of a file.
const STUB_MODEL: &str = "stub://";

/// Interval between status lines.
const STATUS_EVERY: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about = "Recording-device detection with lockout and redaction")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Camera URI (/dev/videoN or stub://name); overrides the config
    #[arg(long)]
    camera: Option<String>,

    /// ONNX model path (or stub://); overrides the config
    #[arg(long)]
    model: Option<PathBuf>,

    /// Protection mode at startup (shield|censorship)
    #[arg(long)]
    mode: Option<ProtectionMode>,

    /// Virtual camera device (/dev/videoN or memory://)
    #[arg(long)]
    virtual_camera: Option<String>,

    /// Write live settings back to the config file on shutdown
    #[arg(long)]
    save_on_exit: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = LensConfig::load_from(args.config.as_deref())?;
    apply_args(&mut cfg, &args);
    cfg.validate();

    let settings = LiveSettings::from_config(&cfg);
    let policy = if cfg.detection.fail_closed {
        FailurePolicy::FailClosed
    } else {
        FailurePolicy::FailOpen
    };
    let target_class = cfg.detection.target_class_id;

    let engine = build_engine(&cfg.detection.model_path, target_class, policy);
    let device = ingest::open_device(&cfg.capture_config()).map_err(exit_if_camera_unavailable)?;
    let source: Box<dyn FrameSource> = Box::new(ingest::CameraStream::new(device));

    let mut controller = ThreatController::new(
        source,
        engine,
        settings.clone(),
        cfg.system.protection_mode,
    )
    .with_capture_config(cfg.capture_config())
    .with_camera_factory(Box::new(camera_factory))
    .with_engine_factory(Box::new(move |path: &Path| {
        build_engine(path, target_class, policy)
    }));

    match cfg.output_config() {
        Some(out) => match open_virtual_camera(&out) {
            Ok(vcam) => {
                log::info!("virtual camera: {}", vcam.describe());
                controller = controller.with_virtual_camera(vcam);
            }
            Err(err) => log::error!("{:#}; continuing with preview only", err),
        },
        None => log::warn!("no virtual camera configured; output goes to preview only"),
    }

    if cfg.logging.enable_forensic_logging {
        match SqliteAuditLog::open(&cfg.logging.audit_db_path) {
            Ok(audit) => {
                log::info!("audit log: {}", cfg.logging.audit_db_path.display());
                controller = controller.with_audit_log(Box::new(audit) as Box<dyn AuditLog>);
            }
            Err(err) => log::error!("audit log unavailable: {:#}", err),
        }
    }

    let receivers = controller.receivers();
    let running = controller.spawn().map_err(exit_if_camera_unavailable)?;
    let handle = running.handle();

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!(
        "lensblockd running (mode={}, camera={}). Ctrl-C to stop",
        handle.mode(),
        cfg.camera_uri()
    );

    let mut last_status = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        if let Some(notice) = receivers.lockout.take() {
            if notice.active {
                log::warn!("LOCKDOWN: {}s remaining", notice.remaining_secs);
            } else {
                log::info!("lockdown cleared");
            }
        }
        if let Some(mode) = receivers.mode.take() {
            log::info!("protection mode: {}", mode);
        }
        if last_status.elapsed() >= STATUS_EVERY {
            let stats = handle.stats();
            log::info!(
                "status: frames={} inference_failures={} slow_cycles={} vcam_failures={}",
                stats.frames_processed,
                stats.inference_failures,
                stats.slow_cycles,
                stats.virtual_camera_failures
            );
            last_status = Instant::now();
        }
    }

    log::info!("shutdown signal received, stopping controller...");
    running.stop()?;

    if args.save_on_exit {
        if let Some(path) = args.config.as_deref() {
            settings.write_back(&mut cfg);
            cfg.save(path)?;
            log::info!("settings saved to {}", path.display());
        } else {
            log::warn!("--save-on-exit given without --config; nothing saved");
        }
    }
    Ok(())
}

fn apply_args(cfg: &mut LensConfig, args: &Args) {
    if let Some(camera) = &args.camera {
        cfg.system.camera_uri = Some(camera.clone());
    }
    if let Some(model) = &args.model {
        cfg.detection.model_path = model.clone();
    }
    if let Some(mode) = args.mode {
        cfg.system.protection_mode = mode;
    }
    if let Some(device) = &args.virtual_camera {
        cfg.output.virtual_camera = Some(device.clone());
    }
}

/// Exit with status 2 on `CameraUnavailable`; pass any other error through.
fn exit_if_camera_unavailable(err: anyhow::Error) -> anyhow::Error {
    if is_camera_unavailable(&err) {
        log::error!("{:#}", err);
        std::process::exit(2);
    }
    err
}

fn camera_factory(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    let stream = ingest::start_camera(config)?;
    Ok(Box::new(stream))
}

fn build_engine(model_path: &Path, target_class: usize, policy: FailurePolicy) -> DetectionEngine {
    let loader = move |path: &Path| load_backend(path, target_class);
    DetectionEngine::load(model_path, &loader)
        .with_target_class(target_class)
        .with_failure_policy(policy)
}

fn load_backend(path: &Path, target_class: usize) -> Result<Box<dyn InferenceBackend>> {
    if path.to_string_lossy().starts_with(STUB_MODEL) {
        // A quiet scene: no detections on any frame.
        let backend = ScriptedBackend::new(640, 640, target_class + 1).repeating();
        return Ok(Box::new(backend));
    }
    load_model_file(path)
}

#[cfg(feature = "backend-tract")]
fn load_model_file(path: &Path) -> Result<Box<dyn InferenceBackend>> {
    let backend = lensblock::detect::backends::TractBackend::load(path)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model_file(path: &Path) -> Result<Box<dyn InferenceBackend>> {
    Err(anyhow!(
        "{}: built without backend-tract; only stub:// models are available",
        path.display()
    ))
}

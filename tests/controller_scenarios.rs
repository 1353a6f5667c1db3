use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use lensblock::audit::{StoredIncident, THREAT_INTRUSION, THREAT_OVERRIDDEN, THREAT_REDACTED};
use lensblock::detect::DEFAULT_TARGET_CLASS;
use lensblock::ingest::{is_camera_unavailable, CameraStream, SyntheticCamera};
use lensblock::{
    AuditLog, CaptureConfig, ChannelOrder, CycleOutcome, DetectionEngine, DetectionSettings,
    Frame, FrameSource, IncidentRecord, LiveSettings, MemoryCamera, ProtectionMode,
    ScriptedBackend, ThreatController,
};

const W: u32 = 320;
const H: u32 = 240;
const SCENE: [u8; 3] = [10, 200, 10];

// ----------------------------------------------------------------------------
// Test doubles
// ----------------------------------------------------------------------------

/// Returns the same solid frame on every read once started.
struct SolidSource {
    frame: Frame,
    started: bool,
    paused: Arc<AtomicBool>,
}

impl SolidSource {
    fn new() -> Self {
        Self {
            frame: Frame::solid(W, H, SCENE, ChannelOrder::Rgb),
            started: false,
            paused: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl FrameSource for SolidSource {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn read(&self) -> Option<Frame> {
        self.started.then(|| self.frame.clone())
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.started = false;
    }
}

/// Audit log whose records stay visible to the test after boxing.
#[derive(Clone, Default)]
struct SharedLog {
    records: Arc<Mutex<Vec<IncidentRecord>>>,
}

impl SharedLog {
    fn records(&self) -> Vec<IncidentRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AuditLog for SharedLog {
    fn append(&mut self, record: &IncidentRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<StoredIncident>> {
        Ok(self
            .records()
            .into_iter()
            .enumerate()
            .rev()
            .take(limit)
            .map(|(i, record)| StoredIncident {
                id: i as i64 + 1,
                record,
                entry_hash: [0u8; 32],
            })
            .collect())
    }

    fn verify_chain(&self) -> Result<usize> {
        Err(anyhow!("not chained"))
    }
}

fn settings() -> LiveSettings {
    LiveSettings::from_settings(DetectionSettings {
        confidence_threshold: 0.60,
        persistence_frames: 3,
        lockout_duration: Duration::from_secs(10),
        forensic_logging: true,
    })
}

fn scripted(confidences: &[f32]) -> ScriptedBackend {
    ScriptedBackend::from_confidences(W, W, 80, DEFAULT_TARGET_CLASS, confidences)
}

fn controller(backend: ScriptedBackend, mode: ProtectionMode) -> (ThreatController, SharedLog) {
    let log = SharedLog::default();
    let mut ctl = ThreatController::new(
        Box::new(SolidSource::new()),
        DetectionEngine::new(Box::new(backend)),
        settings(),
        mode,
    )
    .with_audit_log(Box::new(log.clone()))
    .with_latency_budget(Duration::from_secs(5));
    ctl.start_source().unwrap();
    (ctl, log)
}

fn at(t0: Instant, ms: u64) -> Instant {
    t0 + Duration::from_millis(ms)
}

// ----------------------------------------------------------------------------
// Shield
// ----------------------------------------------------------------------------

#[test]
fn three_confident_frames_lock_down() {
    let (mut ctl, _log) = controller(scripted(&[0.7, 0.7, 0.7]), ProtectionMode::Shield);
    let rx = ctl.receivers();
    let t0 = Instant::now();

    assert_eq!(ctl.run_cycle(at(t0, 0)), CycleOutcome::Shield { lockdown: false });
    assert_eq!(ctl.run_cycle(at(t0, 100)), CycleOutcome::Shield { lockdown: false });
    assert_eq!(ctl.run_cycle(at(t0, 200)), CycleOutcome::Shield { lockdown: true });

    let notice = rx.lockout.take().unwrap();
    assert!(notice.active);
    assert_eq!(notice.remaining_secs, 10);
}

#[test]
fn broken_streak_restarts_the_count() {
    let (mut ctl, _log) = controller(
        scripted(&[0.7, 0.3, 0.7, 0.7, 0.7]),
        ProtectionMode::Shield,
    );
    let t0 = Instant::now();
    let outcomes: Vec<_> = (0..5).map(|i| ctl.run_cycle(at(t0, i * 100))).collect();
    assert_eq!(
        outcomes,
        vec![
            CycleOutcome::Shield { lockdown: false },
            CycleOutcome::Shield { lockdown: false },
            CycleOutcome::Shield { lockdown: false },
            CycleOutcome::Shield { lockdown: false },
            CycleOutcome::Shield { lockdown: true },
        ]
    );
}

#[test]
fn lockdown_blocks_output_until_expiry_and_logs_once() {
    let (ctl, log) = controller(scripted(&[0.7, 0.8, 0.7]), ProtectionMode::Shield);
    let vcam = MemoryCamera::new(W, H, 30);
    let sent = vcam.sent();
    let mut ctl = ctl.with_virtual_camera(Box::new(vcam));
    let t0 = Instant::now();

    ctl.run_cycle(at(t0, 0));
    ctl.run_cycle(at(t0, 100));
    assert_eq!(sent.last().unwrap().rgb_at(0, 0), SCENE);

    assert_eq!(ctl.run_cycle(at(t0, 200)), CycleOutcome::Shield { lockdown: true });
    assert_ne!(sent.last().unwrap().rgb_at(0, 0), SCENE);

    // Object gone, timer still running.
    assert_eq!(ctl.run_cycle(at(t0, 5_000)), CycleOutcome::Shield { lockdown: true });
    // Exactly at expiry is not past it.
    assert_eq!(ctl.run_cycle(at(t0, 10_200)), CycleOutcome::Shield { lockdown: true });
    assert!(log.records().is_empty());

    assert_eq!(ctl.run_cycle(at(t0, 10_300)), CycleOutcome::Shield { lockdown: false });
    assert_eq!(sent.last().unwrap().rgb_at(0, 0), SCENE);

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].threat_type, THREAT_INTRUSION);
    assert!((records[0].confidence - 0.8).abs() < 1e-6);
    assert!((records[0].duration_s - 10.1).abs() < 1e-6);

    ctl.run_cycle(at(t0, 20_000));
    assert_eq!(log.records().len(), 1);
}

#[test]
fn continued_presence_slides_the_expiry() {
    let backend = scripted(&[0.7, 0.7, 0.7])
        .with_frame(Vec::new())
        .with_frame(vec![(DEFAULT_TARGET_CLASS, 0.9, [160.0, 160.0, 100.0, 100.0])]);
    let (mut ctl, log) = controller(backend, ProtectionMode::Shield);
    let t0 = Instant::now();

    for ms in [0, 100, 200, 4_000] {
        ctl.run_cycle(at(t0, ms));
    }
    // Seen again at 8s: expiry moves to 18s.
    assert_eq!(ctl.run_cycle(at(t0, 8_000)), CycleOutcome::Shield { lockdown: true });
    assert_eq!(ctl.run_cycle(at(t0, 12_000)), CycleOutcome::Shield { lockdown: true });
    assert_eq!(ctl.run_cycle(at(t0, 18_100)), CycleOutcome::Shield { lockdown: false });

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert!((records[0].confidence - 0.9).abs() < 1e-6);
}

#[test]
fn override_ends_lockdown_and_suppresses_evaluation() {
    let (mut ctl, log) = controller(scripted(&[0.9]).repeating(), ProtectionMode::Shield);
    let rx = ctl.receivers();
    let t0 = Instant::now();

    for ms in [0, 100, 200] {
        ctl.run_cycle(at(t0, ms));
    }
    assert!(ctl.lockout().is_active());

    ctl.request_override(Duration::from_secs(30), at(t0, 1_000));
    assert!(!ctl.lockout().is_active());
    assert!(!rx.lockout.take().unwrap().active);

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].threat_type, THREAT_OVERRIDDEN);

    // The phone is still there, but the grace period holds.
    for s in 2..10 {
        assert_eq!(
            ctl.run_cycle(at(t0, s * 1_000)),
            CycleOutcome::Shield { lockdown: false }
        );
    }
    assert_eq!(log.records().len(), 1);

    // After grace, normal evaluation resumes.
    let after = at(t0, 31_000);
    ctl.run_cycle(after);
    ctl.run_cycle(after + Duration::from_millis(100));
    assert_eq!(
        ctl.run_cycle(after + Duration::from_millis(200)),
        CycleOutcome::Shield { lockdown: true }
    );
}

#[test]
fn override_through_handle_applies_next_cycle() {
    let (mut ctl, log) = controller(scripted(&[0.9]).repeating(), ProtectionMode::Shield);
    let handle = ctl.handle();
    let t0 = Instant::now();
    for ms in [0, 100, 200] {
        ctl.run_cycle(at(t0, ms));
    }

    handle.request_override(Duration::from_secs(30));
    assert_eq!(ctl.run_cycle(at(t0, 300)), CycleOutcome::Shield { lockdown: false });
    assert_eq!(log.records()[0].threat_type, THREAT_OVERRIDDEN);
}

#[test]
fn disabled_forensic_logging_skips_the_record() {
    let (mut ctl, log) = controller(scripted(&[0.7, 0.7, 0.7]), ProtectionMode::Shield);
    ctl.handle()
        .settings()
        .set("logging", "enable_forensic_logging", "false")
        .unwrap();
    let t0 = Instant::now();
    for ms in [0, 100, 200, 10_500] {
        ctl.run_cycle(at(t0, ms));
    }
    assert!(!ctl.lockout().is_active());
    assert!(log.records().is_empty());
}

#[test]
fn live_threshold_change_applies_on_next_frame() {
    let (mut ctl, _log) = controller(scripted(&[0.65]).repeating(), ProtectionMode::Shield);
    let t0 = Instant::now();
    ctl.run_cycle(at(t0, 0));
    ctl.handle()
        .settings()
        .set("detection", "confidence_threshold", "0.8")
        .unwrap();
    for ms in [100, 200, 300, 400] {
        assert_eq!(ctl.run_cycle(at(t0, ms)), CycleOutcome::Shield { lockdown: false });
    }
    assert_eq!(ctl.lockout().consecutive(), 0);
}

#[test]
fn inference_failure_fails_open_and_is_counted() {
    let backend = scripted(&[]).with_failure();
    let (mut ctl, _log) = controller(backend, ProtectionMode::Shield);
    let handle = ctl.handle();

    assert_eq!(
        ctl.run_cycle(Instant::now()),
        CycleOutcome::Shield { lockdown: false }
    );
    let stats = handle.stats();
    assert_eq!(stats.frames_processed, 1);
    assert_eq!(stats.inference_failures, 1);
}

#[test]
fn disabled_engine_reports_clear_frames() {
    let vcam = MemoryCamera::new(W, H, 30);
    let sent = vcam.sent();
    let mut ctl = ThreatController::new(
        Box::new(SolidSource::new()),
        DetectionEngine::disabled(),
        settings(),
        ProtectionMode::Shield,
    )
    .with_virtual_camera(Box::new(vcam));
    ctl.start_source().unwrap();

    for _ in 0..5 {
        assert_eq!(
            ctl.run_cycle(Instant::now()),
            CycleOutcome::Shield { lockdown: false }
        );
    }
    assert_eq!(sent.last().unwrap().rgb_at(0, 0), SCENE);
}

// ----------------------------------------------------------------------------
// Censorship
// ----------------------------------------------------------------------------

#[test]
fn censorship_tracks_regions_and_logs_when_they_clear() {
    let (mut ctl, log) = controller(scripted(&[0.7, 0.9]), ProtectionMode::Censorship);
    let t0 = Instant::now();

    assert_eq!(
        ctl.run_cycle(at(t0, 0)),
        CycleOutcome::Censorship { slow: false, regions: 1 }
    );
    ctl.run_cycle(at(t0, 100));

    // The region lingers through its cooldown, then disappears.
    let mut ms = 200;
    loop {
        match ctl.run_cycle(at(t0, ms)) {
            CycleOutcome::Censorship { regions: 0, .. } => break,
            CycleOutcome::Censorship { .. } => {}
            other => panic!("unexpected outcome {:?}", other),
        }
        ms += 100;
        assert!(ms < 10_000, "region never cleared");
    }

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].threat_type, THREAT_REDACTED);
    assert!((records[0].confidence - 0.9).abs() < 1e-6);
    assert!((records[0].duration_s - ms as f64 / 1000.0).abs() < 1e-6);
    // No lockdown in censorship mode.
    assert!(!ctl.lockout().is_active());
}

#[test]
fn slow_first_frame_sends_blocked_frame() {
    let (ctl, _log) = controller(scripted(&[]), ProtectionMode::Censorship);
    let vcam = MemoryCamera::new(W, H, 30);
    let sent = vcam.sent();
    let mut ctl = ctl
        .with_virtual_camera(Box::new(vcam))
        .with_latency_budget(Duration::ZERO);
    let handle = ctl.handle();

    assert_eq!(
        ctl.run_cycle(Instant::now()),
        CycleOutcome::Censorship { slow: true, regions: 0 }
    );
    assert_ne!(sent.last().unwrap().rgb_at(0, 0), SCENE);
    assert_eq!(handle.stats().slow_cycles, 1);
}

#[test]
fn mode_switch_resets_tracking_and_lockout() {
    let (mut ctl, _log) = controller(scripted(&[0.9]).repeating(), ProtectionMode::Shield);
    let rx = ctl.receivers();
    let handle = ctl.handle();
    let t0 = Instant::now();
    for ms in [0, 100, 200] {
        ctl.run_cycle(at(t0, ms));
    }
    assert!(ctl.lockout().is_active());
    rx.mode.take();

    assert_eq!(handle.toggle_mode(), ProtectionMode::Censorship);
    let outcome = ctl.run_cycle(at(t0, 300));
    assert!(matches!(outcome, CycleOutcome::Censorship { regions: 1, .. }));
    assert_eq!(ctl.mode(), ProtectionMode::Censorship);
    assert!(!ctl.lockout().is_active());
    assert_eq!(rx.mode.take().as_deref(), Some("censorship"));

    handle.set_mode(ProtectionMode::Shield);
    ctl.run_cycle(at(t0, 400));
    assert!(ctl.engine().threat_memory().is_empty());
    assert!(!ctl.gate().has_safe_frame());
}

// ----------------------------------------------------------------------------
// Monitoring, sinks, lifecycle
// ----------------------------------------------------------------------------

#[test]
fn paused_monitoring_skips_detection() {
    let backend = scripted(&[0.9]).repeating();
    let calls = backend.call_counter();
    let (mut ctl, _log) = controller(backend, ProtectionMode::Shield);
    let handle = ctl.handle();

    handle.set_monitoring(false);
    assert!(!handle.monitoring());
    for ms in 0..5 {
        assert_eq!(
            ctl.run_cycle(Instant::now() + Duration::from_millis(ms)),
            CycleOutcome::Paused
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!ctl.lockout().is_active());

    handle.set_monitoring(true);
    ctl.run_cycle(Instant::now());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn output_is_resized_to_the_virtual_camera() {
    let (ctl, _log) = controller(scripted(&[]), ProtectionMode::Shield);
    let vcam = MemoryCamera::new(160, 120, 30);
    let sent = vcam.sent();
    let mut ctl = ctl.with_virtual_camera(Box::new(vcam));

    ctl.run_cycle(Instant::now());
    let frame = sent.last().unwrap();
    assert_eq!((frame.width(), frame.height()), (160, 120));
}

#[test]
fn virtual_camera_failures_are_counted_not_fatal() {
    let (ctl, _log) = controller(scripted(&[]), ProtectionMode::Shield);
    let vcam = MemoryCamera::new(W, H, 30);
    let sent = vcam.sent();
    let mut ctl = ctl.with_virtual_camera(Box::new(vcam));
    let handle = ctl.handle();

    sent.fail_next(2);
    for _ in 0..3 {
        ctl.run_cycle(Instant::now());
    }
    assert_eq!(handle.stats().virtual_camera_failures, 2);
    assert_eq!(handle.stats().frames_processed, 3);
    assert_eq!(sent.len(), 1);
}

#[test]
fn no_frame_before_the_source_starts() {
    let mut ctl = ThreatController::new(
        Box::new(SolidSource::new()),
        DetectionEngine::disabled(),
        settings(),
        ProtectionMode::Shield,
    );
    assert_eq!(ctl.run_cycle(Instant::now()), CycleOutcome::NoFrame);
}

#[test]
fn unavailable_camera_stops_the_controller_from_starting() {
    let config = CaptureConfig {
        uri: "stub://unavailable".into(),
        width: W,
        height: H,
        fps: 30,
    };
    let source = CameraStream::new(Box::new(SyntheticCamera::new(config)));
    let ctl = ThreatController::new(
        Box::new(source),
        DetectionEngine::disabled(),
        settings(),
        ProtectionMode::Shield,
    );
    let err = ctl.spawn().err().expect("spawn must fail");
    assert!(is_camera_unavailable(&err));
}

#[test]
fn spawned_controller_runs_until_stopped() {
    let config = CaptureConfig {
        uri: "stub://desk".into(),
        width: W,
        height: H,
        fps: 30,
    };
    let source = CameraStream::new(Box::new(SyntheticCamera::new(config)));
    let vcam = MemoryCamera::new(W, H, 30);
    let sent = vcam.sent();
    let ctl = ThreatController::new(
        Box::new(source),
        DetectionEngine::new(Box::new(scripted(&[]).repeating())),
        settings(),
        ProtectionMode::Shield,
    )
    .with_virtual_camera(Box::new(vcam));

    let running = ctl.spawn().unwrap();
    let handle = running.handle();
    assert!(handle.is_running());

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.stats().frames_processed < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(handle.stats().frames_processed >= 3);

    let ctl = running.stop().unwrap();
    assert!(!handle.is_running());
    assert!(ctl.has_virtual_camera());
    assert!(!sent.is_empty());
}

#[test]
fn model_reload_keeps_current_engine_on_failure() {
    let original = scripted(&[]).repeating();
    let original_calls = original.call_counter();
    let replacement = ScriptedBackend::new(W, W, 80).repeating();
    let replacement_calls = replacement.call_counter();
    let slot = Mutex::new(Some(replacement));

    let (ctl, _log) = controller(original, ProtectionMode::Shield);
    let mut ctl = ctl.with_engine_factory(Box::new(move |path: &Path| {
        if !path.to_string_lossy().contains("good") {
            return DetectionEngine::disabled();
        }
        match slot.lock().unwrap().take() {
            Some(backend) => DetectionEngine::new(Box::new(backend)),
            None => DetectionEngine::disabled(),
        }
    }));
    let handle = ctl.handle();

    handle.reload_model("missing.onnx".into());
    ctl.run_cycle(Instant::now());
    assert!(ctl.engine().is_enabled());
    assert_eq!(original_calls.load(Ordering::SeqCst), 1);

    handle.reload_model("good.onnx".into());
    ctl.run_cycle(Instant::now());
    assert_eq!(original_calls.load(Ordering::SeqCst), 1);
    assert_eq!(replacement_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn camera_reload_swaps_the_source() {
    let (ctl, _log) = controller(scripted(&[]), ProtectionMode::Shield);
    let swapped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&swapped);
    let factory = move |config: &CaptureConfig| -> Result<Box<dyn FrameSource>> {
        if config.uri == "stub://broken" {
            return Err(anyhow!("no such camera"));
        }
        flag.store(true, Ordering::SeqCst);
        let mut source = SolidSource::new();
        source.frame = Frame::solid(64, 48, [1, 2, 3], ChannelOrder::Rgb);
        source.start()?;
        Ok(Box::new(source))
    };
    let mut ctl = ctl.with_camera_factory(Box::new(factory));
    let vcam = MemoryCamera::new(64, 48, 30);
    let sent = vcam.sent();
    ctl = ctl.with_virtual_camera(Box::new(vcam));
    let handle = ctl.handle();

    // A failed reload restarts the previous source.
    let mut broken = CaptureConfig::for_index(9, 64, 48, 30);
    broken.uri = "stub://broken".into();
    handle.reload_camera(broken);
    assert_ne!(ctl.run_cycle(Instant::now()), CycleOutcome::NoFrame);
    assert!(!swapped.load(Ordering::SeqCst));

    handle.reload_camera(CaptureConfig::for_index(9, 64, 48, 30));
    ctl.run_cycle(Instant::now());
    assert!(swapped.load(Ordering::SeqCst));
    assert_eq!(sent.last().unwrap().rgb_at(0, 0), [1, 2, 3]);
}

#[test]
fn camera_swap_drops_the_old_safe_frame() {
    let (ctl, _log) = controller(scripted(&[]).repeating(), ProtectionMode::Censorship);
    let factory = |_: &CaptureConfig| -> Result<Box<dyn FrameSource>> {
        let mut source = SolidSource::new();
        source.frame = Frame::solid(64, 48, [1, 2, 3], ChannelOrder::Rgb);
        source.start()?;
        Ok(Box::new(source))
    };
    let mut ctl = ctl.with_camera_factory(Box::new(factory));
    let handle = ctl.handle();

    ctl.run_cycle(Instant::now());
    assert!(ctl.gate().has_safe_frame());

    handle.set_monitoring(false);
    handle.reload_camera(CaptureConfig::for_index(1, 64, 48, 30));
    assert_eq!(ctl.run_cycle(Instant::now()), CycleOutcome::Paused);
    assert!(!ctl.gate().has_safe_frame());
}

#[test]
fn camera_index_setting_reloads_with_current_geometry() {
    let (ctl, _log) = controller(scripted(&[]).repeating(), ProtectionMode::Shield);
    let opened = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&opened);
    let factory = move |config: &CaptureConfig| -> Result<Box<dyn FrameSource>> {
        seen.lock().unwrap().push(config.clone());
        let mut source = SolidSource::new();
        source.start()?;
        Ok(Box::new(source))
    };
    let loaded = Arc::new(Mutex::new(Vec::new()));
    let paths = Arc::clone(&loaded);
    let mut ctl = ctl
        .with_capture_config(CaptureConfig::for_index(0, W, H, 15))
        .with_camera_factory(Box::new(factory))
        .with_engine_factory(Box::new(move |path: &Path| {
            paths.lock().unwrap().push(path.to_path_buf());
            DetectionEngine::new(Box::new(scripted(&[]).repeating()))
        }));
    let handle = ctl.handle();

    handle.settings().set("system", "camera_index", "3").unwrap();
    handle
        .settings()
        .set("detection", "model_path", "models/alt.onnx")
        .unwrap();
    ctl.run_cycle(Instant::now());

    let opened = opened.lock().unwrap().clone();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].uri, "/dev/video3");
    assert_eq!((opened[0].width, opened[0].height, opened[0].fps), (W, H, 15));
    assert_eq!(
        loaded.lock().unwrap().as_slice(),
        &[std::path::PathBuf::from("models/alt.onnx")]
    );

    // Requests are consumed once.
    ctl.run_cycle(Instant::now());
    assert_eq!(loaded.lock().unwrap().len(), 1);
}

#[test]
fn spawned_controller_is_paced_by_the_virtual_camera() {
    let config = CaptureConfig {
        uri: "stub://desk".into(),
        width: W,
        height: H,
        fps: 30,
    };
    let source = CameraStream::new(Box::new(SyntheticCamera::new(config)));
    let ctl = ThreatController::new(
        Box::new(source),
        DetectionEngine::new(Box::new(scripted(&[]).repeating())),
        settings(),
        ProtectionMode::Shield,
    )
    .with_virtual_camera(Box::new(MemoryCamera::new(W, H, 20)));

    let running = ctl.spawn().unwrap();
    let handle = running.handle();
    std::thread::sleep(Duration::from_millis(500));
    let cycles = handle.stats().frames_processed;
    running.stop().unwrap();

    // 20 fps over 500 ms is about 11 sends, counting the unpaced first one.
    assert!(cycles <= 15, "{} cycles in 500 ms", cycles);
}

//! Threat controller: the frame loop.
//!
//! One `ThreatController` owns a frame source, a detection engine, an
//! optional virtual camera and an optional audit log. Each cycle it reads the
//! freshest frame, runs the pipeline for the current protection mode, and
//! pushes the result to the virtual camera and the preview mailbox.
//!
//! Other threads talk to it through a `ControlHandle`. Requests (mode switch,
//! override, camera/model reload) are recorded in shared state and applied
//! at the top of the next cycle, never mid-frame.

pub mod lockout;
pub mod redaction;

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audit::{AuditLog, IncidentRecord};
use crate::config::LiveSettings;
use crate::detect::DetectionEngine;
use crate::error::LensError;
use crate::frame::Frame;
use crate::ingest::{camera_uri, CaptureConfig, FrameSource};
use crate::notify::{LockoutNotice, Notifier, NotifierReceivers};
use crate::output::VirtualCamera;
use crate::render;

pub use lockout::{Evaluation, LockoutMachine, LockoutState};
pub use redaction::{GateOutput, RedactionGate, LATENCY_BUDGET};

/// Loop sleep when no frame or no working virtual camera paces output.
pub const IDLE_SLEEP: Duration = Duration::from_millis(10);

// ----------------------------------------------------------------------------
// Modes and summaries
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProtectionMode {
    /// Full-screen lockout on a confirmed threat.
    #[default]
    Shield,
    /// Selective redaction of tracked regions.
    Censorship,
}

impl ProtectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtectionMode::Shield => "shield",
            ProtectionMode::Censorship => "censorship",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ProtectionMode::Shield => ProtectionMode::Censorship,
            ProtectionMode::Censorship => ProtectionMode::Shield,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ProtectionMode::Shield => 0,
            ProtectionMode::Censorship => 1,
        }
    }

    fn from_u8(raw: u8) -> Self {
        if raw == 1 {
            ProtectionMode::Censorship
        } else {
            ProtectionMode::Shield
        }
    }
}

impl FromStr for ProtectionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shield" => Ok(ProtectionMode::Shield),
            "censorship" | "censor" => Ok(ProtectionMode::Censorship),
            other => Err(anyhow!("unknown protection mode {:?}", other)),
        }
    }
}

impl std::fmt::Display for ProtectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finished incident, ready for the audit log.
#[derive(Clone, Debug, PartialEq)]
pub struct IncidentSummary {
    pub threat_type: &'static str,
    pub peak_confidence: f32,
    pub duration: Duration,
}

impl IncidentSummary {
    pub fn to_record(&self) -> Result<IncidentRecord> {
        IncidentRecord::now(
            self.threat_type,
            self.peak_confidence,
            self.duration.as_secs_f64(),
        )
    }
}

/// What one cycle did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No frame available yet.
    NoFrame,
    /// Monitoring disabled; a paused frame was emitted.
    Paused,
    Shield { lockdown: bool },
    Censorship { slow: bool, regions: usize },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub frames_processed: u64,
    pub inference_failures: u64,
    pub slow_cycles: u64,
    pub virtual_camera_failures: u64,
}

// ----------------------------------------------------------------------------
// Shared state and handle
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Counters {
    frames_processed: AtomicU64,
    inference_failures: AtomicU64,
    slow_cycles: AtomicU64,
    virtual_camera_failures: AtomicU64,
}

struct Shared {
    mode: AtomicU8,
    monitoring: AtomicBool,
    running: AtomicBool,
    pending_camera: Mutex<Option<CaptureConfig>>,
    pending_model: Mutex<Option<PathBuf>>,
    pending_override: Mutex<Option<Duration>>,
    counters: Counters,
}

impl Shared {
    fn new(mode: ProtectionMode) -> Self {
        Self {
            mode: AtomicU8::new(mode.to_u8()),
            monitoring: AtomicBool::new(true),
            running: AtomicBool::new(false),
            pending_camera: Mutex::new(None),
            pending_model: Mutex::new(None),
            pending_override: Mutex::new(None),
            counters: Counters::default(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cross-thread control surface. Every call returns immediately.
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
    settings: LiveSettings,
}

impl ControlHandle {
    pub fn mode(&self) -> ProtectionMode {
        ProtectionMode::from_u8(self.shared.mode.load(Ordering::SeqCst))
    }

    pub fn set_mode(&self, mode: ProtectionMode) {
        self.shared.mode.store(mode.to_u8(), Ordering::SeqCst);
    }

    /// Flip between shield and censorship; returns the requested mode.
    pub fn toggle_mode(&self) -> ProtectionMode {
        let mut current = self.shared.mode.load(Ordering::SeqCst);
        loop {
            let next = ProtectionMode::from_u8(current).toggled().to_u8();
            match self.shared.mode.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return ProtectionMode::from_u8(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Suspend threat evaluation for `grace`, ending any active lockdown.
    pub fn request_override(&self, grace: Duration) {
        *lock(&self.shared.pending_override) = Some(grace);
    }

    pub fn set_monitoring(&self, enabled: bool) {
        self.shared.monitoring.store(enabled, Ordering::SeqCst);
    }

    pub fn monitoring(&self) -> bool {
        self.shared.monitoring.load(Ordering::SeqCst)
    }

    pub fn reload_camera(&self, config: CaptureConfig) {
        *lock(&self.shared.pending_camera) = Some(config);
    }

    pub fn reload_model(&self, path: PathBuf) {
        *lock(&self.shared.pending_model) = Some(path);
    }

    pub fn settings(&self) -> &LiveSettings {
        &self.settings
    }

    /// Ask the loop to exit after its current cycle.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ControllerStats {
        let c = &self.shared.counters;
        ControllerStats {
            frames_processed: c.frames_processed.load(Ordering::Relaxed),
            inference_failures: c.inference_failures.load(Ordering::Relaxed),
            slow_cycles: c.slow_cycles.load(Ordering::Relaxed),
            virtual_camera_failures: c.virtual_camera_failures.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

/// Builds and starts a replacement frame source.
pub type CameraFactory = Box<dyn Fn(&CaptureConfig) -> Result<Box<dyn FrameSource>> + Send>;
/// Builds a replacement engine for a model path.
pub type EngineFactory = Box<dyn Fn(&Path) -> DetectionEngine + Send>;

pub struct ThreatController {
    source: Box<dyn FrameSource>,
    engine: DetectionEngine,
    vcam: Option<Box<dyn VirtualCamera>>,
    audit: Option<Box<dyn AuditLog>>,
    settings: LiveSettings,
    notifier: Notifier,
    shared: Arc<Shared>,
    mode: ProtectionMode,
    monitoring: bool,
    lockout: LockoutMachine,
    gate: RedactionGate,
    camera_factory: Option<CameraFactory>,
    engine_factory: Option<EngineFactory>,
    capture: Option<CaptureConfig>,
    retired_failures: u64,
    vcam_failing: bool,
}

impl ThreatController {
    pub fn new(
        source: Box<dyn FrameSource>,
        engine: DetectionEngine,
        settings: LiveSettings,
        mode: ProtectionMode,
    ) -> Self {
        Self {
            source,
            engine,
            vcam: None,
            audit: None,
            settings,
            notifier: Notifier::new(),
            shared: Arc::new(Shared::new(mode)),
            mode,
            monitoring: true,
            lockout: LockoutMachine::new(),
            gate: RedactionGate::default(),
            camera_factory: None,
            engine_factory: None,
            capture: None,
            retired_failures: 0,
            vcam_failing: false,
        }
    }

    pub fn with_virtual_camera(mut self, vcam: Box<dyn VirtualCamera>) -> Self {
        self.vcam = Some(vcam);
        self
    }

    pub fn with_audit_log(mut self, audit: Box<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_camera_factory(mut self, factory: CameraFactory) -> Self {
        self.camera_factory = Some(factory);
        self
    }

    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = Some(factory);
        self
    }

    /// Geometry of the running source. A `system.camera_index` change keeps
    /// it and swaps only the device.
    pub fn with_capture_config(mut self, config: CaptureConfig) -> Self {
        self.capture = Some(config);
        self
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.gate = RedactionGate::new(budget);
        self
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            shared: Arc::clone(&self.shared),
            settings: self.settings.clone(),
        }
    }

    pub fn receivers(&self) -> NotifierReceivers {
        self.notifier.receivers()
    }

    pub fn mode(&self) -> ProtectionMode {
        self.mode
    }

    pub fn lockout(&self) -> &LockoutMachine {
        &self.lockout
    }

    pub fn gate(&self) -> &RedactionGate {
        &self.gate
    }

    pub fn engine(&self) -> &DetectionEngine {
        &self.engine
    }

    pub fn has_virtual_camera(&self) -> bool {
        self.vcam.is_some()
    }

    /// Start the source. A `CameraUnavailable` here means the loop must not run.
    pub fn start_source(&mut self) -> Result<()> {
        self.source.start()?;
        self.notifier.mode(self.mode.as_str());
        Ok(())
    }

    /// One pass of the frame loop at time `now`.
    pub fn run_cycle(&mut self, now: Instant) -> CycleOutcome {
        self.apply_pending(now);

        let Some(frame) = self.source.read() else {
            return CycleOutcome::NoFrame;
        };

        let outcome = if !self.monitoring {
            let paused = render::paused_frame(frame.width(), frame.height(), frame.order());
            self.notifier.preview(paused.clone());
            self.emit(&paused);
            CycleOutcome::Paused
        } else {
            match self.mode {
                ProtectionMode::Shield => self.shield_cycle(frame, now),
                ProtectionMode::Censorship => self.censorship_cycle(frame, now),
            }
        };

        let counters = &self.shared.counters;
        counters.frames_processed.fetch_add(1, Ordering::Relaxed);
        counters.inference_failures.store(
            self.retired_failures + self.engine.inference_failures(),
            Ordering::Relaxed,
        );
        outcome
    }

    fn shield_cycle(&mut self, frame: Frame, now: Instant) -> CycleOutcome {
        let verdict = self.engine.detect(&frame);
        let settings = self.settings.snapshot();
        let eval = self.lockout.evaluate(verdict, &settings, now);
        if let Some(notice) = eval.notice {
            self.notifier.lockout(notice);
        }
        if let Some(summary) = eval.exited {
            self.record_incident(&summary, settings.forensic_logging);
        }

        let lockdown = self.lockout.is_active();
        if lockdown {
            let blocked = render::blocked_frame(frame.width(), frame.height(), frame.order());
            self.emit(&blocked);
        } else {
            self.emit(&frame);
        }
        // The preview consumer blurs the live feed itself during lockout.
        self.notifier.preview(frame);
        CycleOutcome::Shield { lockdown }
    }

    fn censorship_cycle(&mut self, frame: Frame, now: Instant) -> CycleOutcome {
        let settings = self.settings.snapshot();
        let started = Instant::now();
        let tracked = self
            .engine
            .detect_and_track(&frame, settings.confidence_threshold);
        let latency = started.elapsed();

        let (detected, confidence, regions) =
            (tracked.detected, tracked.confidence, tracked.region_count);
        let gated = self.gate.admit(tracked, latency);
        if gated.slow {
            self.shared
                .counters
                .slow_cycles
                .fetch_add(1, Ordering::Relaxed);
        }
        if let Some(summary) = self.gate.observe(detected, confidence, regions, now) {
            self.record_incident(&summary, settings.forensic_logging);
        }

        self.emit(&gated.output);
        self.notifier.preview(gated.preview);
        CycleOutcome::Censorship {
            slow: gated.slow,
            regions,
        }
    }

    /// Push a frame to the virtual camera, resizing to its resolution.
    fn emit(&mut self, frame: &Frame) {
        let Some(vcam) = self.vcam.as_mut() else {
            return;
        };
        let result = if frame.width() == vcam.width() && frame.height() == vcam.height() {
            vcam.send(frame)
        } else {
            vcam.send(&render::resize_frame(frame, vcam.width(), vcam.height()))
        };
        match result {
            Ok(()) => {
                if self.vcam_failing {
                    log::info!("{}: virtual camera recovered", vcam.describe());
                    self.vcam_failing = false;
                }
            }
            Err(err) => {
                self.shared
                    .counters
                    .virtual_camera_failures
                    .fetch_add(1, Ordering::Relaxed);
                if !self.vcam_failing {
                    let err = LensError::VirtualCameraUnavailable(format!(
                        "{}: {:#}",
                        vcam.describe(),
                        err
                    ));
                    log::warn!("{}", err);
                    self.vcam_failing = true;
                }
            }
        }
    }

    fn record_incident(&mut self, summary: &IncidentSummary, enabled: bool) {
        if !enabled {
            log::info!("incident not logged: forensic logging disabled");
            return;
        }
        let Some(audit) = self.audit.as_mut() else {
            return;
        };
        let result = summary.to_record().and_then(|record| audit.append(&record));
        if let Err(err) = result {
            log::error!("failed to append audit record: {:#}", err);
        }
    }

    /// Apply requests queued through the handle.
    fn apply_pending(&mut self, now: Instant) {
        let requested = ProtectionMode::from_u8(self.shared.mode.load(Ordering::SeqCst));
        if requested != self.mode {
            self.switch_mode(requested);
        }

        let monitoring = self.shared.monitoring.load(Ordering::SeqCst);
        if monitoring != self.monitoring {
            self.monitoring = monitoring;
            if monitoring {
                self.source.resume();
                log::info!("monitoring resumed");
            } else {
                self.source.pause();
                log::info!("monitoring paused");
            }
        }

        let grace = lock(&self.shared.pending_override).take();
        if let Some(grace) = grace {
            self.request_override(grace, now);
        }

        let camera = lock(&self.shared.pending_camera).take();
        if let Some(config) = camera {
            self.replace_camera(&config);
        }

        if let Some(index) = self.settings.take_camera_request() {
            match self.capture.clone() {
                Some(current) => {
                    let config = CaptureConfig {
                        uri: camera_uri(index),
                        ..current
                    };
                    self.replace_camera(&config);
                }
                None => log::warn!("camera index {} set but capture geometry unknown", index),
            }
        }

        let from_settings = self.settings.take_model_request();
        let model = lock(&self.shared.pending_model).take().or(from_settings);
        if let Some(path) = model {
            self.replace_engine(&path);
        }
    }

    fn switch_mode(&mut self, mode: ProtectionMode) {
        log::info!("protection mode {} -> {}", self.mode, mode);
        self.mode = mode;
        self.engine.clear_threat_memory();
        self.gate.clear();
        self.lockout.clear();
        self.notifier.lockout(LockoutNotice::cleared());
        self.notifier.mode(mode.as_str());
    }

    /// Apply an override immediately.
    pub fn request_override(&mut self, grace: Duration, now: Instant) {
        log::info!("manual override for {:?}", grace);
        if let Some(summary) = self.lockout.request_override(grace, now) {
            let enabled = self.settings.snapshot().forensic_logging;
            self.record_incident(&summary, enabled);
        }
        self.notifier.lockout(LockoutNotice::cleared());
    }

    fn replace_camera(&mut self, config: &CaptureConfig) {
        let Some(factory) = self.camera_factory.as_ref() else {
            log::warn!("camera reload requested but no camera factory configured");
            return;
        };
        // Release the old device first; the new one may be the same node.
        self.source.stop();
        match factory(config) {
            Ok(source) => {
                log::info!("camera switched to {}", config.uri);
                self.source = source;
                self.capture = Some(config.clone());
                self.gate.clear();
                if !self.monitoring {
                    self.source.pause();
                }
            }
            Err(err) => {
                log::error!("camera reload to {} failed: {:#}", config.uri, err);
                if let Err(err) = self.source.start() {
                    log::error!("previous camera did not restart: {:#}", err);
                }
            }
        }
    }

    fn replace_engine(&mut self, path: &Path) {
        let Some(factory) = self.engine_factory.as_ref() else {
            log::warn!("model reload requested but no engine factory configured");
            return;
        };
        let engine = factory(path);
        if !engine.is_enabled() {
            log::error!("model reload from {} failed; keeping current model", path.display());
            return;
        }
        log::info!("model switched to {}", path.display());
        self.retired_failures += self.engine.inference_failures();
        self.engine = engine;
        self.gate.clear();
    }

    fn shutdown(&mut self) {
        self.source.stop();
        log::info!("controller stopped");
    }

    /// Start the source and run the loop on a new thread.
    pub fn spawn(mut self) -> Result<RunningController> {
        self.start_source()?;
        let handle = self.handle();
        handle.shared.running.store(true, Ordering::SeqCst);
        let thread = std::thread::Builder::new()
            .name("lensblock-controller".into())
            .spawn(move || {
                self.run_loop();
                self
            })
            .map_err(|err| anyhow!("spawn controller thread: {}", err))?;
        Ok(RunningController {
            handle,
            thread: Some(thread),
        })
    }

    fn run_loop(&mut self) {
        log::info!("controller running in {} mode", self.mode);
        while self.shared.running.load(Ordering::SeqCst) {
            let outcome = self.run_cycle(Instant::now());
            // A healthy virtual camera paces the loop from its send call.
            if outcome == CycleOutcome::NoFrame || self.vcam.is_none() || self.vcam_failing {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        self.shutdown();
    }
}

/// A controller running on its own thread.
pub struct RunningController {
    handle: ControlHandle,
    thread: Option<JoinHandle<ThreatController>>,
}

impl RunningController {
    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Stop the loop, release the camera, and join the controller thread.
    /// Returns the controller for inspection.
    pub fn stop(mut self) -> Result<ThreatController> {
        self.join()
            .ok_or_else(|| anyhow!("controller already stopped"))?
    }

    fn join(&mut self) -> Option<Result<ThreatController>> {
        let thread = self.thread.take()?;
        self.handle.stop();
        Some(
            thread
                .join()
                .map_err(|_| anyhow!("controller thread panicked")),
        )
    }
}

impl Drop for RunningController {
    fn drop(&mut self) {
        if let Some(Err(err)) = self.join() {
            log::error!("{:#}", err);
        }
    }
}

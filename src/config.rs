//! Daemon configuration and live detection settings.
//!
//! `LensConfig` is loaded once at startup: TOML file, then environment
//! overrides, then validation. A missing or unreadable file is not fatal; it
//! is logged as `ConfigReadFailure` and documented defaults apply.
//!
//! `LiveSettings` holds the values the controller re-reads every frame. Each
//! is an atomic, so reads are lock-free and writes are last-write-wins.
//! Changing the camera index or model path also raises a reload request that
//! the controller consumes at the top of its next cycle.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::controller::ProtectionMode;
use crate::detect::DEFAULT_TARGET_CLASS;
use crate::error::LensError;
use crate::ingest::{camera_uri, CaptureConfig};
use crate::output::OutputConfig;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.60;
const DEFAULT_PERSISTENCE_FRAMES: u32 = 3;
const DEFAULT_LOCKOUT_SECS: u64 = 10;
const DEFAULT_MODEL_PATH: &str = "models/yolov8n.onnx";
const DEFAULT_AUDIT_DB: &str = "lensblock_audit.db";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;

pub const CONFIG_ENV: &str = "LENSBLOCK_CONFIG";

#[derive(Debug, Deserialize, Serialize, Default)]
struct LensConfigFile {
    detection: Option<DetectionFile>,
    logging: Option<LoggingFile>,
    system: Option<SystemFile>,
    output: Option<OutputFile>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct DetectionFile {
    confidence_threshold: Option<f32>,
    persistence_frames: Option<u32>,
    lockout_duration_seconds: Option<u64>,
    model_path: Option<PathBuf>,
    target_class_id: Option<usize>,
    fail_closed: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct LoggingFile {
    enable_forensic_logging: Option<bool>,
    audit_db_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct SystemFile {
    camera_index: Option<u32>,
    camera_uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    protection_mode: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct OutputFile {
    virtual_camera: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub persistence_frames: u32,
    pub lockout_duration_seconds: u64,
    pub model_path: PathBuf,
    pub target_class_id: usize,
    pub fail_closed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub enable_forensic_logging: bool,
    pub audit_db_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
    pub camera_index: u32,
    /// Overrides `camera_index` when set (e.g. `stub://desk`).
    pub camera_uri: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub protection_mode: ProtectionMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub virtual_camera: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LensConfig {
    pub detection: DetectionConfig,
    pub logging: LoggingConfig,
    pub system: SystemConfig,
    pub output: OutputSettings,
}

impl Default for LensConfig {
    fn default() -> Self {
        // The all-`None` file maps to documented defaults and cannot fail.
        Self::from_file(LensConfigFile::default())
    }
}

impl LensConfig {
    /// Load from `LENSBLOCK_CONFIG` (if set), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).ok().filter(|p| !p.trim().is_empty());
        Self::load_from(path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => match read_config_file(path) {
                Ok(file) => file,
                Err(err) => {
                    let err = LensError::ConfigReadFailure(format!("{:#}", err));
                    log::warn!("{}; using defaults", err);
                    LensConfigFile::default()
                }
            },
            None => LensConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env();
        cfg.validate();
        Ok(cfg)
    }

    fn from_file(file: LensConfigFile) -> Self {
        let detection = file.detection.unwrap_or_default();
        let logging = file.logging.unwrap_or_default();
        let system = file.system.unwrap_or_default();
        let output = file.output.unwrap_or_default();

        let protection_mode = match system.protection_mode.as_deref() {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                log::warn!("unknown protection_mode {:?}; using shield", raw);
                ProtectionMode::Shield
            }),
            None => ProtectionMode::Shield,
        };
        let width = system.width.unwrap_or(DEFAULT_WIDTH);
        let height = system.height.unwrap_or(DEFAULT_HEIGHT);
        let fps = system.fps.unwrap_or(DEFAULT_FPS);

        Self {
            detection: DetectionConfig {
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                persistence_frames: detection
                    .persistence_frames
                    .unwrap_or(DEFAULT_PERSISTENCE_FRAMES),
                lockout_duration_seconds: detection
                    .lockout_duration_seconds
                    .unwrap_or(DEFAULT_LOCKOUT_SECS),
                model_path: detection
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                target_class_id: detection.target_class_id.unwrap_or(DEFAULT_TARGET_CLASS),
                fail_closed: detection.fail_closed.unwrap_or(false),
            },
            logging: LoggingConfig {
                enable_forensic_logging: logging.enable_forensic_logging.unwrap_or(true),
                audit_db_path: logging
                    .audit_db_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_DB)),
            },
            system: SystemConfig {
                camera_index: system.camera_index.unwrap_or(0),
                camera_uri: system.camera_uri,
                width,
                height,
                fps,
                protection_mode,
            },
            output: OutputSettings {
                virtual_camera: output.virtual_camera,
                width: output.width.unwrap_or(width),
                height: output.height.unwrap_or(height),
                fps: output.fps.unwrap_or(fps),
            },
        }
    }

    fn apply_env(&mut self) {
        if let Some(index) = env_value("LENSBLOCK_CAMERA_INDEX") {
            match index.parse() {
                Ok(index) => self.system.camera_index = index,
                Err(_) => log::warn!("LENSBLOCK_CAMERA_INDEX must be a non-negative integer; ignored"),
            }
        }
        if let Some(uri) = env_value("LENSBLOCK_CAMERA_URI") {
            self.system.camera_uri = Some(uri);
        }
        if let Some(path) = env_value("LENSBLOCK_MODEL_PATH") {
            self.detection.model_path = PathBuf::from(path);
        }
        if let Some(path) = env_value("LENSBLOCK_AUDIT_DB") {
            self.logging.audit_db_path = PathBuf::from(path);
        }
        if let Some(mode) = env_value("LENSBLOCK_MODE") {
            match mode.parse() {
                Ok(mode) => self.system.protection_mode = mode,
                Err(_) => log::warn!("LENSBLOCK_MODE {:?} is not shield or censorship; ignored", mode),
            }
        }
        if let Some(device) = env_value("LENSBLOCK_VIRTUAL_CAMERA") {
            self.output.virtual_camera = Some(device);
        }
    }

    /// Replace out-of-range values with their defaults, one key at a time.
    pub fn validate(&mut self) {
        let threshold = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            rejected_key("detection.confidence_threshold", "must be within [0, 1]");
            self.detection.confidence_threshold = DEFAULT_CONFIDENCE_THRESHOLD;
        }
        if self.detection.persistence_frames == 0 {
            log::warn!("detection.persistence_frames of 0 treated as 1");
            self.detection.persistence_frames = 1;
        }
        if self.system.width == 0 {
            rejected_key("system.width", "must be greater than zero");
            self.system.width = DEFAULT_WIDTH;
        }
        if self.system.height == 0 {
            rejected_key("system.height", "must be greater than zero");
            self.system.height = DEFAULT_HEIGHT;
        }
        if self.system.fps == 0 {
            rejected_key("system.fps", "must be greater than zero");
            self.system.fps = DEFAULT_FPS;
        }
        if self.output.width == 0 {
            rejected_key("output.width", "must be greater than zero");
            self.output.width = self.system.width;
        }
        if self.output.height == 0 {
            rejected_key("output.height", "must be greater than zero");
            self.output.height = self.system.height;
        }
    }

    /// Camera URI: explicit `camera_uri`, else the device node for `camera_index`.
    pub fn camera_uri(&self) -> String {
        self.system
            .camera_uri
            .clone()
            .unwrap_or_else(|| camera_uri(self.system.camera_index))
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            uri: self.camera_uri(),
            width: self.system.width,
            height: self.system.height,
            fps: self.system.fps,
        }
    }

    pub fn output_config(&self) -> Option<OutputConfig> {
        self.output.virtual_camera.as_ref().map(|device| OutputConfig {
            device: device.clone(),
            width: self.output.width,
            height: self.output.height,
            fps: self.output.fps,
        })
    }

    /// Write current values back as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(&self.to_file()).context("serialize config")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }

    fn to_file(&self) -> LensConfigFile {
        LensConfigFile {
            detection: Some(DetectionFile {
                confidence_threshold: Some(self.detection.confidence_threshold),
                persistence_frames: Some(self.detection.persistence_frames),
                lockout_duration_seconds: Some(self.detection.lockout_duration_seconds),
                model_path: Some(self.detection.model_path.clone()),
                target_class_id: Some(self.detection.target_class_id),
                fail_closed: Some(self.detection.fail_closed),
            }),
            logging: Some(LoggingFile {
                enable_forensic_logging: Some(self.logging.enable_forensic_logging),
                audit_db_path: Some(self.logging.audit_db_path.clone()),
            }),
            system: Some(SystemFile {
                camera_index: Some(self.system.camera_index),
                camera_uri: self.system.camera_uri.clone(),
                width: Some(self.system.width),
                height: Some(self.system.height),
                fps: Some(self.system.fps),
                protection_mode: Some(self.system.protection_mode.as_str().to_string()),
            }),
            output: Some(OutputFile {
                virtual_camera: self.output.virtual_camera.clone(),
                width: Some(self.output.width),
                height: Some(self.output.height),
                fps: Some(self.output.fps),
            }),
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn rejected_key(key: &str, reason: &str) {
    let err = LensError::ConfigReadFailure(format!("{} {}", key, reason));
    log::warn!("{}; using default", err);
}

/// Parse the file key by key. A syntax error loses the whole file; a key
/// with the wrong type loses only that key.
fn read_config_file(path: &Path) -> Result<LensConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let table: toml::Table = raw
        .parse()
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(LensConfigFile {
        detection: read_section(&table, "detection"),
        logging: read_section(&table, "logging"),
        system: read_section(&table, "system"),
        output: read_section(&table, "output"),
    })
}

fn read_section<T: DeserializeOwned>(table: &toml::Table, name: &str) -> Option<T> {
    let value = table.get(name)?;
    let Some(entries) = value.as_table() else {
        rejected_key(name, "must be a table");
        return None;
    };
    let mut kept = toml::Table::new();
    for (key, value) in entries {
        let mut single = toml::Table::new();
        single.insert(key.clone(), value.clone());
        match toml::Value::Table(single).try_into::<T>() {
            Ok(_) => {
                kept.insert(key.clone(), value.clone());
            }
            Err(err) => rejected_key(&format!("{}.{}", name, key), &err.to_string()),
        }
    }
    toml::Value::Table(kept).try_into().ok()
}

// ----------------------------------------------------------------------------
// Live settings
// ----------------------------------------------------------------------------

/// Per-frame view of the live settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub persistence_frames: u32,
    pub lockout_duration: Duration,
    pub forensic_logging: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            persistence_frames: DEFAULT_PERSISTENCE_FRAMES,
            lockout_duration: Duration::from_secs(DEFAULT_LOCKOUT_SECS),
            forensic_logging: true,
        }
    }
}

#[derive(Debug)]
struct LiveInner {
    threshold_bits: AtomicU32,
    persistence_frames: AtomicU32,
    lockout_secs: AtomicU64,
    forensic_logging: AtomicBool,
    camera_index: AtomicU32,
    model_path: Mutex<PathBuf>,
    camera_requested: AtomicBool,
    model_requested: AtomicBool,
}

/// Settings a user may change while the controller runs.
///
/// Keys: `detection.confidence_threshold`, `detection.persistence_frames`,
/// `detection.lockout_duration_seconds`, `detection.model_path`,
/// `logging.enable_forensic_logging`, `system.camera_index`.
#[derive(Clone, Debug)]
pub struct LiveSettings {
    inner: Arc<LiveInner>,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self::from_settings(DetectionSettings::default())
    }
}

impl LiveSettings {
    pub fn from_settings(settings: DetectionSettings) -> Self {
        Self {
            inner: Arc::new(LiveInner {
                threshold_bits: AtomicU32::new(settings.confidence_threshold.to_bits()),
                persistence_frames: AtomicU32::new(settings.persistence_frames.max(1)),
                lockout_secs: AtomicU64::new(settings.lockout_duration.as_secs()),
                forensic_logging: AtomicBool::new(settings.forensic_logging),
                camera_index: AtomicU32::new(0),
                model_path: Mutex::new(PathBuf::from(DEFAULT_MODEL_PATH)),
                camera_requested: AtomicBool::new(false),
                model_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(cfg: &LensConfig) -> Self {
        let live = Self::from_settings(DetectionSettings {
            confidence_threshold: cfg.detection.confidence_threshold,
            persistence_frames: cfg.detection.persistence_frames,
            lockout_duration: Duration::from_secs(cfg.detection.lockout_duration_seconds),
            forensic_logging: cfg.logging.enable_forensic_logging,
        });
        live.inner
            .camera_index
            .store(cfg.system.camera_index, Ordering::Relaxed);
        *live.model_path_slot() = cfg.detection.model_path.clone();
        live
    }

    pub fn camera_index(&self) -> u32 {
        self.inner.camera_index.load(Ordering::Relaxed)
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_path_slot().clone()
    }

    /// The camera index, if it changed since the last call.
    pub fn take_camera_request(&self) -> Option<u32> {
        self.inner
            .camera_requested
            .swap(false, Ordering::SeqCst)
            .then(|| self.camera_index())
    }

    /// The model path, if it changed since the last call.
    pub fn take_model_request(&self) -> Option<PathBuf> {
        self.inner
            .model_requested
            .swap(false, Ordering::SeqCst)
            .then(|| self.model_path())
    }

    fn model_path_slot(&self) -> MutexGuard<'_, PathBuf> {
        self.inner
            .model_path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fresh read of every live value.
    pub fn snapshot(&self) -> DetectionSettings {
        DetectionSettings {
            confidence_threshold: f32::from_bits(self.inner.threshold_bits.load(Ordering::Relaxed)),
            persistence_frames: self.inner.persistence_frames.load(Ordering::Relaxed),
            lockout_duration: Duration::from_secs(self.inner.lockout_secs.load(Ordering::Relaxed)),
            forensic_logging: self.inner.forensic_logging.load(Ordering::Relaxed),
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        let s = self.snapshot();
        match (section, key) {
            ("detection", "confidence_threshold") => Some(s.confidence_threshold.to_string()),
            ("detection", "persistence_frames") => Some(s.persistence_frames.to_string()),
            ("detection", "lockout_duration_seconds") => {
                Some(s.lockout_duration.as_secs().to_string())
            }
            ("detection", "model_path") => Some(self.model_path().display().to_string()),
            ("logging", "enable_forensic_logging") => Some(s.forensic_logging.to_string()),
            ("system", "camera_index") => Some(self.camera_index().to_string()),
            _ => None,
        }
    }

    /// Parse and store one value.
    pub fn set(&self, section: &str, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match (section, key) {
            ("detection", "confidence_threshold") => {
                let v: f32 = value
                    .parse()
                    .map_err(|_| anyhow!("confidence_threshold must be a number"))?;
                if !(0.0..=1.0).contains(&v) {
                    return Err(anyhow!("confidence_threshold must be within [0, 1]"));
                }
                self.inner.threshold_bits.store(v.to_bits(), Ordering::Relaxed);
            }
            ("detection", "persistence_frames") => {
                let v: u32 = value
                    .parse()
                    .map_err(|_| anyhow!("persistence_frames must be an integer"))?;
                self.inner.persistence_frames.store(v.max(1), Ordering::Relaxed);
            }
            ("detection", "lockout_duration_seconds") => {
                let v: u64 = value
                    .parse()
                    .map_err(|_| anyhow!("lockout_duration_seconds must be an integer"))?;
                self.inner.lockout_secs.store(v, Ordering::Relaxed);
            }
            ("logging", "enable_forensic_logging") => {
                let v: bool = value
                    .parse()
                    .map_err(|_| anyhow!("enable_forensic_logging must be true or false"))?;
                self.inner.forensic_logging.store(v, Ordering::Relaxed);
            }
            ("detection", "model_path") => {
                if value.is_empty() {
                    return Err(anyhow!("model_path must not be empty"));
                }
                *self.model_path_slot() = PathBuf::from(value);
                self.inner.model_requested.store(true, Ordering::SeqCst);
            }
            ("system", "camera_index") => {
                let v: u32 = value
                    .parse()
                    .map_err(|_| anyhow!("camera_index must be a non-negative integer"))?;
                self.inner.camera_index.store(v, Ordering::Relaxed);
                self.inner.camera_requested.store(true, Ordering::SeqCst);
            }
            _ => return Err(anyhow!("unknown live setting {}.{}", section, key)),
        }
        log::info!("setting {}.{} = {}", section, key, value);
        Ok(())
    }

    /// Copy live values into `cfg`, e.g. before `LensConfig::save`.
    pub fn write_back(&self, cfg: &mut LensConfig) {
        let s = self.snapshot();
        cfg.detection.confidence_threshold = s.confidence_threshold;
        cfg.detection.persistence_frames = s.persistence_frames;
        cfg.detection.lockout_duration_seconds = s.lockout_duration.as_secs();
        cfg.logging.enable_forensic_logging = s.forensic_logging;
        cfg.detection.model_path = self.model_path();
        if cfg.system.camera_index != self.camera_index() {
            cfg.system.camera_index = self.camera_index();
            cfg.system.camera_uri = None;
        }
    }
}

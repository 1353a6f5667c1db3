//! Detection engine: preprocessing, inference, decoding and threat tracking
//! around one `InferenceBackend`.
//!
//! The engine never propagates inference errors to the frame loop. A missing
//! model or a failed call degrades according to `FailurePolicy`, and every
//! such event is counted and logged.

use anyhow::{anyhow, Result};
use std::path::Path;

use super::backend::{InferenceBackend, NamedTensor};
use super::decode::{Detection, FrameScale, Predictions};
use super::tensor::preprocess;
use super::tracker::ThreatMemory;
use crate::error::LensError;
use crate::frame::Frame;
use crate::geometry::{BBox, REDACTION_PADDING};
use crate::render;

/// COCO class index for "cell phone".
pub const DEFAULT_TARGET_CLASS: usize = 67;

/// Log every Nth inference failure after the first.
const FAILURE_LOG_EVERY: u64 = 100;

/// Loads a backend for a model path.
pub type BackendLoader = dyn Fn(&Path) -> Result<Box<dyn InferenceBackend>> + Send + Sync;

/// What to report when inference cannot produce an answer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Treat the frame as clear.
    #[default]
    FailOpen,
    /// Treat the frame as a full-confidence threat.
    FailClosed,
}

/// Result of the plain detection path.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Verdict {
    pub detected: bool,
    pub confidence: f32,
}

/// Result of the tracking path.
#[derive(Debug)]
pub struct TrackedFrame {
    pub detected: bool,
    pub confidence: f32,
    /// Redacted frame for the virtual camera.
    pub clean: Frame,
    /// Redacted frame with region borders for the preview.
    pub preview: Frame,
    /// Surviving threat regions after this frame.
    pub region_count: usize,
}

pub struct DetectionEngine {
    backend: Option<Box<dyn InferenceBackend>>,
    memory: ThreatMemory,
    target_class: usize,
    policy: FailurePolicy,
    failures: u64,
}

impl DetectionEngine {
    pub fn new(backend: Box<dyn InferenceBackend>) -> Self {
        Self {
            backend: Some(backend),
            memory: ThreatMemory::new(),
            target_class: DEFAULT_TARGET_CLASS,
            policy: FailurePolicy::default(),
            failures: 0,
        }
    }

    /// Engine without a model. Every call reports per `FailurePolicy`.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            memory: ThreatMemory::new(),
            target_class: DEFAULT_TARGET_CLASS,
            policy: FailurePolicy::default(),
            failures: 0,
        }
    }

    /// Load a backend through `loader`. A load failure is logged and yields a
    /// disabled engine rather than an error.
    pub fn load(model_path: &Path, loader: &BackendLoader) -> Self {
        match loader(model_path) {
            Ok(mut backend) => {
                if let Err(err) = backend.warm_up() {
                    log::warn!("{} backend warm-up failed: {:#}", backend.name(), err);
                }
                log::info!(
                    "detection engine ready: backend={} model={} input={:?}",
                    backend.name(),
                    model_path.display(),
                    backend.input_size()
                );
                Self::new(backend)
            }
            Err(err) => {
                let err = LensError::ModelLoadFailure(format!(
                    "{}: {:#}",
                    model_path.display(),
                    err
                ));
                log::error!("{}; detection disabled", err);
                Self::disabled()
            }
        }
    }

    pub fn with_target_class(mut self, class_id: usize) -> Self {
        self.target_class = class_id;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn target_class(&self) -> usize {
        self.target_class
    }

    /// Inference failures since construction.
    pub fn inference_failures(&self) -> u64 {
        self.failures
    }

    pub fn threat_memory(&self) -> &ThreatMemory {
        &self.memory
    }

    /// Reset tracking state (mode switch, restart).
    pub fn clear_threat_memory(&mut self) {
        self.memory.clear();
    }

    /// Best ungated target-class confidence for a frame.
    pub fn detect(&mut self, frame: &Frame) -> Verdict {
        let target = self.target_class;
        let result = self.infer(frame).and_then(|outputs| {
            let preds = Predictions::from_outputs(&outputs)?;
            preds.best_score(target)
        });
        match result {
            Ok(confidence) => Verdict {
                detected: confidence > 0.0,
                confidence,
            },
            Err(err) => {
                self.record_failure(&err);
                match self.policy {
                    FailurePolicy::FailOpen => Verdict::default(),
                    FailurePolicy::FailClosed => Verdict {
                        detected: true,
                        confidence: 1.0,
                    },
                }
            }
        }
    }

    /// Detect, track and redact.
    ///
    /// Candidates at or above `threshold` feed the threat memory; every
    /// surviving region (live or cooling down) is padded and blurred on both
    /// output frames. A failed inference contributes no candidates, so
    /// remembered regions keep ageing and stay redacted.
    pub fn detect_and_track(&mut self, frame: &Frame, threshold: f32) -> TrackedFrame {
        let target = self.target_class;
        let scale = self.frame_scale(frame);
        let result = self.infer(frame).and_then(|outputs| {
            let scale = scale.ok_or_else(|| anyhow!("no input size"))?;
            Predictions::from_outputs(&outputs)?.targets(target, threshold, &scale)
        });

        let (candidates, failed) = match result {
            Ok(found) => (found, false),
            Err(err) => {
                self.record_failure(&err);
                (Vec::new(), true)
            }
        };

        let confidence = candidates
            .iter()
            .map(|d| d.confidence)
            .fold(0f32, f32::max);
        let boxes: Vec<BBox> = candidates.iter().map(|d| d.bbox).collect();
        self.memory.update(&boxes);

        let mut clean = frame.clone();
        let mut preview = frame.clone();

        if failed && self.policy == FailurePolicy::FailClosed {
            render::blur_entire(&mut clean);
            render::blur_entire(&mut preview);
            return TrackedFrame {
                detected: true,
                confidence: 1.0,
                clean,
                preview,
                region_count: self.memory.len(),
            };
        }

        let (w, h) = (frame.width(), frame.height());
        for region in self.memory.regions() {
            let padded = region.bbox.padded(REDACTION_PADDING, w, h);
            render::heavy_blur(&mut clean, padded);
            render::heavy_blur(&mut preview, padded);
            render::draw_region_border(&mut preview, padded, region.is_fading());
        }

        TrackedFrame {
            detected: !candidates.is_empty(),
            confidence,
            clean,
            preview,
            region_count: self.memory.len(),
        }
    }

    /// All-class argmax detections for debug overlays. Does not touch the
    /// threat memory. Failures yield an empty list.
    pub fn debug_detections(&mut self, frame: &Frame, threshold: f32) -> Vec<Detection> {
        let scale = self.frame_scale(frame);
        let result = self.infer(frame).and_then(|outputs| {
            let scale = scale.ok_or_else(|| anyhow!("no input size"))?;
            Ok(Predictions::from_outputs(&outputs)?.all_classes(threshold, &scale))
        });
        match result {
            Ok(found) => found,
            Err(err) => {
                self.record_failure(&err);
                Vec::new()
            }
        }
    }

    fn frame_scale(&self, frame: &Frame) -> Option<FrameScale> {
        let backend = self.backend.as_ref()?;
        let (iw, ih) = backend.input_size();
        Some(FrameScale::new(frame.width(), frame.height(), iw, ih))
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<NamedTensor>> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| anyhow!(LensError::ModelLoadFailure("no model loaded".into())))?;
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!("empty frame"));
        }
        let (iw, ih) = backend.input_size();
        let input = preprocess(frame, iw, ih)?;
        backend
            .infer(&input)
            .map_err(|err| anyhow!(LensError::InferenceFailure(format!("{:#}", err))))
    }

    fn record_failure(&mut self, err: &anyhow::Error) {
        // A disabled engine already logged its load failure once.
        if !self.is_enabled() {
            return;
        }
        self.failures += 1;
        if self.failures == 1 || self.failures % FAILURE_LOG_EVERY == 0 {
            log::warn!(
                "inference failure #{} (treated as {:?}): {:#}",
                self.failures,
                self.policy,
                err
            );
        }
    }
}

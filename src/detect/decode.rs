//! Model output decoding.
//!
//! The first output tensor holds, per anchor, `[cx, cy, w, h, score_0 .. score_n]`
//! with box values in model-input pixels. Two layouts are accepted:
//! - feature-major `[1, 4 + n, anchors]` (native YOLOv8 export)
//! - anchor-major `[1, anchors, 4 + n]` or `[anchors, 4 + n]`
//!
//! For 3-D outputs the smaller trailing dimension is taken as the feature axis.

use anyhow::{anyhow, Result};

use super::backend::NamedTensor;
use crate::geometry::BBox;

/// One decoded box in original-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BBox,
}

/// Mapping from model-input coordinates to frame pixels.
#[derive(Clone, Copy, Debug)]
pub struct FrameScale {
    pub scale_x: f32,
    pub scale_y: f32,
    pub frame_w: u32,
    pub frame_h: u32,
}

impl FrameScale {
    pub fn new(frame_w: u32, frame_h: u32, input_w: u32, input_h: u32) -> Self {
        Self {
            scale_x: frame_w as f32 / input_w as f32,
            scale_y: frame_h as f32 / input_h as f32,
            frame_w,
            frame_h,
        }
    }
}

/// Borrowed view over the prediction tensor.
pub struct Predictions<'a> {
    data: &'a [f32],
    anchors: usize,
    features: usize,
    feature_major: bool,
}

impl<'a> Predictions<'a> {
    pub fn from_outputs(outputs: &'a [NamedTensor]) -> Result<Self> {
        let first = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let shape = first.tensor.shape();
        let (anchors, features, feature_major) = match shape {
            [1, a, b] if a < b => (*b, *a, true),
            [1, a, b] => (*a, *b, false),
            [a, b] => (*a, *b, false),
            other => return Err(anyhow!("unsupported prediction shape {:?}", other)),
        };
        if features <= 4 {
            return Err(anyhow!(
                "prediction tensor has {} features per anchor; need box + class scores",
                features
            ));
        }
        Ok(Self {
            data: first.tensor.data(),
            anchors,
            features,
            feature_major,
        })
    }

    pub fn anchors(&self) -> usize {
        self.anchors
    }

    pub fn num_classes(&self) -> usize {
        self.features - 4
    }

    fn value(&self, anchor: usize, feature: usize) -> f32 {
        if self.feature_major {
            self.data[feature * self.anchors + anchor]
        } else {
            self.data[anchor * self.features + feature]
        }
    }

    fn class_score(&self, anchor: usize, class_id: usize) -> f32 {
        self.value(anchor, 4 + class_id)
    }

    fn bbox(&self, anchor: usize, scale: &FrameScale) -> BBox {
        BBox::from_center(
            self.value(anchor, 0),
            self.value(anchor, 1),
            self.value(anchor, 2),
            self.value(anchor, 3),
            scale.scale_x,
            scale.scale_y,
            scale.frame_w,
            scale.frame_h,
        )
    }

    fn check_class(&self, class_id: usize) -> Result<()> {
        if class_id >= self.num_classes() {
            return Err(anyhow!(
                "target class {} out of range for a {}-class model",
                class_id,
                self.num_classes()
            ));
        }
        Ok(())
    }

    /// Highest target-class score over all anchors, ungated. Zero when the
    /// model emitted no anchors.
    pub fn best_score(&self, class_id: usize) -> Result<f32> {
        self.check_class(class_id)?;
        let best = (0..self.anchors)
            .map(|a| self.class_score(a, class_id))
            .filter(|s| s.is_finite())
            .fold(0f32, f32::max);
        Ok(best)
    }

    /// Anchors whose target-class score reaches `threshold`. Boxes that clamp
    /// to zero area are dropped.
    pub fn targets(
        &self,
        class_id: usize,
        threshold: f32,
        scale: &FrameScale,
    ) -> Result<Vec<Detection>> {
        self.check_class(class_id)?;
        let mut out = Vec::new();
        for anchor in 0..self.anchors {
            let score = self.class_score(anchor, class_id);
            if !(score >= threshold) {
                continue;
            }
            let bbox = self.bbox(anchor, scale);
            if bbox.is_empty() {
                continue;
            }
            out.push(Detection {
                class_id,
                confidence: score,
                bbox,
            });
        }
        Ok(out)
    }

    /// Argmax over all classes per anchor, kept when the winning score reaches
    /// `threshold`. Used for debug overlays only.
    pub fn all_classes(&self, threshold: f32, scale: &FrameScale) -> Vec<Detection> {
        let mut out = Vec::new();
        for anchor in 0..self.anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for class_id in 0..self.num_classes() {
                let score = self.class_score(anchor, class_id);
                if score > best.1 {
                    best = (class_id, score);
                }
            }
            if best.1 < threshold {
                continue;
            }
            let bbox = self.bbox(anchor, scale);
            if bbox.is_empty() {
                continue;
            }
            out.push(Detection {
                class_id: best.0,
                confidence: best.1,
                bbox,
            });
        }
        out
    }
}

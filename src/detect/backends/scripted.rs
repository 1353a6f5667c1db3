use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::{InferenceBackend, NamedTensor, Tensor};

/// One anchor the backend will emit: class, score, and a center box in
/// model-input pixels.
pub type ScriptedAnchor = (usize, f32, [f32; 4]);

#[derive(Clone, Debug)]
enum Step {
    Anchors(Vec<ScriptedAnchor>),
    Fail,
}

/// Deterministic backend that replays a script of per-call outputs.
///
/// Each `infer` call pops one step. Once the script is exhausted the backend
/// emits no anchors, or restarts from the top when built with `repeating`.
/// Used by tests and by `stub://` model paths.
pub struct ScriptedBackend {
    input: (u32, u32),
    classes: usize,
    script: Vec<Step>,
    pending: VecDeque<Step>,
    repeat: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(input_w: u32, input_h: u32, classes: usize) -> Self {
        Self {
            input: (input_w, input_h),
            classes: classes.max(1),
            script: Vec::new(),
            pending: VecDeque::new(),
            repeat: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// One target-class anchor per call, centered in the input, for each
    /// confidence. A confidence of zero yields an empty frame.
    pub fn from_confidences(
        input_w: u32,
        input_h: u32,
        classes: usize,
        target: usize,
        confidences: &[f32],
    ) -> Self {
        let center = [input_w as f32 / 2.0, input_h as f32 / 2.0, 100.0, 100.0];
        confidences.iter().fold(
            Self::new(input_w, input_h, classes.max(target + 1)),
            |backend, &c| {
                if c > 0.0 {
                    backend.with_frame(vec![(target, c, center)])
                } else {
                    backend.with_frame(Vec::new())
                }
            },
        )
    }

    pub fn with_frame(mut self, anchors: Vec<ScriptedAnchor>) -> Self {
        self.push(Step::Anchors(anchors));
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.push(Step::Fail);
        self
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Shared call counter, readable after the backend moves into an engine.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn push(&mut self, step: Step) {
        self.script.push(step.clone());
        self.pending.push_back(step);
    }

    fn next_step(&mut self) -> Step {
        if self.pending.is_empty() && self.repeat {
            self.pending.extend(self.script.iter().cloned());
        }
        self.pending
            .pop_front()
            .unwrap_or_else(|| Step::Anchors(Vec::new()))
    }

    fn encode(&self, anchors: &[ScriptedAnchor]) -> Result<Tensor> {
        let features = 4 + self.classes;
        let mut data = vec![0f32; anchors.len() * features];
        for (i, (class_id, score, [cx, cy, w, h])) in anchors.iter().enumerate() {
            if *class_id >= self.classes {
                return Err(anyhow!(
                    "scripted class {} exceeds {} classes",
                    class_id,
                    self.classes
                ));
            }
            let row = &mut data[i * features..(i + 1) * features];
            row[..4].copy_from_slice(&[*cx, *cy, *w, *h]);
            row[4 + class_id] = *score;
        }
        Tensor::new(vec![anchors.len(), features], data)
    }
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn input_size(&self) -> (u32, u32) {
        self.input
    }

    fn infer(&mut self, input: &Tensor) -> Result<Vec<NamedTensor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (w, h) = self.input;
        if input.shape() != [1, 3, h as usize, w as usize] {
            return Err(anyhow!(
                "input shape {:?} does not match {}x{}",
                input.shape(),
                w,
                h
            ));
        }
        match self.next_step() {
            Step::Fail => Err(anyhow!("scripted inference failure")),
            Step::Anchors(anchors) => Ok(vec![NamedTensor {
                name: "output0".into(),
                tensor: self.encode(&anchors)?,
            }]),
        }
    }
}

#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{self as backend, InferenceBackend, NamedTensor};

/// Default square input for YOLOv8 exports.
pub const DEFAULT_INPUT: u32 = 640;

/// Tract-based backend for ONNX inference.
///
/// Loads a local model file once and runs it on the CPU. No network I/O.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    output_names: Vec<String>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for `[1, 3, height, width]` input.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let typed = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?;

        let output_names = typed
            .output_outlets()
            .context("model has no outputs")?
            .iter()
            .enumerate()
            .map(|(i, outlet)| {
                let name = &typed.node(outlet.node).name;
                if name.is_empty() {
                    format!("output{}", i)
                } else {
                    name.clone()
                }
            })
            .collect();

        let model = typed
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            output_names,
            width,
            height,
        })
    }

    /// Load with the default 640x640 input.
    pub fn load(model_path: &Path) -> Result<Self> {
        Self::new(model_path, DEFAULT_INPUT, DEFAULT_INPUT)
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn infer(&mut self, input: &backend::Tensor) -> Result<Vec<NamedTensor>> {
        let shape = input.shape().to_vec();
        let array = tract_ndarray::ArrayD::from_shape_vec(shape, input.data().to_vec())
            .context("input tensor shape mismatch")?;
        let outputs = self
            .model
            .run(tvec!(array.into_tensor().into()))
            .context("ONNX inference failed")?;

        outputs
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let view = value
                    .to_array_view::<f32>()
                    .context("model output tensor was not f32")?;
                let name = self
                    .output_names
                    .get(i)
                    .cloned()
                    .ok_or_else(|| anyhow!("unexpected output index {}", i))?;
                Ok(NamedTensor {
                    name,
                    tensor: backend::Tensor::new(
                        view.shape().to_vec(),
                        view.iter().copied().collect(),
                    )?,
                })
            })
            .collect()
    }

    fn warm_up(&mut self) -> Result<()> {
        let (w, h) = (self.width as usize, self.height as usize);
        let blank = backend::Tensor::new(vec![1, 3, h, w], vec![0.0; 3 * w * h])?;
        self.infer(&blank).map(|_| ())
    }
}

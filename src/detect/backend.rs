use anyhow::{anyhow, Result};

/// Dense `f32` tensor in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| anyhow!("tensor shape {:?} overflows", shape))?;
        if expected != data.len() {
            return Err(anyhow!(
                "tensor shape {:?} needs {} values, received {}",
                shape,
                expected,
                data.len()
            ));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Named output of one inference call.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub tensor: Tensor,
}

/// Inference backend contract.
///
/// A backend accepts one normalized `[1, 3, H, W]` tensor whose `H`/`W` equal
/// `input_size()`, and returns one or more named output tensors. The first
/// output carries the per-anchor box and class scores. Errors are returned,
/// never swallowed; the engine decides how to degrade.
///
/// Backends must not retain the input tensor beyond the call.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Fixed model input resolution as `(width, height)`.
    fn input_size(&self) -> (u32, u32);

    /// Run the model on one preprocessed tensor.
    fn infer(&mut self, input: &Tensor) -> Result<Vec<NamedTensor>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

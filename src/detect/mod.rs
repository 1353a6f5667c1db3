mod backend;
pub mod backends;
mod decode;
mod engine;
mod tensor;
mod tracker;

pub use backend::{InferenceBackend, NamedTensor, Tensor};
pub use backends::ScriptedBackend;
pub use decode::{Detection, FrameScale, Predictions};
pub use engine::{
    BackendLoader, DetectionEngine, FailurePolicy, TrackedFrame, Verdict, DEFAULT_TARGET_CLASS,
};
pub use tensor::preprocess;
pub use tracker::{ThreatMemory, ThreatRegion, COOLDOWN_LIMIT, MATCH_IOU};

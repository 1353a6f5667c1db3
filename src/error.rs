//! Error taxonomy.
//!
//! Errors travel as `anyhow::Error`; callers that need to branch on the kind
//! use `err.downcast_ref::<LensError>()`. Only `CameraUnavailable` is fatal,
//! and only to starting the controller. Everything else degrades.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LensError {
    /// The frame source could not be opened.
    CameraUnavailable(String),
    /// The inference model could not be loaded; the engine runs disabled.
    ModelLoadFailure(String),
    /// A single inference call failed.
    InferenceFailure(String),
    /// The virtual camera sink could not be opened or written.
    VirtualCameraUnavailable(String),
    /// Configuration could not be read or parsed; defaults apply.
    ConfigReadFailure(String),
}

impl LensError {
    pub fn code(&self) -> &'static str {
        match self {
            LensError::CameraUnavailable(_) => "CAMERA_UNAVAILABLE",
            LensError::ModelLoadFailure(_) => "MODEL_LOAD_FAILURE",
            LensError::InferenceFailure(_) => "INFERENCE_FAILURE",
            LensError::VirtualCameraUnavailable(_) => "VIRTUAL_CAMERA_UNAVAILABLE",
            LensError::ConfigReadFailure(_) => "CONFIG_READ_FAILURE",
        }
    }

    fn detail(&self) -> &str {
        match self {
            LensError::CameraUnavailable(d)
            | LensError::ModelLoadFailure(d)
            | LensError::InferenceFailure(d)
            | LensError::VirtualCameraUnavailable(d)
            | LensError::ConfigReadFailure(d) => d,
        }
    }

    /// True when this kind of failure must stop the controller from starting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LensError::CameraUnavailable(_))
    }
}

impl std::fmt::Display for LensError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.detail())
    }
}

impl std::error::Error for LensError {}

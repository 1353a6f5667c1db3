//! LensBlock
//!
//! Watches a live camera feed for recording devices (phones) pointed at the
//! screen and reacts before the frame leaves the machine.
//!
//! # Architecture
//!
//! Data flows one way per cycle:
//!
//! ```text
//! FrameSource -> DetectionEngine -> ThreatController -> sinks
//!                                    (lockout / redaction)  (virtual camera, preview, audit)
//! ```
//!
//! Two protection modes:
//!
//! 1. **Shield**: a confirmed threat (N consecutive confident frames) locks the
//!    output behind a blocked frame until the object has left and a sliding
//!    timer has expired.
//! 2. **Censorship**: detected objects are tracked across frames and blurred
//!    in place. A frame that cannot be redacted within budget is never sent;
//!    the last safe frame is repeated instead.
//!
//! # Module Structure
//!
//! - `frame`: pixel container and the single-slot latest-frame buffer
//! - `ingest`: capture devices and the capture thread
//! - `detect`: inference backends, pre/post-processing, threat tracking
//! - `render`: blur, borders, synthetic frames
//! - `controller`: frame loop, lockout machine, redaction gate
//! - `output`: virtual camera sinks
//! - `audit`: hash-chained incident log
//! - `config`: file/env configuration and live settings
//! - `notify`: latest-value mailboxes for UI consumers

pub mod audit;
pub mod config;
pub mod controller;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod notify;
pub mod output;
pub mod render;

pub use audit::{AuditLog, InMemoryAuditLog, IncidentRecord, SqliteAuditLog};
pub use config::{DetectionSettings, LensConfig, LiveSettings};
pub use controller::{
    ControlHandle, ControllerStats, CycleOutcome, ProtectionMode, RunningController,
    ThreatController,
};
pub use detect::{DetectionEngine, FailurePolicy, ScriptedBackend, TrackedFrame, Verdict};
pub use error::LensError;
pub use frame::{ChannelOrder, Frame, LatestFrame};
pub use geometry::BBox;
pub use ingest::{CameraStream, CaptureConfig, FrameSource};
pub use notify::{LockoutNotice, Notifier, NotifierReceivers};
pub use output::{MemoryCamera, VirtualCamera};

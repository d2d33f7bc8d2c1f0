//! Object Tally
//!
//! Live object detection with per-label counting.
//!
//! # Architecture
//!
//! A `DetectionLoop` pulls one frame at a time from a `FrameSource`, hands it to a
//! `Detector`, counts the detections whose label is tracked and publishes the annotated
//! frame plus the counts to a `DisplaySink`:
//!
//! 1. **Scoped source**: the camera is held only while the loop is running.
//! 2. **Fresh counts**: every `CountSnapshot` comes from one cycle's detections alone.
//! 3. **Fail stop**: a capture or inference failure ends the session and publishes nothing.
//!
//! # Module Structure
//!
//! - `frame`: pixel buffers with an explicit channel order
//! - `ingest`: frame sources (synthetic, image directory, V4L2 webcam)
//! - `detect`: detector trait, backends, suppression, annotation, registry
//! - `controller`: the detection loop and its cross-thread control handle
//! - `sink`, `dashboard`: where frames and counts end up

pub mod config;
pub mod controller;
pub mod dashboard;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
mod normalize;
pub mod params;
pub mod sink;
pub mod tally;
pub mod ui;

pub use config::TallyConfig;
pub use controller::{ControlHandle, DetectionLoop, LoopState, LoopStats, RunLimits};
pub use dashboard::{DashboardConfig, DashboardHandle, DashboardServer, DashboardSink};
pub use detect::{
    BoundingBox, Detection, Detector, DetectorRegistry, Inference, SharedDetector, StubDetector,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractDetector;
pub use error::LoopError;
pub use frame::{Frame, PixelFormat};
pub use ingest::{build_source, FrameSource, ImageDirSource, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{V4l2Config, V4l2Source};
pub use params::{DetectionParameters, TrackedLabels};
pub use sink::{DisplaySink, LogSink};
pub use tally::{tally, CountSnapshot};

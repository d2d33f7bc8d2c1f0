//! Session-ending failures of the detection loop.

use thiserror::Error;

/// Every variant ends the running session. None are retried.
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("could not open video source {source_name}: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("failed to capture frame {frame} from {source_name}: {reason}")]
    CaptureFailure {
        source_name: String,
        frame: u64,
        reason: String,
    },

    #[error("detector {detector} failed on frame {frame}: {reason}")]
    DetectionFailure {
        detector: String,
        frame: u64,
        reason: String,
    },
}

impl LoopError {
    /// Short stable identifier, used by the dashboard status payload.
    pub fn kind(&self) -> &'static str {
        match self {
            LoopError::SourceUnavailable { .. } => "source_unavailable",
            LoopError::CaptureFailure { .. } => "capture_failure",
            LoopError::DetectionFailure { .. } => "detection_failure",
        }
    }
}

pub(crate) fn describe(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

//! Frame sources.
//!
//! This module provides the `FrameSource` contract and the sources behind it:
//! - Synthetic frames (`stub://name`, testing and demos)
//! - A local directory of JPEG/PNG stills, read in name order
//! - USB/V4L2 webcams (feature: ingest-v4l2)
//!
//! A source is opened once per detection session and released when the session
//! ends, whichever way it ends. Sources never retain frames after handing them over.

pub mod images;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::config::SourceSettings;
use crate::frame::Frame;

pub use images::{ImageDirConfig, ImageDirSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// A video source the detection loop pulls frames from.
pub trait FrameSource {
    /// Human-readable identifier used in logs and error messages.
    fn describe(&self) -> String;

    /// Acquire the underlying device or stream.
    fn open(&mut self) -> Result<()>;

    /// Read the next frame. `Ok(None)` means the stream has no more frames.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Give the device back. Must be safe to call when not open.
    fn release(&mut self);

    fn is_open(&self) -> bool;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        (**self).read_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// How a source URI is interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic(String),
    Webcam(String),
    ImageDir(String),
}

/// Classify a source URI.
///
/// - `stub://name` is synthetic
/// - a bare integer `N`, `/dev/videoN` or `v4l2://<path>` is a webcam
/// - any other scheme is rejected; everything else is a local directory
pub fn classify_source(uri: &str) -> Result<SourceKind> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("source URI must not be empty"));
    }
    if uri.starts_with("stub://") {
        return Ok(SourceKind::Synthetic(uri.to_string()));
    }
    if let Some(device) = uri.strip_prefix("v4l2://") {
        return Ok(SourceKind::Webcam(device.to_string()));
    }
    if uri.chars().all(|c| c.is_ascii_digit()) {
        return Ok(SourceKind::Webcam(format!("/dev/video{}", uri)));
    }
    if uri.starts_with("/dev/video") {
        return Ok(SourceKind::Webcam(uri.to_string()));
    }
    if uri.contains("://") {
        return Err(anyhow!("unsupported source scheme in '{}'", uri));
    }
    Ok(SourceKind::ImageDir(uri.to_string()))
}

/// Build (but do not open) the source described by `settings`.
pub fn build_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    match classify_source(&settings.uri)? {
        SourceKind::Synthetic(name) => Ok(Box::new(SyntheticSource::new(SyntheticConfig {
            name,
            width: settings.width,
            height: settings.height,
            max_frames: settings.max_frames,
        }))),
        SourceKind::ImageDir(path) => Ok(Box::new(ImageDirSource::new(ImageDirConfig {
            path: path.into(),
            repeat: settings.repeat,
        }))),
        #[cfg(feature = "ingest-v4l2")]
        SourceKind::Webcam(device) => Ok(Box::new(V4l2Source::new(V4l2Config {
            device,
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
        }))),
        #[cfg(not(feature = "ingest-v4l2"))]
        SourceKind::Webcam(device) => Err(anyhow!(
            "webcam {} requires the ingest-v4l2 feature; rebuild with --features ingest-v4l2 \
             or use a stub:// or image directory source",
            device
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_source_uris() -> Result<()> {
        assert_eq!(
            classify_source("stub://front")?,
            SourceKind::Synthetic("stub://front".into())
        );
        assert_eq!(classify_source("0")?, SourceKind::Webcam("/dev/video0".into()));
        assert_eq!(
            classify_source("/dev/video2")?,
            SourceKind::Webcam("/dev/video2".into())
        );
        assert_eq!(
            classify_source("v4l2:///dev/video1")?,
            SourceKind::Webcam("/dev/video1".into())
        );
        assert_eq!(
            classify_source("./frames")?,
            SourceKind::ImageDir("./frames".into())
        );
        assert!(classify_source("rtsp://camera").is_err());
        assert!(classify_source("  ").is_err());
        Ok(())
    }

    #[test]
    fn builds_synthetic_source_without_opening_it() -> Result<()> {
        let settings = SourceSettings {
            uri: "stub://test".to_string(),
            ..SourceSettings::default()
        };
        let source = build_source(&settings)?;
        assert!(!source.is_open());
        assert_eq!(source.describe(), "stub://test");
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn default_webcam_explains_missing_feature() {
        let err = build_source(&SourceSettings::default())
            .err()
            .expect("webcam source needs the feature");
        let msg = err.to_string();
        assert!(msg.contains("/dev/video0"));
        assert!(msg.contains("--features ingest-v4l2"));
    }
}

use anyhow::Result;

use crate::detect::result::Inference;
use crate::frame::Frame;
use crate::params::DetectionParameters;

/// Detector backend trait.
///
/// A backend owns thresholding and suppression entirely: the detection loop passes
/// the current parameters through unchanged and only reads the final list.
/// The annotated frame may be in any layout (it carries its own `PixelFormat`); the
/// loop converts it for the sink.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on one frame.
    fn infer(&mut self, frame: &Frame, params: &DetectionParameters) -> Result<Inference>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, frame: &Frame, params: &DetectionParameters) -> Result<Inference> {
        (**self).infer(frame, params)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}

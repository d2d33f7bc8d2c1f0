pub mod annotate;
mod backend;
mod backends;
mod registry;
mod result;
pub mod suppression;

pub use backend::Detector;
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use registry::{DetectorFactory, DetectorRegistry, SharedDetector};
pub use result::{BoundingBox, Detection, Inference};

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::annotate::annotate;
use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection, Inference};
use crate::detect::suppression::filter_and_suppress;
use crate::frame::Frame;
use crate::params::DetectionParameters;

const STUB_LABELS: [&str; 3] = ["bottle", "hotpack", "cup"];
const MAX_CANDIDATES: usize = 4;
const BYTES_PER_CANDIDATE: usize = 6;

/// Stub backend for demos and tests.
///
/// Candidates are derived from a SHA-256 digest of the pixels, so the same frame always
/// yields the same raw candidates and only the parameters decide what survives.
#[derive(Default)]
pub struct StubDetector {
    frames_seen: u64,
}

impl StubDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    fn candidates(frame: &Frame) -> Vec<Detection> {
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let count = digest[0] as usize % (MAX_CANDIDATES + 1);
        let width = frame.width() as f32;
        let height = frame.height() as f32;

        (0..count)
            .map(|i| {
                let b = &digest[1 + i * BYTES_PER_CANDIDATE..1 + (i + 1) * BYTES_PER_CANDIDATE];
                let label = STUB_LABELS[b[0] as usize % STUB_LABELS.len()];
                let confidence = 0.3 + (b[1] as f32 / 255.0) * 0.7;
                let w = width * (0.1 + (b[4] as f32 / 255.0) * 0.3);
                let h = height * (0.1 + (b[5] as f32 / 255.0) * 0.3);
                let x = (b[2] as f32 / 255.0) * (width - w);
                let y = (b[3] as f32 / 255.0) * (height - h);
                Detection::new(label, confidence, BoundingBox::new(x, y, w, h))
            })
            .collect()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: &Frame, params: &DetectionParameters) -> Result<Inference> {
        self.frames_seen += 1;
        let detections = filter_and_suppress(Self::candidates(frame), params);
        let annotated = annotate(frame, &detections)?;
        Ok(Inference {
            detections,
            annotated,
        })
    }
}

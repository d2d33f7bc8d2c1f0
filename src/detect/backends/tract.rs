#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::annotate::annotate;
use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection, Inference};
use crate::detect::suppression::filter_and_suppress;
use crate::frame::{Frame, PixelFormat};
use crate::params::DetectionParameters;

/// Tract-based backend for YOLO-style ONNX exports.
///
/// Expects a square `[1, 3, S, S]` RGB input in 0..1 and a single `[1, 4 + classes, N]`
/// output of centre-x, centre-y, width, height (input pixels) followed by class scores.
pub struct TractDetector {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Vec<String>,
}

impl TractDetector {
    /// Load an ONNX model and its class names from disk.
    pub fn new<P: AsRef<Path>, L: AsRef<Path>>(
        model_path: P,
        labels_path: L,
        input_size: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let labels_path = labels_path.as_ref();
        if input_size == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }

        let labels = load_labels(labels_path)?;
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractDetector: loaded {} ({} classes, {}x{} input)",
            model_path.display(),
            labels.len(),
            input_size,
            input_size
        );

        Ok(Self {
            model,
            input_size,
            labels,
        })
    }

    fn build_input(&self, rgb: &Frame) -> Tensor {
        let side = self.input_size as usize;
        let src_w = rgb.width() as usize;
        let src_h = rgb.height() as usize;
        let pixels = rgb.pixels();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            // nearest-neighbour resize
            let sx = (x * src_w / side).min(src_w - 1);
            let sy = (y * src_h / side).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;
        let (_, rows, anchors) = view.dim();
        if rows != 4 + self.labels.len() {
            return Err(anyhow!(
                "model output has {} class rows but {} labels were loaded",
                rows.saturating_sub(4),
                self.labels.len()
            ));
        }

        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;
        let mut detections = Vec::new();
        for i in 0..anchors {
            let (class, score) = (0..self.labels.len())
                .map(|c| (c, view[[0, 4 + c, i]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() {
                continue;
            }
            let cx = view[[0, 0, i]];
            let cy = view[[0, 1, i]];
            let w = view[[0, 2, i]];
            let h = view[[0, 3, i]];
            detections.push(Detection::new(
                self.labels[class].clone(),
                score.clamp(0.0, 1.0),
                BoundingBox::new(
                    (cx - w / 2.0) * scale_x,
                    (cy - h / 2.0) * scale_y,
                    w * scale_x,
                    h * scale_y,
                ),
            ));
        }
        Ok(detections)
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame, params: &DetectionParameters) -> Result<Inference> {
        let rgb = frame.to_format(PixelFormat::Rgb24)?;
        let input = self.build_input(&rgb);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let candidates = self.decode(outputs, frame)?;
        let detections = filter_and_suppress(candidates, params);
        let annotated = annotate(frame, &detections)?;
        Ok(Inference {
            detections,
            annotated,
        })
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = tract_ndarray::Array4::<f32>::zeros((1, 3, side, side)).into_tensor();
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up run failed")?;
        Ok(())
    }
}

fn load_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read class names from {}", path.display()))?;
    let labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        return Err(anyhow!("class names file {} is empty", path.display()));
    }
    Ok(labels)
}

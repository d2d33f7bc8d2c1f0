use std::cmp::Ordering;

use crate::detect::result::Detection;
use crate::params::DetectionParameters;

/// Drop detections below the confidence threshold, then run greedy suppression.
pub fn filter_and_suppress(
    detections: Vec<Detection>,
    params: &DetectionParameters,
) -> Vec<Detection> {
    let confident = detections
        .into_iter()
        .filter(|d| d.confidence >= params.confidence_threshold())
        .collect();
    suppress(
        confident,
        params.overlap_threshold(),
        params.class_agnostic_suppression(),
    )
}

/// Greedy non-max suppression.
///
/// Candidates are visited by descending confidence (stable for ties). A candidate is
/// dropped when its IoU with an already kept box is strictly above `overlap_threshold`
/// and either suppression is class-agnostic or both share a label.
pub fn suppress(
    mut detections: Vec<Detection>,
    overlap_threshold: f32,
    class_agnostic: bool,
) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    'candidates: for candidate in detections {
        for existing in &kept {
            if !class_agnostic && existing.label != candidate.label {
                continue;
            }
            if existing.bounding_box.iou(&candidate.bounding_box) > overlap_threshold {
                continue 'candidates;
            }
        }
        kept.push(candidate);
    }
    kept
}

use anyhow::{anyhow, Result};
use serde::Serialize;

pub const DEFAULT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_OVERLAP: f32 = 0.5;
pub const DEFAULT_TRACKED_LABELS: [&str; 2] = ["bottle", "hotpack"];

/// User-adjustable knobs handed to the detector unchanged every cycle.
///
/// Only `new` builds non-default values, so thresholds are always within [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DetectionParameters {
    confidence_threshold: f32,
    overlap_threshold: f32,
    class_agnostic_suppression: bool,
}

impl DetectionParameters {
    pub fn new(
        confidence_threshold: f32,
        overlap_threshold: f32,
        class_agnostic_suppression: bool,
    ) -> Result<Self> {
        check_unit_interval("confidence threshold", confidence_threshold)?;
        check_unit_interval("overlap threshold", overlap_threshold)?;
        Ok(Self {
            confidence_threshold,
            overlap_threshold,
            class_agnostic_suppression,
        })
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn overlap_threshold(&self) -> f32 {
        self.overlap_threshold
    }

    pub fn class_agnostic_suppression(&self) -> bool {
        self.class_agnostic_suppression
    }
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE,
            overlap_threshold: DEFAULT_OVERLAP,
            class_agnostic_suppression: true,
        }
    }
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

/// Ordered, de-duplicated set of labels the tally reports on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedLabels {
    labels: Vec<String>,
}

impl TrackedLabels {
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if label.trim().is_empty() {
                return Err(anyhow!("tracked labels must not be blank"));
            }
            if !out.contains(&label) {
                out.push(label);
            }
        }
        if out.is_empty() {
            return Err(anyhow!("at least one tracked label is required"));
        }
        Ok(Self { labels: out })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for TrackedLabels {
    fn default() -> Self {
        Self {
            labels: DEFAULT_TRACKED_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_must_be_in_unit_interval() {
        assert!(DetectionParameters::new(0.0, 1.0, false).is_ok());
        assert!(DetectionParameters::new(1.2, 0.5, true).is_err());
        assert!(DetectionParameters::new(0.5, -0.1, true).is_err());
        assert!(DetectionParameters::new(f32::NAN, 0.5, true).is_err());
    }

    #[test]
    fn serializes_validated_fields_for_status() -> Result<()> {
        let params = DetectionParameters::new(0.25, 0.75, false)?;
        let json = serde_json::to_value(params)?;
        assert_eq!(json["confidence_threshold"], 0.25);
        assert_eq!(json["overlap_threshold"], 0.75);
        assert_eq!(json["class_agnostic_suppression"], false);
        Ok(())
    }

    #[test]
    fn defaults_match_dashboard_initial_values() {
        let params = DetectionParameters::default();
        assert_eq!(params.confidence_threshold(), 0.5);
        assert_eq!(params.overlap_threshold(), 0.5);
        assert!(params.class_agnostic_suppression());
    }

    #[test]
    fn tracked_labels_dedupe_and_keep_order() -> Result<()> {
        let labels = TrackedLabels::new(["hotpack", "bottle", "hotpack"])?;
        assert_eq!(labels.iter().collect::<Vec<_>>(), vec!["hotpack", "bottle"]);
        assert!(TrackedLabels::new(Vec::<String>::new()).is_err());
        assert!(TrackedLabels::new([" "]).is_err());
        Ok(())
    }
}

//! Per-cycle label counting.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::detect::Detection;
use crate::params::TrackedLabels;

/// Count per tracked label for a single cycle.
///
/// Always covers exactly the tracked labels, in tracked order; labels with no detections
/// report zero. Serializes as a JSON object keyed by label.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CountSnapshot {
    counts: Vec<(String, u32)>,
}

impl CountSnapshot {
    /// All tracked labels at zero. This is what a dashboard shows before the first cycle.
    pub fn zeroed(tracked: &TrackedLabels) -> Self {
        Self {
            counts: tracked.iter().map(|l| (l.to_string(), 0)).collect(),
        }
    }

    pub fn get(&self, label: &str) -> Option<u32> {
        self.counts
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, count)| *count)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(l, c)| (l.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|(_, count)| count).sum()
    }
}

impl Serialize for CountSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.counts.len()))?;
        for (label, count) in &self.counts {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

/// Count detections per tracked label using exact, case-sensitive label matches.
///
/// Untracked labels are ignored. The result depends only on its arguments.
pub fn tally(detections: &[Detection], tracked: &TrackedLabels) -> CountSnapshot {
    let mut snapshot = CountSnapshot::zeroed(tracked);
    for detection in detections {
        if let Some((_, count)) = snapshot
            .counts
            .iter_mut()
            .find(|(label, _)| *label == detection.label)
        {
            *count += 1;
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(label: &str, confidence: f32) -> Detection {
        Detection::new(label, confidence, BoundingBox::new(0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn counts_tracked_labels_and_ignores_others() {
        let detections = vec![
            det("bottle", 0.9),
            det("bottle", 0.6),
            det("hotpack", 0.8),
            det("cup", 0.95),
        ];
        let snapshot = tally(&detections, &TrackedLabels::default());
        assert_eq!(snapshot.get("bottle"), Some(2));
        assert_eq!(snapshot.get("hotpack"), Some(1));
        assert_eq!(snapshot.get("cup"), None);
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn empty_detections_report_zero_for_every_label() {
        let snapshot = tally(&[], &TrackedLabels::default());
        assert_eq!(snapshot.get("bottle"), Some(0));
        assert_eq!(snapshot.get("hotpack"), Some(0));
        assert_eq!(snapshot.total(), 0);
    }

    #[test]
    fn matching_is_case_sensitive() {
        let snapshot = tally(&[det("Bottle", 0.9)], &TrackedLabels::default());
        assert_eq!(snapshot.get("bottle"), Some(0));
    }

    #[test]
    fn serializes_as_plain_object() {
        let snapshot = tally(&[det("hotpack", 0.7)], &TrackedLabels::default());
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"bottle":0,"hotpack":1}"#);
    }

    #[test]
    fn keeps_tracked_label_order() -> anyhow::Result<()> {
        let tracked = TrackedLabels::new(["hotpack", "cup", "bottle"])?;
        let snapshot = tally(&[det("bottle", 0.9), det("cup", 0.8)], &tracked);
        assert_eq!(
            snapshot.iter().collect::<Vec<_>>(),
            vec![("hotpack", 0), ("cup", 1), ("bottle", 1)]
        );
        assert_eq!(
            serde_json::to_string(&snapshot)?,
            r#"{"hotpack":0,"cup":1,"bottle":1}"#
        );
        Ok(())
    }
}

//! Attendance aggregation: roster identities seen in a batch of photos.

use crate::error::MatchError;
use crate::gallery::Gallery;
use crate::matcher::Matcher;
use crate::types::{DetectedFace, Threshold};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
        }
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(Self::Present),
            "Absent" => Ok(Self::Absent),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// Status of one roster identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub attendance: AttendanceStatus,
}

/// Faces detected in one uploaded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedImage {
    pub image_id: String,
    pub faces: Vec<DetectedFace>,
}

/// Mark every roster identity Present that is the accepted best match of at
/// least one face; everyone else is Absent. Output follows roster order.
///
/// Faces without a usable embedding are ignored.
pub fn compute_attendance<M: Matcher>(
    matcher: &M,
    roster: &Gallery,
    observed: &[ObservedImage],
    threshold: Threshold,
) -> Result<Vec<AttendanceRecord>, MatchError> {
    let mut present = vec![false; roster.len()];

    for image in observed {
        let mut matched = 0usize;
        for face in &image.faces {
            let Some(embedding) = face.usable_embedding() else {
                continue;
            };
            let result = matcher.compare(embedding, roster, threshold)?;
            tracing::debug!(
                image = %image.image_id,
                label = %result.best_label,
                confidence = result.confidence,
                accepted = result.accepted,
                "attendance: face matched"
            );
            if result.accepted {
                present[result.best_index] = true;
                matched += 1;
            }
        }
        tracing::debug!(image = %image.image_id, faces = image.faces.len(), matched, "attendance: image processed");
    }

    Ok(roster
        .labels()
        .iter()
        .zip(present)
        .map(|(name, seen)| AttendanceRecord {
            name: name.clone(),
            attendance: if seen {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Absent
            },
        })
        .collect())
}

/// Shared attendance state of a session: the observed images and the latest
/// attendance table.
///
/// Uploads may call [`observe`](Self::observe) concurrently; an aggregation
/// pass works on a snapshot taken under the lock.
#[derive(Debug, Default)]
pub struct AttendanceBook {
    observations: Mutex<Vec<ObservedImage>>,
    records: Mutex<Vec<AttendanceRecord>>,
}

impl AttendanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, image: ObservedImage) {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(image);
    }

    pub fn observation_count(&self) -> usize {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn snapshot(&self) -> Vec<ObservedImage> {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear the observed images for a new cycle. The roster and the last
    /// attendance table are left alone.
    pub fn reset_observations(&self) {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Recompute attendance over a snapshot of the observations and replace
    /// the stored table with the result.
    pub fn aggregate<M: Matcher>(
        &self,
        matcher: &M,
        roster: &Gallery,
        threshold: Threshold,
    ) -> Result<Vec<AttendanceRecord>, MatchError> {
        let snapshot = self.snapshot();
        let records = compute_attendance(matcher, roster, &snapshot, threshold)?;
        tracing::info!(
            images = snapshot.len(),
            present = records
                .iter()
                .filter(|r| r.attendance == AttendanceStatus::Present)
                .count(),
            roster = roster.len(),
            "attendance aggregated"
        );
        self.replace_records(records.clone());
        Ok(records)
    }

    /// Overwrite the stored table (manual overrides).
    pub fn replace_records(&self, records: Vec<AttendanceRecord>) {
        *self.records.lock().unwrap_or_else(PoisonError::into_inner) = records;
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryEntry;
    use crate::matcher::CosineMatcher;
    use crate::types::{BoundingBox, Embedding};
    use std::sync::Arc;

    fn roster(entries: &[(&str, Vec<f32>)]) -> Gallery {
        Gallery::build_roster(
            entries
                .iter()
                .map(|(l, v)| GalleryEntry::new(*l, Embedding::new(v.clone()))),
        )
        .unwrap()
    }

    fn face(values: Vec<f32>) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox::from_corners(0.0, 0.0, 10.0, 10.0, 0.9),
            embedding: Some(Embedding::new(values)),
        }
    }

    fn image(id: &str, faces: Vec<DetectedFace>) -> ObservedImage {
        ObservedImage {
            image_id: id.into(),
            faces,
        }
    }

    fn status(records: &[AttendanceRecord], name: &str) -> AttendanceStatus {
        records.iter().find(|r| r.name == name).unwrap().attendance
    }

    #[test]
    fn test_carol_present_from_second_image() {
        let roster = roster(&[("carol", vec![1.0, 0.0, 0.0])]);
        let observed = vec![
            image("photo_1.jpg", vec![]),
            image("photo_2.jpg", vec![face(vec![0.95, 0.05, 0.0])]),
        ];
        let records =
            compute_attendance(&CosineMatcher, &roster, &observed, Threshold::from_distance(0.65)).unwrap();
        assert_eq!(
            records,
            vec![AttendanceRecord {
                name: "carol".into(),
                attendance: AttendanceStatus::Present
            }]
        );
    }

    #[test]
    fn test_roster_order_and_absent_default() {
        let roster = roster(&[
            ("zoe", vec![1.0, 0.0, 0.0]),
            ("adam", vec![0.0, 1.0, 0.0]),
            ("mia", vec![0.0, 0.0, 1.0]),
        ]);
        let observed = vec![image("p1", vec![face(vec![0.0, 0.0, 1.0])])];
        let records = compute_attendance(&CosineMatcher, &roster, &observed, Threshold::similarity(0.5)).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["zoe", "adam", "mia"]);
        assert_eq!(status(&records, "zoe"), AttendanceStatus::Absent);
        assert_eq!(status(&records, "adam"), AttendanceStatus::Absent);
        assert_eq!(status(&records, "mia"), AttendanceStatus::Present);
    }

    #[test]
    fn test_below_threshold_stays_absent() {
        let roster = roster(&[("carol", vec![1.0, 0.0])]);
        let observed = vec![image("p1", vec![face(vec![0.2, 1.0])])];
        let records = compute_attendance(&CosineMatcher, &roster, &observed, Threshold::from_distance(0.65)).unwrap();
        assert_eq!(status(&records, "carol"), AttendanceStatus::Absent);
    }

    #[test]
    fn test_idempotent_and_empty_image_changes_nothing() {
        let roster = roster(&[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]);
        let mut observed = vec![image("p1", vec![face(vec![1.0, 0.1])])];
        let t = Threshold::similarity(0.5);

        let first = compute_attendance(&CosineMatcher, &roster, &observed, t).unwrap();
        let second = compute_attendance(&CosineMatcher, &roster, &observed, t).unwrap();
        assert_eq!(first, second);

        observed.push(image("p2", vec![]));
        let third = compute_attendance(&CosineMatcher, &roster, &observed, t).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_monotonic_union() {
        let roster = roster(&[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]);
        let t = Threshold::similarity(0.5);
        let mut observed = vec![image("p1", vec![face(vec![1.0, 0.0])])];
        let before = compute_attendance(&CosineMatcher, &roster, &observed, t).unwrap();
        assert_eq!(status(&before, "a"), AttendanceStatus::Present);

        // Same person again, someone else, and an unknown face.
        observed.push(image("p2", vec![face(vec![0.9, 0.1]), face(vec![0.0, 1.0])]));
        observed.push(image("p3", vec![face(vec![-1.0, -1.0])]));
        let after = compute_attendance(&CosineMatcher, &roster, &observed, t).unwrap();
        assert_eq!(status(&after, "a"), AttendanceStatus::Present);
        assert_eq!(status(&after, "b"), AttendanceStatus::Present);
    }

    #[test]
    fn test_unusable_faces_are_skipped() {
        let roster = roster(&[("a", vec![1.0, 0.0])]);
        let observed = vec![image(
            "p1",
            vec![
                face(vec![0.0, 0.0]),
                DetectedFace {
                    bbox: BoundingBox::from_corners(0.0, 0.0, 1.0, 1.0, 0.5),
                    embedding: None,
                },
            ],
        )];
        let records = compute_attendance(&CosineMatcher, &roster, &observed, Threshold::similarity(0.5)).unwrap();
        assert_eq!(status(&records, "a"), AttendanceStatus::Absent);
    }

    #[test]
    fn test_dimension_mismatch_aborts() {
        let roster = roster(&[("a", vec![1.0, 0.0])]);
        let observed = vec![image("p1", vec![face(vec![1.0, 0.0, 0.0])])];
        let err = compute_attendance(&CosineMatcher, &roster, &observed, Threshold::similarity(0.5)).unwrap_err();
        assert!(matches!(err, MatchError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_book_aggregate_replaces_records_and_reset_keeps_them() {
        let roster = roster(&[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]);
        let book = AttendanceBook::new();
        let t = Threshold::similarity(0.5);

        book.observe(image("p1", vec![face(vec![1.0, 0.0])]));
        let records = book.aggregate(&CosineMatcher, &roster, t).unwrap();
        assert_eq!(book.records(), records);
        assert_eq!(status(&records, "a"), AttendanceStatus::Present);

        book.reset_observations();
        assert_eq!(book.observation_count(), 0);
        assert_eq!(book.records(), records);

        let fresh = book.aggregate(&CosineMatcher, &roster, t).unwrap();
        assert_eq!(status(&fresh, "a"), AttendanceStatus::Absent);
        assert_eq!(book.records(), fresh);
    }

    #[test]
    fn test_book_concurrent_observe() {
        let book = Arc::new(AttendanceBook::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let book = Arc::clone(&book);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        book.observe(image(&format!("t{t}_{i}"), vec![]));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(book.observation_count(), 200);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Present".parse::<AttendanceStatus>(), Ok(AttendanceStatus::Present));
        assert_eq!("Absent".parse::<AttendanceStatus>(), Ok(AttendanceStatus::Absent));
        assert!("maybe".parse::<AttendanceStatus>().is_err());
    }
}

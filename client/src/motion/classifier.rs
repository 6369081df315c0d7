use runcatcher_common::frame::{FaceBox, TrackedFace};
use tracing::debug;

use super::matcher::{FaceMatcher, GreedyNearest};

/// Speed estimate for one face of the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionEstimate {
    pub face: FaceBox,
    /// The previous-frame box it was matched to.
    pub matched: FaceBox,
    /// Center displacement over elapsed time, in px/s.
    pub speed: f64,
}

impl MotionEstimate {
    pub fn is_running(&self, threshold: f64) -> bool {
        self.speed > threshold
    }
}

/// Center displacement between two boxes divided by `elapsed_secs`.
///
/// Zero elapsed time (or a clock that went backwards) yields 0.
pub fn motion_speed(current: &FaceBox, previous: &FaceBox, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    current.center_distance(previous) / elapsed_secs
}

/// Estimate a speed for every current box against the previous frame.
///
/// Returns nothing when `previous` is empty (first frame). Each current box
/// is matched on its own, so several may share one previous box.
pub fn classify(
    current: &[FaceBox],
    previous: &[TrackedFace],
    now_ms: i64,
    matcher: &dyn FaceMatcher,
) -> Vec<MotionEstimate> {
    if previous.is_empty() {
        return Vec::new();
    }

    current
        .iter()
        .filter_map(|face| {
            let prev = previous.get(matcher.match_previous(face, previous)?)?;
            let elapsed_secs = (now_ms - prev.seen_at_ms) as f64 / 1000.0;
            Some(MotionEstimate {
                face: *face,
                matched: prev.face,
                speed: motion_speed(face, &prev.face, elapsed_secs),
            })
        })
        .collect()
}

/// Remembers the previous frame's faces between detection cycles.
pub struct MotionClassifier {
    previous: Vec<TrackedFace>,
    matcher: Box<dyn FaceMatcher>,
}

impl Default for MotionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionClassifier {
    pub fn new() -> Self {
        Self::with_matcher(Box::new(GreedyNearest))
    }

    pub fn with_matcher(matcher: Box<dyn FaceMatcher>) -> Self {
        Self {
            previous: Vec::new(),
            matcher,
        }
    }

    /// Classify `current` against the remembered set, then replace the
    /// remembered set with `current` regardless of the outcome.
    pub fn observe(&mut self, current: &[FaceBox], now_ms: i64) -> Vec<MotionEstimate> {
        let estimates = classify(current, &self.previous, now_ms, self.matcher.as_ref());

        if self.previous.is_empty() {
            debug!(faces = current.len(), "no previous faces, seeding");
        } else {
            debug!(
                faces = current.len(),
                previous = self.previous.len(),
                matcher = self.matcher.name(),
                estimates = estimates.len(),
                "motion classified"
            );
        }

        self.previous = current
            .iter()
            .map(|face| TrackedFace::new(*face, now_ms))
            .collect();
        estimates
    }

    pub fn remembered(&self) -> &[TrackedFace] {
        &self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f64, y: f64) -> FaceBox {
        FaceBox::new(x, y, 40.0, 40.0)
    }

    #[test]
    fn first_frame_only_seeds() {
        let mut classifier = MotionClassifier::new();
        let boxes = [face(10.0, 10.0), face(200.0, 50.0)];

        let estimates = classifier.observe(&boxes, 1_000);

        assert!(estimates.is_empty());
        let remembered: Vec<FaceBox> = classifier.remembered().iter().map(|t| t.face).collect();
        assert_eq!(remembered, boxes);
        assert!(classifier.remembered().iter().all(|t| t.seen_at_ms == 1_000));
    }

    #[test]
    fn speed_is_pixels_per_second() {
        let mut classifier = MotionClassifier::new();
        classifier.observe(&[face(0.0, 0.0)], 1_000);

        // 30 px right, 40 px down = 50 px in 0.5 s.
        let estimates = classifier.observe(&[face(30.0, 40.0)], 1_500);

        assert_eq!(estimates.len(), 1);
        assert!((estimates[0].speed - 100.0).abs() < 1e-9);
        assert_eq!(estimates[0].matched, face(0.0, 0.0));
        assert!(estimates[0].is_running(99.0));
        assert!(!estimates[0].is_running(100.0));
    }

    #[test]
    fn zero_elapsed_time_gives_zero_speed() {
        let previous = [TrackedFace::new(face(0.0, 0.0), 5_000), TrackedFace::new(face(300.0, 0.0), 5_000)];
        let estimates = classify(
            &[face(50.0, 50.0), face(310.0, 20.0)],
            &previous,
            5_000,
            &GreedyNearest,
        );
        assert_eq!(estimates.len(), 2);
        assert!(estimates.iter().all(|e| e.speed == 0.0));
    }

    #[test]
    fn backwards_clock_gives_zero_speed() {
        let previous = [TrackedFace::new(face(0.0, 0.0), 5_000)];
        let estimates = classify(&[face(50.0, 0.0)], &previous, 4_000, &GreedyNearest);
        assert_eq!(estimates[0].speed, 0.0);
    }

    #[test]
    fn two_faces_may_share_one_previous_box() {
        let previous = [TrackedFace::new(face(100.0, 100.0), 0)];
        let estimates = classify(&[face(90.0, 100.0), face(110.0, 100.0)], &previous, 1_000, &GreedyNearest);
        assert_eq!(estimates.len(), 2);
        assert!(estimates.iter().all(|e| e.matched == face(100.0, 100.0)));
        assert!((estimates[0].speed - 10.0).abs() < 1e-9);
        assert!((estimates[1].speed - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_frame_clears_memory_and_next_frame_reseeds() {
        let mut classifier = MotionClassifier::new();
        classifier.observe(&[face(0.0, 0.0)], 0);
        assert!(classifier.observe(&[], 100).is_empty());
        assert!(classifier.remembered().is_empty());

        // Memory was wiped, so this frame seeds again instead of measuring.
        assert!(classifier.observe(&[face(500.0, 0.0)], 200).is_empty());
        assert_eq!(classifier.remembered().len(), 1);
    }

    #[test]
    fn remembered_set_is_replaced_every_cycle() {
        let mut classifier = MotionClassifier::new();
        classifier.observe(&[face(0.0, 0.0), face(100.0, 0.0)], 0);
        classifier.observe(&[face(5.0, 0.0)], 100);

        let remembered = classifier.remembered();
        assert_eq!(remembered.len(), 1);
        assert_eq!(remembered[0], TrackedFace::new(face(5.0, 0.0), 100));
    }

    struct NeverMatch;

    impl FaceMatcher for NeverMatch {
        fn match_previous(&self, _: &FaceBox, _: &[TrackedFace]) -> Option<usize> {
            None
        }
    }

    #[test]
    fn matcher_is_pluggable() {
        let mut classifier = MotionClassifier::with_matcher(Box::new(NeverMatch));
        classifier.observe(&[face(0.0, 0.0)], 0);
        assert!(classifier.observe(&[face(10.0, 0.0)], 100).is_empty());
        assert_eq!(classifier.remembered().len(), 1);
    }

    struct OutOfRange;

    impl FaceMatcher for OutOfRange {
        fn match_previous(&self, _: &FaceBox, previous: &[TrackedFace]) -> Option<usize> {
            Some(previous.len() + 3)
        }
    }

    #[test]
    fn out_of_range_match_is_treated_as_unmatched() {
        let mut classifier = MotionClassifier::with_matcher(Box::new(OutOfRange));
        classifier.observe(&[face(0.0, 0.0)], 0);
        assert!(classifier.observe(&[face(10.0, 0.0)], 100).is_empty());
    }
}

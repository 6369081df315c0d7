use runcatcher_common::frame::{FaceBox, TrackedFace};

/// Pairs a face in the current frame with one remembered from the previous frame.
///
/// Implementations decide per face, independently; the classifier does not
/// stop two current faces from claiming the same previous one.
pub trait FaceMatcher: Send + Sync {
    /// Index into `previous` of the face `current` is taken to be.
    /// `None` means no match (always the case for an empty `previous`).
    fn match_previous(&self, current: &FaceBox, previous: &[TrackedFace]) -> Option<usize>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Nearest previous box by center distance.
///
/// No distance gate: any previous face matches, however far away. Ties go to
/// the entry seen first.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedyNearest;

impl FaceMatcher for GreedyNearest {
    fn match_previous(&self, current: &FaceBox, previous: &[TrackedFace]) -> Option<usize> {
        let mut best: Option<usize> = None;
        let mut min_distance = f64::INFINITY;
        for (i, prev) in previous.iter().enumerate() {
            let distance = current.center_distance(&prev.face);
            if distance < min_distance {
                min_distance = distance;
                best = Some(i);
            }
        }
        best
    }

    fn name(&self) -> &str {
        "greedy-nearest"
    }
}

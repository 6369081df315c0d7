/// Axis-aligned face rectangle in frame-pixel coordinates.
///
/// Produced fresh for every frame by the detector and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FaceBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FaceBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point `(cx, cy)` of the box.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Euclidean distance between the centers of two boxes, in pixels.
    pub fn center_distance(&self, other: &FaceBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

/// A face remembered from the previous detection cycle.
///
/// Lives for exactly one cycle: the classifier replaces the whole remembered
/// set every frame, so there is no identity across more than two frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedFace {
    pub face: FaceBox,
    /// Unix millis at which the face was observed.
    pub seen_at_ms: i64,
}

impl TrackedFace {
    pub fn new(face: FaceBox, seen_at_ms: i64) -> Self {
        Self { face, seen_at_ms }
    }
}

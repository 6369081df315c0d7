use runcatcher_common::frame::FaceBox;
use tracing::{debug, info, warn};

use crate::capture::{CaptureEvent, CapturePipeline};
use crate::detector::FaceDetector;
use crate::motion::MotionClassifier;
use crate::source::Frame;

/// State for one camera: detector, classifier memory and capture cooldown.
///
/// Nothing is global, so several sessions can run side by side and tests
/// can drive a session frame by frame without a camera.
pub struct DetectionSession<D> {
    detector: D,
    classifier: MotionClassifier,
    pipeline: CapturePipeline,
    motion_threshold: f64,
}

impl<D: FaceDetector> DetectionSession<D> {
    pub fn new(
        detector: D,
        classifier: MotionClassifier,
        pipeline: CapturePipeline,
        motion_threshold: f64,
    ) -> Self {
        Self {
            detector,
            classifier,
            pipeline,
            motion_threshold,
        }
    }

    /// One detect → classify → maybe-capture pass over `frame`.
    ///
    /// A detection failure is logged and leaves the classifier untouched;
    /// the next frame is independent.
    pub async fn run_cycle(&mut self, frame: &Frame) -> Vec<CaptureEvent> {
        let faces = match self.detector.detect(frame).await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, ts = frame.captured_at_ms, "face detection failed, skipping frame");
                return Vec::new();
            }
        };
        self.process_detections(frame, &faces)
    }

    /// Classify already-detected faces and capture the fast ones.
    ///
    /// Time is the frame's capture time, not the wall clock at processing.
    pub fn process_detections(&mut self, frame: &Frame, faces: &[FaceBox]) -> Vec<CaptureEvent> {
        let now_ms = frame.captured_at_ms;
        let estimates = self.classifier.observe(faces, now_ms);

        let mut events = Vec::new();
        for estimate in estimates {
            if !estimate.is_running(self.motion_threshold) {
                continue;
            }
            debug!(
                speed = format!("{:.2}", estimate.speed),
                threshold = self.motion_threshold,
                face = ?estimate.face,
                from = ?estimate.matched,
                "running face"
            );
            if let Some(event) =
                self.pipeline
                    .maybe_capture(&frame.image, &estimate.face, estimate.speed, now_ms)
            {
                info!(
                    crop = ?event.crop,
                    "Runner #{} captured! Motion speed: {:.2} px/s",
                    event.sequence, event.motion_speed
                );
                events.push(event);
            }
        }
        events
    }

    pub fn classifier(&self) -> &MotionClassifier {
        &self.classifier
    }

    pub fn captures(&self) -> u64 {
        self.pipeline.capture_count()
    }
}

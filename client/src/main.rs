mod capture;
mod detector;
mod motion;
mod session;
mod source;
mod upload;

use std::path::PathBuf;
use std::sync::Arc;

use capture::CapturePipeline;
use detector::{FaceDetector, HttpDetector};
use motion::MotionClassifier;
use runcatcher_common::config::Config;
use session::DetectionSession;
use source::CameraSource;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use upload::CaptureUploader;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load_or_default(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        server_url = config.client.server_url,
        camera_url = config.camera.url,
        camera_mode = config.camera.mode,
        detector_url = config.detector.url,
        motion_threshold = config.client.motion_threshold,
        cooldown_ms = config.client.cooldown_ms,
        "starting runcatcher client"
    );
    if config.client.motion_threshold < 1.0 {
        warn!(
            motion_threshold = config.client.motion_threshold,
            "motion threshold is below 1 px/s; detector jitter alone will trigger captures, recalibrate it"
        );
    }

    let detector = match HttpDetector::new(&config.detector) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to set up face detector");
            std::process::exit(1);
        }
    };
    if let Err(e) = detector.probe().await {
        error!(
            error = %e,
            url = detector.url(),
            "face detection model unavailable; check the detector service is running and reachable, then restart"
        );
        std::process::exit(1);
    }
    info!(url = detector.url(), "face detector ready");

    let uploader = match CaptureUploader::new(&config.client.server_url) {
        Ok(u) => Arc::new(u),
        Err(e) => {
            error!(error = %e, "failed to set up capture uploader");
            std::process::exit(1);
        }
    };
    info!(endpoint = uploader.endpoint(), "captures will be uploaded");

    let source = match CameraSource::connect(&config.camera).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, url = config.camera.url, "error accessing camera");
            std::process::exit(1);
        }
    };

    let session = DetectionSession::new(
        detector,
        MotionClassifier::new(),
        CapturePipeline::from_config(&config.client),
        config.client.motion_threshold,
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("stop requested, finishing current cycle");
        let _ = stop_tx.send(true);
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second stop request, exiting immediately");
            std::process::exit(130);
        }
    });

    info!("detection active - looking for running faces");
    run_detection_loop(source, session, uploader, stop_rx).await;
    info!("detection stopped");
}

/// Detect → classify → capture, one frame at a time. A stop request
/// interrupts the wait for a frame but not a cycle already under way;
/// uploads already sent run to completion.
async fn run_detection_loop<D: FaceDetector>(
    mut source: CameraSource,
    mut session: DetectionSession<D>,
    uploader: Arc<CaptureUploader>,
    mut stop: watch::Receiver<bool>,
) {
    let mut uploads = JoinSet::new();
    let mut cycles: u64 = 0;

    while !*stop.borrow_and_update() {
        let next = tokio::select! {
            Ok(()) = stop.changed() => break,
            next = source.next_frame() => next,
        };
        let frame = match next {
            Ok(f) => f,
            Err(e) if e.is_frame_local() => {
                warn!(error = %e, "skipping unreadable frame");
                continue;
            }
            Err(e) => {
                error!(error = %e, "camera lost");
                break;
            }
        };

        if cycles == 0 {
            info!(width = frame.width(), height = frame.height(), "first camera frame");
        }

        for event in session.run_cycle(&frame).await {
            let uploader = Arc::clone(&uploader);
            uploads.spawn(async move {
                match uploader.upload(&event).await {
                    Ok(saved) => info!(
                        sequence = event.sequence,
                        filename = saved.filename,
                        "runner captured and saved"
                    ),
                    Err(e) => error!(
                        error = %e,
                        sequence = event.sequence,
                        "error saving runner image, capture dropped"
                    ),
                }
            });
        }

        while uploads.try_join_next().is_some() {}

        cycles += 1;
        if cycles % 100 == 0 {
            debug!(
                cycles,
                captures = session.captures(),
                faces = session.classifier().remembered().len(),
                "detection cycles processed"
            );
        }
    }

    while uploads.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use runcatcher_common::config::{CameraConfig, ClientConfig};
    use runcatcher_common::frame::FaceBox;
    use std::io::Cursor;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct NoFaces;

    impl FaceDetector for NoFaces {
        async fn detect(&self, _frame: &source::Frame) -> Result<Vec<FaceBox>, detector::DetectError> {
            Ok(Vec::new())
        }
    }

    fn jpeg() -> Vec<u8> {
        let img = image::RgbImage::new(8, 8);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn stop_interrupts_a_camera_that_never_answers() {
        let camera = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg()))
            .up_to_n_times(1)
            .mount(&camera)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(jpeg())
                    .set_delay(Duration::from_secs(60)),
            )
            .mount(&camera)
            .await;

        let source = CameraSource::connect(&CameraConfig {
            url: format!("{}/frame", camera.uri()),
            mode: "polling".into(),
            fps: 50.0,
            timeout_ms: 60_000,
        })
        .await
        .unwrap();
        let session = DetectionSession::new(
            NoFaces,
            MotionClassifier::new(),
            CapturePipeline::from_config(&ClientConfig::default()),
            100.0,
        );
        let uploader = Arc::new(CaptureUploader::new("http://127.0.0.1:9").unwrap());

        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(run_detection_loop(source, session, uploader, stop_rx));

        tokio::time::sleep(Duration::from_millis(300)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("loop did not stop while waiting for a frame")
            .unwrap();
    }

    #[tokio::test]
    async fn stop_requested_before_start_runs_no_cycle() {
        let camera = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg()))
            .mount(&camera)
            .await;

        let source = CameraSource::connect(&CameraConfig {
            url: format!("{}/frame", camera.uri()),
            mode: "polling".into(),
            fps: 50.0,
            timeout_ms: 1000,
        })
        .await
        .unwrap();
        let session = DetectionSession::new(
            NoFaces,
            MotionClassifier::new(),
            CapturePipeline::from_config(&ClientConfig::default()),
            100.0,
        );
        let uploader = Arc::new(CaptureUploader::new("http://127.0.0.1:9").unwrap());

        let (stop_tx, stop_rx) = watch::channel(false);
        stop_tx.send(true).unwrap();
        run_detection_loop(source, session, uploader, stop_rx).await;

        // Only the startup check in connect reached the camera.
        assert_eq!(camera.received_requests().await.unwrap().len(), 1);
    }
}

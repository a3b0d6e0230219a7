//! The orchestration loop.
//!
//! One sequential path ties everything together: pull a frame, detect, and
//! per retained detection classify, record, and alert. The lifecycle is an
//! explicit state machine rather than a running flag, so reentrant stop
//! requests and repeated cleanup are well-defined.
//!
//! Failure policy (per component):
//! - detector fails to load, camera fails to open: fatal, `Failed` state,
//!   best-effort error notice, non-zero exit
//! - one frame read fails: log, short pause, stay in `Running`
//! - inference, snapshot, log append, or alert delivery fails: log and keep
//!   going; the failure never leaves its component's boundary

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::config::SentinelConfig;
use crate::detect::{DetectorBackend, PersonDetector};
use crate::frame::RgbFrame;
use crate::ingest::{CameraConfig, CameraSource};
use crate::notify::{AlertDispatcher, ChatTransport};
use crate::recognize::{FaceEmbedder, Recognition};
use crate::record::DetectionRecorder;
use crate::{PersonClass, UNKNOWN_LABEL};

/// Delay before retrying after a failed frame read.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(100);
/// How often the snapshot retention sweep runs.
const PURGE_INTERVAL: Duration = Duration::from_secs(3600);
/// Processing-rate debug line cadence, in frames.
const RATE_LOG_EVERY: u64 = 100;

/// Pipeline lifecycle.
///
/// `Uninitialized -> Ready -> Running -> Stopping -> Stopped`, with `Failed`
/// terminal and reachable from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Ready,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Uninitialized => "uninitialized",
            PipelineState::Ready => "ready",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The pipeline controller.
///
/// Owns the camera handle and the dispatcher's rate-limit table for the
/// process lifetime; the recorder owns the log file and snapshot directory.
pub struct Pipeline {
    config: SentinelConfig,
    state: PipelineState,
    detector: PersonDetector,
    recognition: Recognition,
    dispatcher: AlertDispatcher,
    recorder: DetectionRecorder,
    camera: Option<CameraSource>,
}

impl Pipeline {
    /// Build the pipeline from config with production parts.
    ///
    /// A detector that fails to load is an unrecoverable dependency: an error
    /// notice is attempted and the error propagates so the process exits
    /// non-zero. A missing face embedder only degrades recognition.
    pub fn new(config: SentinelConfig) -> Result<Self> {
        let transport: Box<dyn ChatTransport> =
            Box::new(crate::notify::TelegramTransport::new(&config.telegram.bot_token)?);
        let embedder = build_embedder(&config);
        let backend = match build_backend(&config) {
            Ok(backend) => backend,
            Err(e) => {
                // The transport exists already, so the fatal path can notify.
                let dispatcher =
                    AlertDispatcher::new(transport, &config.telegram, &config.alerts);
                dispatcher.error_notice(&format!("detector failed to load: {e:#}"));
                return Err(e.context("load detection model"));
            }
        };
        Self::with_parts(config, backend, embedder, transport)
    }

    /// Build the pipeline with injected externals (tests, diagnostics).
    pub fn with_parts(
        config: SentinelConfig,
        backend: Box<dyn DetectorBackend>,
        embedder: Box<dyn FaceEmbedder>,
        transport: Box<dyn ChatTransport>,
    ) -> Result<Self> {
        let mut detector = PersonDetector::new(backend, config.detection.classes.clone());
        detector.warm_up()?;
        let recognition = Recognition::resolve(&config.recognition, embedder);
        let dispatcher = AlertDispatcher::new(transport, &config.telegram, &config.alerts);
        let recorder = DetectionRecorder::new(&config.storage, &config.camera.camera_id);

        log::info!(
            "pipeline ready: detector={}, recognition={}, camera={}",
            detector.backend_name(),
            if recognition.is_enabled() { "on" } else { "off" },
            config.camera.device,
        );
        Ok(Self {
            config,
            state: PipelineState::Ready,
            detector,
            recognition,
            dispatcher,
            recorder,
            camera: None,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run the loop until the stop flag is raised.
    ///
    /// Opens the camera (`Ready -> Running`); a failed open sends an error
    /// notice and lands in `Failed` without reading a single frame. The stop
    /// flag is checked once per iteration; cleanup runs on every exit path.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        if self.state != PipelineState::Ready {
            return Err(anyhow!("pipeline cannot run from state {}", self.state));
        }

        self.dispatcher.startup_notice(self.recognition.is_enabled());

        let camera_config = CameraConfig::from(&self.config.camera);
        let camera = match CameraSource::open(camera_config) {
            Ok(camera) => camera,
            Err(e) => {
                let message = format!("failed to open camera {}: {e:#}", self.config.camera.device);
                log::error!("{}", message);
                self.dispatcher.error_notice(&message);
                self.set_state(PipelineState::Failed);
                return Err(e);
            }
        };
        self.camera = Some(camera);
        self.set_state(PipelineState::Running);

        let started = Instant::now();
        let mut last_purge = Instant::now();
        let mut frame_count = 0u64;

        while !stop.load(Ordering::Relaxed) {
            let frame = {
                // Running implies the camera handle is present.
                let Some(camera) = self.camera.as_mut() else {
                    break;
                };
                match camera.next_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("frame capture failed: {:#}", e);
                        std::thread::sleep(CAPTURE_RETRY_DELAY);
                        continue;
                    }
                }
            };
            frame_count += 1;

            self.process_frame(&frame);

            if frame_count % RATE_LOG_EVERY == 0 {
                let fps = frame_count as f64 / started.elapsed().as_secs_f64().max(1e-6);
                log::debug!("processed {} frames ({:.1} fps)", frame_count, fps);
            }

            if self.config.alerts.cleanup_old_images && last_purge.elapsed() >= PURGE_INTERVAL {
                if let Err(e) = self
                    .recorder
                    .purge_older_than(self.config.alerts.retention_days)
                {
                    log::warn!("snapshot purge failed: {:#}", e);
                }
                last_purge = Instant::now();
            }
        }

        log::info!("stop requested after {} frames", frame_count);
        self.set_state(PipelineState::Stopping);
        self.cleanup();
        Ok(())
    }

    /// Handle one frame. Component failures are logged here and go no further.
    fn process_frame(&mut self, frame: &RgbFrame) {
        let threshold = self.config.detection.confidence_threshold;
        let detections = match self.detector.detect(frame, threshold) {
            Ok(detections) => detections,
            Err(e) => {
                log::error!("detection failed: {:#}", e);
                return;
            }
        };

        for detection in detections {
            let label = match detection.crop_from(frame) {
                Some(crop) => self
                    .recognition
                    .classify(&crop, self.config.recognition.tolerance),
                None => UNKNOWN_LABEL.to_string(),
            };
            let class = PersonClass::from_label(&label);

            let image_path = self
                .recorder
                .record_image(frame, detection.confidence, &label);
            if let Err(e) =
                self.recorder
                    .append_log(frame.captured_at, class, &label, detection.confidence)
            {
                log::error!("detection log append failed: {:#}", e);
            }
            self.dispatcher
                .notify(class, detection.confidence, &label, image_path.as_deref());

            log::info!(
                "detection: {} - {} (confidence {:.1}%)",
                class,
                label,
                detection.confidence * 100.0
            );
        }
    }

    /// Release the camera. Idempotent: every exit path funnels through here,
    /// and calling it again is a no-op.
    pub fn cleanup(&mut self) {
        if let Some(camera) = self.camera.as_mut() {
            camera.close();
        }
        self.camera = None;
        if !matches!(self.state, PipelineState::Stopped | PipelineState::Failed) {
            self.set_state(PipelineState::Stopped);
        }
    }

    fn set_state(&mut self, next: PipelineState) {
        log::debug!("pipeline state: {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Production detection backend.
#[cfg(feature = "backend-tract")]
fn build_backend(config: &SentinelConfig) -> Result<Box<dyn DetectorBackend>> {
    let backend = crate::detect::TractBackend::new(&config.detection.model_path)?;
    Ok(Box::new(backend))
}

/// Without an inference feature the stub backend stands in; it never detects
/// anything, which keeps camera-only deployments (and CI) runnable.
#[cfg(not(feature = "backend-tract"))]
fn build_backend(config: &SentinelConfig) -> Result<Box<dyn DetectorBackend>> {
    log::warn!(
        "built without backend-tract; model {} ignored, using stub detector",
        config.detection.model_path.display()
    );
    Ok(Box::new(crate::detect::StubBackend::new()))
}

/// Production face embedder; absence degrades recognition, never startup.
fn build_embedder(config: &SentinelConfig) -> Box<dyn FaceEmbedder> {
    crate::recognize::default_embedder(config.recognition.embedding_model.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AlertSettings, CameraSettings, DetectionSettings, RecognitionSettings, StorageSettings,
        TelegramSettings,
    };
    use crate::detect::StubBackend;
    use crate::notify::StubTransport;
    use crate::recognize::StubEmbedder;
    use std::sync::Arc;

    fn test_config(dir: &std::path::Path, device: &str) -> SentinelConfig {
        SentinelConfig {
            telegram: TelegramSettings {
                bot_token: "123:abc".to_string(),
                chat_id: "42".to_string(),
                channel_id: None,
            },
            detection: DetectionSettings {
                confidence_threshold: 0.5,
                model_path: "unused.onnx".into(),
                classes: vec!["person".to_string()],
            },
            recognition: RecognitionSettings {
                enabled: true,
                tolerance: 0.6,
                known_faces_dir: dir.join("known_faces"),
                embedding_model: None,
            },
            camera: CameraSettings {
                device: device.to_string(),
                width: 64,
                height: 48,
                target_fps: 0,
                camera_id: "front_door".to_string(),
            },
            storage: StorageSettings {
                detections_dir: dir.join("detections"),
                log_file: "detection_log.csv".to_string(),
                overlay_font: None,
            },
            alerts: AlertSettings {
                min_interval: Duration::from_secs(0),
                send_image: true,
                retention_days: 7,
                cleanup_old_images: true,
                startup_notice: true,
                error_notices: true,
            },
        }
    }

    fn pipeline_with(
        config: SentinelConfig,
        backend: StubBackend,
        transport: Arc<StubTransport>,
    ) -> Pipeline {
        std::fs::create_dir_all(&config.storage.detections_dir).unwrap();
        Pipeline::with_parts(
            config,
            Box::new(backend),
            Box::new(StubEmbedder::new()),
            Box::new(transport),
        )
        .unwrap()
    }

    #[test]
    fn construction_lands_in_ready() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(
            test_config(dir.path(), "stub://cam"),
            StubBackend::new(),
            Arc::new(StubTransport::new()),
        );
        assert_eq!(pipeline.state(), PipelineState::Ready);
    }

    #[test]
    fn run_refuses_from_non_ready_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline_with(
            test_config(dir.path(), "stub://cam"),
            StubBackend::new(),
            Arc::new(StubTransport::new()),
        );
        pipeline.cleanup();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        let stop = AtomicBool::new(true);
        assert!(pipeline.run(&stop).is_err());
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn failed_camera_open_fails_the_pipeline_with_a_notice() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(StubTransport::new());
        let mut pipeline = pipeline_with(
            test_config(dir.path(), "/dev/video99"),
            StubBackend::new(),
            transport.clone(),
        );

        let stop = AtomicBool::new(false);
        assert!(pipeline.run(&stop).is_err());
        assert_eq!(pipeline.state(), PipelineState::Failed);

        // Startup notice plus the error notice, no detection alerts.
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].text.contains("failed to open camera"));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline_with(
            test_config(dir.path(), "stub://cam"),
            StubBackend::new(),
            Arc::new(StubTransport::new()),
        );
        pipeline.cleanup();
        pipeline.cleanup();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn stop_flag_raised_up_front_still_reaches_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline_with(
            test_config(dir.path(), "stub://cam"),
            StubBackend::new(),
            Arc::new(StubTransport::new()),
        );
        let stop = AtomicBool::new(true);
        pipeline.run(&stop).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }
}

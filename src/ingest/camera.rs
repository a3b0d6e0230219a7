//! Camera source with backend dispatch.
//!
//! `CameraSource::open` picks a backend from the device string: `stub://`
//! selects the synthetic source, anything else is treated as a V4L2 device
//! node and requires the `ingest-v4l2` feature.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use crate::config::CameraSettings;
use crate::frame::RgbFrame;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or "stub://<name>".
    pub device: String,
    /// Preferred frame width (hint; the device may clamp it).
    pub width: u32,
    /// Preferred frame height (hint).
    pub height: u32,
    /// Target frame rate (hint). The source paces capture to this rate.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            target_fps: 15,
        }
    }
}

impl From<&CameraSettings> for CameraConfig {
    fn from(settings: &CameraSettings) -> Self {
        Self {
            device: settings.device.clone(),
            width: settings.width,
            height: settings.height,
            target_fps: settings.target_fps,
        }
    }
}

/// Negotiated capture format, read back from the device after open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Camera frame source.
///
/// Owned exclusively by the pipeline controller; no other component reads or
/// closes the device.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(super::v4l2::DeviceCamera),
    Closed,
}

impl CameraSource {
    /// Open the device and negotiate a capture format.
    ///
    /// Fails when the device cannot be opened; that failure is fatal to the
    /// pipeline (there is nothing to retry against).
    pub fn open(config: CameraConfig) -> Result<Self> {
        let backend = if config.device.starts_with("stub://") {
            let camera = SyntheticCamera::open(config);
            CameraBackend::Synthetic(camera)
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                CameraBackend::Device(super::v4l2::DeviceCamera::open(config)?)
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                return Err(anyhow!(
                    "device {} requires the ingest-v4l2 feature (only stub:// sources are built in)",
                    config.device
                ));
            }
        };
        let source = Self { backend };
        let format = source
            .actual_format()
            .ok_or_else(|| anyhow!("camera reported no format after open"))?;
        log::info!(
            "camera opened: {} ({}x{} @ {}fps)",
            source.device_name(),
            format.width,
            format.height,
            format.fps
        );
        Ok(source)
    }

    /// Capture the next frame.
    ///
    /// Errors here are transient: log, pause briefly, and call again.
    pub fn next_frame(&mut self) -> Result<RgbFrame> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.next_frame(),
            CameraBackend::Closed => Err(anyhow!("camera is closed")),
        }
    }

    /// Release the device. Safe to call more than once.
    pub fn close(&mut self) {
        if !matches!(self.backend, CameraBackend::Closed) {
            log::info!("camera released: {}", self.device_name());
            self.backend = CameraBackend::Closed;
        }
    }

    /// The format the device actually negotiated (None once closed).
    pub fn actual_format(&self) -> Option<CameraFormat> {
        match &self.backend {
            CameraBackend::Synthetic(camera) => Some(camera.format()),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => Some(camera.format()),
            CameraBackend::Closed => None,
        }
    }

    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.stats(),
            CameraBackend::Closed => CameraStats {
                frames_captured: 0,
                device: "<closed>".to_string(),
            },
        }
    }

    fn device_name(&self) -> String {
        self.stats().device
    }
}

/// Minimum spacing between frames for a target rate; zero means unpaced.
pub(super) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((1000 / target_fps) as u64)
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    /// Simulated scene state; changes occasionally so detectors see "motion".
    scene_state: u8,
}

impl SyntheticCamera {
    fn open(config: CameraConfig) -> Self {
        log::info!("camera source: {} (synthetic)", config.device);
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
            scene_state: 0,
        }
    }

    fn next_frame(&mut self) -> Result<RgbFrame> {
        // Pace the synthetic source so a stub-driven daemon does not spin hot.
        let interval = frame_interval(self.config.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
        self.frame_count += 1;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }

        Ok(RgbFrame::new(pixels, self.config.width, self.config.height))
    }

    fn format(&self) -> CameraFormat {
        CameraFormat {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.target_fps,
        }
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 64,
            height: 48,
            target_fps: 0,
        }
    }

    #[test]
    fn synthetic_camera_produces_frames() -> Result<()> {
        let mut source = CameraSource::open(stub_config())?;
        let frame = source.next_frame()?;
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.pixels.len(), 64 * 48 * 3);
        Ok(())
    }

    #[test]
    fn open_logs_negotiated_format() -> Result<()> {
        let source = CameraSource::open(stub_config())?;
        let format = source.actual_format().unwrap();
        assert_eq!(format.width, 64);
        assert_eq!(format.height, 48);
        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> Result<()> {
        let mut source = CameraSource::open(stub_config())?;
        source.next_frame()?;
        source.close();
        source.close();
        assert!(source.actual_format().is_none());
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn frame_counter_advances() -> Result<()> {
        let mut source = CameraSource::open(stub_config())?;
        source.next_frame()?;
        source.next_frame()?;
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }
}

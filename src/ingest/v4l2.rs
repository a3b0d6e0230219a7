//! V4L2 device backend.
//!
//! Connects to a local device node (e.g., /dev/video0), requests RGB24
//! capture at the configured resolution and rate, and reads back whatever the
//! device actually negotiated. The negotiated format is authoritative; the
//! requested one is only a hint.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::camera::{CameraConfig, CameraFormat, CameraStats};
use crate::frame::RgbFrame;

pub(super) struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceState>,
    frame_count: u64,
    active: CameraFormat,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceCamera {
    pub(super) fn open(config: CameraConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("failed to set format on {}: {}", config.device, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let mut active_fps = config.target_fps;
        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            match device.set_params(&params) {
                Ok(params) => {
                    let interval = params.interval;
                    if interval.numerator > 0 {
                        active_fps = interval.denominator / interval.numerator;
                    }
                }
                Err(err) => {
                    log::warn!("failed to set fps on {}: {}", config.device, err);
                }
            }
        }

        let active = CameraFormat {
            width: format.width,
            height: format.height,
            fps: active_fps,
        };

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        Ok(Self {
            config,
            state: Some(state),
            frame_count: 0,
            active,
        })
    }

    pub(super) fn next_frame(&mut self) -> Result<RgbFrame> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("v4l2 device not connected"))?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;

        let expected = (self.active.width * self.active.height * 3) as usize;
        if buf.len() < expected {
            return Err(anyhow!(
                "short v4l2 frame: expected {} bytes, got {}",
                expected,
                buf.len()
            ));
        }

        self.frame_count += 1;

        Ok(RgbFrame::new(
            buf[..expected].to_vec(),
            self.active.width,
            self.active.height,
        ))
    }

    pub(super) fn format(&self) -> CameraFormat {
        self.active
    }

    pub(super) fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

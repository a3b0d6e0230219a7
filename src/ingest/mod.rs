//! Frame ingestion sources.
//!
//! This module provides the camera source for the pipeline:
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - Synthetic source (`stub://` device strings, testing)
//!
//! The source produces `RgbFrame` instances that flow into the pipeline one
//! at a time. Requested resolution and frame rate are hints: the device may
//! clamp them, so the negotiated values are read back and logged, and callers
//! must not assume the requested ones.
//!
//! A frame-read failure is transient. The caller retries after a short
//! backoff instead of aborting; only a failed open is fatal.

mod camera;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

pub use camera::{CameraConfig, CameraFormat, CameraSource, CameraStats};

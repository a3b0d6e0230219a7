//! Person detection.
//!
//! A `DetectorBackend` is a black-box scorer: RGB pixels in, candidate
//! detections out. The `PersonDetector` layered on top applies the policy the
//! pipeline cares about: class allow-list, confidence threshold, pixel-space
//! clipping, zero-area discard.
//!
//! Backends:
//! - `StubBackend`: scripted results (tests)
//! - `TractBackend`: YOLO-class ONNX models via tract (feature: backend-tract)

mod backend;
mod backends;
mod person;

pub use backend::{DetectorBackend, RawDetection};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use person::{BoxDetection, PersonDetector};

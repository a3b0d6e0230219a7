//! Door Sentinel
//!
//! This crate implements a single-camera door-watch appliance.
//!
//! # Architecture
//!
//! The pipeline is one sequential path per frame:
//!
//! 1. **Ingest**: pull a frame from the camera (`ingest`)
//! 2. **Detect**: run person detection on the frame (`detect`)
//! 3. **Recognize**: match the person crop against enrolled faces (`recognize`)
//! 4. **Record**: append a CSV row and write an annotated snapshot (`record`)
//! 5. **Notify**: push a rate-limited Telegram alert (`notify`)
//!
//! Everything external (camera device, detection model, face embedder, chat
//! transport) sits behind a trait with a stub implementation, so the whole
//! pipeline runs hermetically in tests. Real backends are feature-gated.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames with capture timestamps
//! - `ingest`: camera sources (V4L2 devices, synthetic stub)
//! - `detect`: detection backends and the person filter
//! - `recognize`: face gallery, embedding match, enrollment
//! - `notify`: alert dispatch with per-identity rate limiting
//! - `record`: CSV audit log, snapshots, retention, stats
//! - `pipeline`: the orchestration loop and its lifecycle state machine

use std::sync::OnceLock;

pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod recognize;
pub mod record;

pub use config::SentinelConfig;
pub use detect::{BoxDetection, DetectorBackend, PersonDetector, RawDetection, StubBackend};
pub use frame::RgbFrame;
pub use ingest::{CameraConfig, CameraSource};
pub use notify::{AlertDispatcher, ChatTransport, StubTransport, TelegramTransport};
pub use pipeline::{Pipeline, PipelineState};
pub use recognize::{FaceEmbedder, FaceGallery, Recognition, StubEmbedder};
pub use record::{DetectionRecorder, DetectionStats};

/// Sentinel identity label for anyone not matched against the gallery.
pub const UNKNOWN_LABEL: &str = "unknown";

// -------------------- Person classification --------------------

/// Verdict derived from the identity match: enrolled faces are allowed,
/// everyone else is an intruder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersonClass {
    Allowed,
    Intruder,
}

impl PersonClass {
    pub fn from_label(label: &str) -> Self {
        if label == UNKNOWN_LABEL {
            PersonClass::Intruder
        } else {
            PersonClass::Allowed
        }
    }

    /// Rendering used in the CSV log and alert messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonClass::Allowed => "ALLOWED",
            PersonClass::Intruder => "INTRUDER",
        }
    }
}

impl std::fmt::Display for PersonClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------- Identity Label Discipline --------------------

/// A conforming identity label is lowercase `[a-z0-9_-]{1,64}`.
///
/// Labels flow into gallery filenames, snapshot filenames, and unquoted CSV
/// fields, so anything outside that alphabet is normalized away.
pub fn is_valid_label(label: &str) -> bool {
    static LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = LABEL_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]{1,64}$").unwrap());
    re.is_match(label)
}

/// Normalize a free-form name into a conforming identity label.
///
/// - Converts to lowercase
/// - Replaces every character outside `[a-z0-9_-]` with `_`
/// - Limits length to 64 characters
pub fn sanitize_label(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_label_is_allowed() {
        assert_eq!(PersonClass::from_label("alice"), PersonClass::Allowed);
        assert_eq!(PersonClass::from_label("alice").as_str(), "ALLOWED");
    }

    #[test]
    fn unknown_label_is_intruder() {
        assert_eq!(PersonClass::from_label(UNKNOWN_LABEL), PersonClass::Intruder);
        assert_eq!(PersonClass::from_label(UNKNOWN_LABEL).as_str(), "INTRUDER");
    }

    #[test]
    fn sanitize_removes_spaces_and_case() {
        assert_eq!(sanitize_label("Front Door Guest"), "front_door_guest");
    }

    #[test]
    fn sanitize_limits_length() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_label(&long).len(), 64);
    }

    #[test]
    fn sanitized_labels_validate() {
        assert!(is_valid_label(&sanitize_label("Alice O'Neil")));
        assert!(!is_valid_label("Alice O'Neil"));
        assert!(is_valid_label(UNKNOWN_LABEL));
    }
}

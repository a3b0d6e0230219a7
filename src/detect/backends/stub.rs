use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::{DetectorBackend, RawDetection};

/// Stub backend for testing. Plays back a script of per-frame detections,
/// then returns empty results.
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Vec<RawDetection>>,
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the detections returned for the next frames, one entry per frame.
    pub fn with_script(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script: script.into(),
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// A full-confidence scripted person box, for building scripts tersely.
    pub fn person(confidence: f32, x: f32, y: f32, w: f32, h: f32) -> RawDetection {
        RawDetection {
            label: "person".to_string(),
            confidence,
            x,
            y,
            w,
            h,
        }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<RawDetection>> {
        self.frames_seen += 1;
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

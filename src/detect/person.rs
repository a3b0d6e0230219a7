use anyhow::Result;

use crate::detect::backend::{DetectorBackend, RawDetection};
use crate::frame::RgbFrame;

/// One retained detection: an allow-listed class at or above the confidence
/// threshold, with a positive-area pixel box clipped to the frame.
///
/// Invariants: `x1 < x2 <= frame.width`, `y1 < y2 <= frame.height`.
#[derive(Clone, Debug)]
pub struct BoxDetection {
    pub label: String,
    pub confidence: f32,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoxDetection {
    /// Crop this detection's region out of the frame it came from.
    pub fn crop_from(&self, frame: &RgbFrame) -> Option<RgbFrame> {
        frame.crop(
            self.x1 as i64,
            self.y1 as i64,
            self.x2 as i64,
            self.y2 as i64,
        )
    }
}

/// Person filter over a detection backend.
///
/// Applies the class allow-list, the confidence threshold, and pixel-space
/// clipping. The order of the returned detections is whatever the backend
/// yielded; callers must not depend on it.
pub struct PersonDetector {
    backend: Box<dyn DetectorBackend>,
    classes: Vec<String>,
}

impl PersonDetector {
    pub fn new(backend: Box<dyn DetectorBackend>, classes: Vec<String>) -> Self {
        Self { backend, classes }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    pub fn detect(&mut self, frame: &RgbFrame, threshold: f32) -> Result<Vec<BoxDetection>> {
        let raw = self
            .backend
            .detect(&frame.pixels, frame.width, frame.height)?;
        Ok(raw
            .into_iter()
            .filter(|d| d.confidence >= threshold)
            .filter(|d| self.classes.iter().any(|c| c == &d.label))
            .filter_map(|d| clip_to_frame(d, frame.width, frame.height))
            .collect())
    }
}

/// Convert a normalized detection into a pixel box clipped to the frame.
/// Boxes left with zero area are discarded.
fn clip_to_frame(d: RawDetection, width: u32, height: u32) -> Option<BoxDetection> {
    let x1 = ((d.x * width as f32).round() as i64).clamp(0, width as i64) as u32;
    let y1 = ((d.y * height as f32).round() as i64).clamp(0, height as i64) as u32;
    let x2 = (((d.x + d.w) * width as f32).round() as i64).clamp(0, width as i64) as u32;
    let y2 = (((d.y + d.h) * height as f32).round() as i64).clamp(0, height as i64) as u32;
    if x1 >= x2 || y1 >= y2 {
        return None;
    }
    Some(BoxDetection {
        label: d.label,
        confidence: d.confidence,
        x1,
        y1,
        x2,
        y2,
    })
}

use anyhow::Result;

/// One candidate detection from a backend.
///
/// Coordinates are normalized to `0..=1` with `(x, y)` the top-left corner;
/// the person filter converts them to clipped pixel boxes. Backends make no
/// promise about ordering among detections in one frame.
#[derive(Clone, Debug)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// Detector backend trait.
///
/// Implementations must treat the pixel slice as read-only and ephemeral, and
/// must not block on anything but their own inference.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a tightly packed RGB24 frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

//! Snapshot text overlay.
//!
//! Draws the annotation lines with a TTF loaded once at startup. Appliance
//! images ship DejaVu under /usr/share/fonts; when no font can be loaded the
//! snapshot is still written, just without the overlay.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;

const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LINE1_SCALE: f32 = 32.0;
const LINE2_SCALE: f32 = 22.0;

pub(super) struct OverlayRenderer {
    font: Option<FontVec>,
}

impl OverlayRenderer {
    /// Load the configured font, falling back to the system DejaVu path.
    pub(super) fn load(font_path: Option<&Path>) -> Self {
        let path = font_path.unwrap_or(Path::new(DEFAULT_FONT_PATH));
        let font = match std::fs::read(path).map(FontVec::try_from_vec) {
            Ok(Ok(font)) => Some(font),
            Ok(Err(e)) => {
                log::warn!("overlay font {} unusable: {}", path.display(), e);
                None
            }
            Err(e) => {
                log::warn!(
                    "overlay font {} not loaded ({}); snapshots will have no text",
                    path.display(),
                    e
                );
                None
            }
        };
        Self { font }
    }

    /// Draw the two annotation lines onto the image, top-left.
    pub(super) fn annotate(&self, image: &mut RgbImage, line1: &str, line2: &str) {
        let Some(font) = &self.font else {
            return;
        };
        draw_text_mut(
            image,
            OVERLAY_COLOR,
            10,
            10,
            PxScale::from(LINE1_SCALE),
            font,
            line1,
        );
        draw_text_mut(
            image,
            OVERLAY_COLOR,
            10,
            10 + LINE1_SCALE as i32 + 8,
            PxScale::from(LINE2_SCALE),
            font,
            line2,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_font_degrades_to_no_overlay() {
        let renderer = OverlayRenderer::load(Some(Path::new("/nonexistent/font.ttf")));
        let mut image = RgbImage::new(64, 48);
        let before = image.clone();
        renderer.annotate(&mut image, "alice (87%)", "2026-08-06 12:00:00");
        assert_eq!(image, before);
    }
}

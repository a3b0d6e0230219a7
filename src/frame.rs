//! Owned RGB frames.
//!
//! A frame is plain data: tightly packed RGB24 pixels, dimensions, and the
//! capture timestamp. Sources produce frames, the detector reads them, the
//! recorder annotates a copy, and nothing retains them past one loop
//! iteration.

use chrono::{DateTime, Local};
use image::RgbImage;

/// One captured frame, RGB24 row-major.
#[derive(Clone, Debug)]
pub struct RgbFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Local>,
}

impl RgbFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(pixels.len(), (width * height * 3) as usize);
        Self {
            pixels,
            width,
            height,
            captured_at: Local::now(),
        }
    }

    /// Extract the region `[x1, x2) x [y1, y2)`, clipped to frame bounds.
    ///
    /// Returns `None` when the clipped region has zero area.
    pub fn crop(&self, x1: i64, y1: i64, x2: i64, y2: i64) -> Option<RgbFrame> {
        let x1 = x1.clamp(0, self.width as i64) as u32;
        let y1 = y1.clamp(0, self.height as i64) as u32;
        let x2 = x2.clamp(0, self.width as i64) as u32;
        let y2 = y2.clamp(0, self.height as i64) as u32;
        if x1 >= x2 || y1 >= y2 {
            return None;
        }

        let crop_w = x2 - x1;
        let crop_h = y2 - y1;
        let mut pixels = Vec::with_capacity((crop_w * crop_h * 3) as usize);
        for row in y1..y2 {
            let start = ((row * self.width + x1) * 3) as usize;
            let end = start + (crop_w * 3) as usize;
            pixels.extend_from_slice(&self.pixels[start..end]);
        }

        Some(RgbFrame {
            pixels,
            width: crop_w,
            height: crop_h,
            captured_at: self.captured_at,
        })
    }

    /// Copy into an `image::RgbImage` for encoding or annotation.
    pub fn to_image(&self) -> RgbImage {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Build a frame from a decoded image (enrollment photos, tests).
    pub fn from_image(image: &RgbImage) -> Self {
        Self::new(image.as_raw().clone(), image.width(), image.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, value: u8) -> RgbFrame {
        RgbFrame::new(vec![value; (width * height * 3) as usize], width, height)
    }

    #[test]
    fn crop_within_bounds() {
        let frame = solid_frame(10, 10, 7);
        let crop = frame.crop(2, 3, 6, 8).unwrap();
        assert_eq!(crop.width, 4);
        assert_eq!(crop.height, 5);
        assert_eq!(crop.pixels.len(), 4 * 5 * 3);
        assert!(crop.pixels.iter().all(|&p| p == 7));
    }

    #[test]
    fn crop_clips_to_frame() {
        let frame = solid_frame(10, 10, 0);
        let crop = frame.crop(-5, -5, 20, 20).unwrap();
        assert_eq!(crop.width, 10);
        assert_eq!(crop.height, 10);
    }

    #[test]
    fn zero_area_crop_is_none() {
        let frame = solid_frame(10, 10, 0);
        assert!(frame.crop(5, 5, 5, 9).is_none());
        assert!(frame.crop(8, 2, 3, 9).is_none());
        assert!(frame.crop(12, 0, 20, 9).is_none());
    }

    #[test]
    fn image_round_trip_preserves_pixels() {
        let mut frame = solid_frame(4, 2, 0);
        frame.pixels[0] = 200;
        let back = RgbFrame::from_image(&frame.to_image());
        assert_eq!(back.pixels, frame.pixels);
        assert_eq!(back.width, 4);
        assert_eq!(back.height, 2);
    }
}

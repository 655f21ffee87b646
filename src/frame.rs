//! Decoded frames and the two views taken of them.
//!
//! - `Frame`: one decoded RGB24 picture plus its presentation timestamp. Bytes are private.
//! - `InferenceView`: read-only view handed to detector backends.
//! - `DisplayImage`: owned pixels travelling to the render thread.
//!
//! A frame is owned by the worker for one loop iteration. It is lent to the
//! inference engine and then consumed by the display path, after which it is gone.

use std::time::Duration;

use crate::geometry::Size;

/// Bytes per pixel of every buffer in this crate (packed RGB24).
pub const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded frame. There is no `Clone`; a frame is used once and released.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp relative to the start of the asset.
    pub pts: Duration,
}

impl Frame {
    /// Create a frame from packed RGB24 rows. Called by frame sources.
    ///
    /// Returns `None` when `data` does not hold exactly `width * height` pixels.
    pub fn new(data: Vec<u8>, width: u32, height: u32, pts: Duration) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(BYTES_PER_PIXEL)?;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
            pts,
        })
    }

    pub fn size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }

    /// Detectors get a borrowed view; they cannot keep the pixels.
    pub fn inference_view(&self) -> InferenceView<'_> {
        InferenceView { frame: self }
    }

    /// Hand the pixels over to the display path.
    pub fn into_display_image(self) -> DisplayImage {
        DisplayImage {
            data: self.data,
            width: self.width,
            height: self.height,
            pts: self.pts,
        }
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// InferenceView
// ----------------------------------------------------------------------------

/// Read-only view of a frame for detector backends.
#[derive(Clone, Copy)]
pub struct InferenceView<'a> {
    frame: &'a Frame,
}

impl<'a> InferenceView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn pts(&self) -> Duration {
        self.frame.pts
    }

    /// Packed RGB24 rows, top-left origin.
    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }

    /// RGB triple at `(x, y)`; `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.frame.width || y >= self.frame.height {
            return None;
        }
        let idx = (y as usize * self.frame.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.frame.data.get(idx..idx + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2]])
    }
}

// ----------------------------------------------------------------------------
// DisplayImage
// ----------------------------------------------------------------------------

/// Frame pixels on their way to the render thread.
#[derive(Clone)]
pub struct DisplayImage {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts: Duration,
}

impl DisplayImage {
    pub fn size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Nearest-sample lookup; `None` outside the image.
    pub fn sample(&self, x: i64, y: i64) -> Option<[u8; 3]> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.data.get(idx..idx + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2]])
    }
}

impl std::fmt::Debug for DisplayImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_frame(width: u32, height: u32) -> Frame {
        let data = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
        Frame::new(data, width, height, Duration::from_millis(40)).expect("frame")
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, Duration::ZERO).is_none());
        assert!(Frame::new(vec![0u8; 48], 4, 4, Duration::ZERO).is_some());
    }

    #[test]
    fn inference_view_exposes_pixels_by_coordinate() {
        let frame = make_test_frame(4, 2);
        let view = frame.inference_view();

        assert_eq!(view.width(), 4);
        assert_eq!(view.height(), 2);
        assert_eq!(view.pts(), Duration::from_millis(40));
        // (x=1, y=1) -> pixel index 5 -> byte offset 15
        assert_eq!(view.pixel(1, 1), Some([15, 16, 17]));
        assert_eq!(view.pixel(4, 0), None);
    }

    #[test]
    fn display_image_keeps_geometry_and_timestamp() {
        let frame = make_test_frame(3, 3);
        let len = frame.byte_len();
        let image = frame.into_display_image();

        assert_eq!(image.pixels().len(), len);
        assert_eq!(image.size(), Size::new(3.0, 3.0));
        assert_eq!(image.pts, Duration::from_millis(40));
        assert_eq!(image.sample(-1, 0), None);
        assert_eq!(image.sample(0, 0), Some([0, 1, 2]));
    }
}

//! Frame buffers.
//!
//! - `Frame`: owned RGB24 pixel buffer (row-major, 3 bytes per pixel, no row padding).
//! - `Rect`: axis-aligned pixel rectangle used for bounding boxes and crops.
//!
//! Frames hold unredacted footage until the compositor has run, so pixel bytes
//! are zeroized when a frame is dropped.

use anyhow::{anyhow, Result};
use zeroize::Zeroize;

/// Bytes per RGB24 pixel.
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Rect
// ----------------------------------------------------------------------------

/// Axis-aligned rectangle in pixel coordinates. `w`/`h` count pixels, so a
/// rect covering a single pixel has `w == h == 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Intersect with a `width` x `height` frame. Returns `None` when nothing is left.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<Rect> {
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        if self.x >= right || self.y >= bottom {
            return None;
        }
        Some(Rect::new(self.x, self.y, right - self.x, bottom - self.y))
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Owned RGB24 frame. Not `Clone`: a frame is read, anonymized in place,
/// written, and dropped.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap an RGB24 buffer. The buffer length must be exactly `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = byte_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Frame with every pixel set to `rgb`.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::from_fn(width, height, |_, _| rgb)
    }

    /// Frame whose pixels are produced by `f(x, y)`.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self {
            data,
            width,
            height,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw RGB24 bytes, for encoders and inference backends.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Panics if `(x, y)` is outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = self.offset(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Panics if `(x, y)` is outside the frame.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let i = self.offset(x, y);
        self.data[i..i + CHANNELS].copy_from_slice(&rgb);
    }

    /// Copy the pixels under `rect` into a new frame. `rect` is clipped to the frame;
    /// `None` if the clipped rect is empty.
    pub fn crop(&self, rect: Rect) -> Option<Frame> {
        let rect = rect.clip_to(self.width, self.height)?;
        let row_bytes = rect.w as usize * CHANNELS;
        let mut data = Vec::with_capacity(row_bytes * rect.h as usize);
        for y in rect.y..rect.bottom() {
            let start = self.offset(rect.x, y);
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Some(Frame {
            data,
            width: rect.w,
            height: rect.h,
        })
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) outside {}x{} frame",
            self.width,
            self.height
        );
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }
}

impl std::fmt::Debug for Frame {
    // Pixel bytes are omitted.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

fn byte_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_validates_length() {
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
        assert!(Frame::new(vec![0u8; 11], 2, 2).is_err());
    }

    #[test]
    fn pixel_round_trips_through_set_pixel() {
        let mut frame = Frame::filled(4, 3, [1, 2, 3]);
        frame.set_pixel(3, 2, [9, 8, 7]);
        assert_eq!(frame.pixel(3, 2), [9, 8, 7]);
        assert_eq!(frame.pixel(0, 0), [1, 2, 3]);
    }

    #[test]
    fn crop_copies_rows_and_clips() {
        let frame = Frame::from_fn(5, 5, |x, y| [x as u8, y as u8, 0]);
        let crop = frame.crop(Rect::new(3, 1, 4, 2)).expect("crop");
        assert_eq!(crop.dimensions(), (2, 2));
        assert_eq!(crop.pixel(0, 0), [3, 1, 0]);
        assert_eq!(crop.pixel(1, 1), [4, 2, 0]);

        assert!(frame.crop(Rect::new(5, 0, 2, 2)).is_none());
    }

    #[test]
    fn rect_clip_and_contains() {
        let rect = Rect::new(8, 8, 4, 4);
        assert!(rect.contains(11, 11));
        assert!(!rect.contains(12, 11));
        assert_eq!(rect.clip_to(10, 10), Some(Rect::new(8, 8, 2, 2)));
        assert_eq!(rect.clip_to(8, 10), None);
    }
}

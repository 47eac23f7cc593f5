//! Pixel buffers and the arithmetic applied to them
//!
//! A [`PixelBuffer`] is a flat run of RGB bytes, three per LED. Buffers are
//! never sized implicitly: every consumer resizes to the pixel count it needs,
//! and resizing tiles the existing contents rather than padding with black.

use image::RgbImage;
use thiserror::Error;

/// Pixel buffer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PixelError {
    #[error("no pixel data supplied")]
    NoData,
    #[error("invalid pixel offset")]
    InvalidOffset,
    #[error("invalid segment length {0:?}")]
    Parse(String),
}

/// Ordered RGB bytes, 3 per pixel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelBuffer(Vec<u8>);

impl PixelBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Copy row `y` of an image into a buffer, one RGB triple per column.
    ///
    /// Rows outside the image come back as a black row of the image width.
    pub fn from_image_row(image: &RgbImage, y: u32) -> Self {
        let row_len = image.width() as usize * 3;
        if y >= image.height() {
            return Self(vec![0; row_len]);
        }

        let start = y as usize * row_len;
        Self(image.as_raw()[start..start + row_len].to_vec())
    }

    /// Build a calibration frame of `pixels` pixels from a comma separated
    /// list of segment lengths.
    ///
    /// The first pixel of every segment is green and the last one red, so the
    /// physical layout of a strip can be checked by eye.
    pub fn from_segments(pixels: usize, list: &str) -> Result<Self, PixelError> {
        let mut frame = vec![0; pixels * 3];
        let mut offset = 0usize;

        for entry in list.split(',') {
            let entry = entry.trim();
            let len: i64 = entry
                .parse()
                .map_err(|_| PixelError::Parse(entry.to_string()))?;
            if len <= 0 || offset + len as usize > pixels {
                return Err(PixelError::InvalidOffset);
            }

            frame[offset * 3 + 1] = 0xff;
            offset += len as usize;
            frame[(offset - 1) * 3] = 0xff;
        }

        Ok(Self(frame))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Make the buffer exactly `len` bytes long.
    ///
    /// Longer buffers are truncated; shorter ones are extended by repeating
    /// their own contents from the start.
    pub fn resize(mut self, len: usize) -> Result<Self, PixelError> {
        if self.0.is_empty() {
            return Err(PixelError::NoData);
        }

        loop {
            let current = self.0.len();
            if current == len {
                return Ok(self);
            }
            if current > len {
                self.0.truncate(len);
                return Ok(self);
            }

            let take = (len - current).min(current);
            self.0.extend_from_within(..take);
        }
    }

    /// Per-byte `round(byte * mult / 256)`, clamped to 255. `256` is identity.
    pub fn scale(&self, mult: u32) -> Self {
        let bytes = self
            .0
            .iter()
            .map(|&b| ((b as u32 * mult + 128) / 256).min(255) as u8)
            .collect();
        Self(bytes)
    }

    /// Saturating per-byte sum. `None` when either side is empty.
    pub fn add(&self, other: &Self) -> Option<Self> {
        let (a, b) = same_size(self, other).ok()?;
        let bytes = a
            .0
            .iter()
            .zip(&b.0)
            .map(|(&x, &y)| x.saturating_add(y))
            .collect();
        Some(Self(bytes))
    }

    /// Keep the brighter pixel of each pair, ties going to `other`.
    pub fn merge(&self, other: &Self) -> Option<Self> {
        let (a, b) = same_size(self, other).ok()?;
        let mut bytes = Vec::with_capacity(a.len());
        for (pa, pb) in a.0.chunks(3).zip(b.0.chunks(3)) {
            let sum_a: u32 = pa.iter().map(|&v| v as u32).sum();
            let sum_b: u32 = pb.iter().map(|&v| v as u32).sum();
            if sum_a > sum_b {
                bytes.extend_from_slice(pa);
            } else {
                bytes.extend_from_slice(pb);
            }
        }
        Some(Self(bytes))
    }

    /// Normalised per-byte multiply, `floor(a * b / 255)`.
    ///
    /// Used to apply a colour filter: mask bytes of 255 pass a channel through,
    /// 0 blanks it.
    pub fn mult(&self, mask: &Self) -> Option<Self> {
        let (a, b) = same_size(self, mask).ok()?;
        let bytes = a
            .0
            .iter()
            .zip(&b.0)
            .map(|(&x, &y)| (x as u32 * y as u32 / 255) as u8)
            .collect();
        Some(Self(bytes))
    }
}

/// Tile both buffers up to the longer of the two lengths
pub fn same_size(a: &PixelBuffer, b: &PixelBuffer) -> Result<(PixelBuffer, PixelBuffer), PixelError> {
    let len = a.len().max(b.len());
    let a = a.clone().resize(len)?;
    let b = b.clone().resize(len)?;
    Ok((a, b))
}

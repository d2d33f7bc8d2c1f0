//! Frame model.
//!
//! A `Frame` is one still image with an explicit channel layout. Every frame carries its
//! `PixelFormat` and sinks declare the one they expect; the detection loop converts with
//! [`Frame::to_format`] so channel order is never guessed.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::normalize;

/// Channel layout of a frame's pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Packed 8-bit red, green, blue.
    Rgb24,
    /// Packed 8-bit blue, green, red (what most camera stacks hand out).
    Bgr24,
    /// Planar luma followed by interleaved chroma at quarter resolution.
    Nv12,
    /// Packed 4:2:2 luma/chroma pairs (Y0 U Y1 V), the usual UVC webcam layout.
    Yuyv,
}

impl PixelFormat {
    /// Expected buffer length for a frame of the given size.
    pub fn buffer_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => pixels.checked_mul(3),
            PixelFormat::Nv12 => pixels.checked_add(pixels / 2),
            PixelFormat::Yuyv => pixels.checked_mul(2),
        }
    }

    /// Three bytes per pixel, one per color channel.
    pub fn is_packed(self) -> bool {
        matches!(self, PixelFormat::Rgb24 | PixelFormat::Bgr24)
    }
}

/// One captured (or annotated) image.
///
/// Fields are private so the buffer length always matches `width`, `height` and `format`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    index: u64,
}

impl Frame {
    /// Build a frame, rejecting buffers whose length does not match the layout.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = format
            .buffer_len(width, height)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                format,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            index: 0,
        })
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Position of the frame in its source's stream, starting at 1.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Return a copy of this frame in `target` layout.
    ///
    /// Converting to the frame's own format is a plain clone.
    pub fn to_format(&self, target: PixelFormat) -> Result<Frame> {
        if self.format == target {
            return Ok(self.clone());
        }
        let data = normalize::convert(&self.data, self.width, self.height, self.format, target)?;
        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            format: target,
            index: self.index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_length() {
        assert!(Frame::new(vec![0u8; 5], 1, 2, PixelFormat::Rgb24).is_err());
        assert!(Frame::new(vec![0u8; 6], 1, 2, PixelFormat::Bgr24).is_ok());
        assert!(Frame::new(vec![0u8; 6], 2, 2, PixelFormat::Nv12).is_ok());
        assert!(Frame::new(vec![0u8; 8], 2, 2, PixelFormat::Yuyv).is_ok());
        assert!(Frame::new(vec![0u8; 12], 2, 2, PixelFormat::Yuyv).is_err());
    }

    #[test]
    fn conversions_keep_buffer_and_dimensions_consistent() -> Result<()> {
        let frame = Frame::new(vec![128u8; 4 * 2 * 2], 4, 2, PixelFormat::Yuyv)?;
        for target in [PixelFormat::Rgb24, PixelFormat::Bgr24, PixelFormat::Yuyv] {
            let out = frame.to_format(target)?;
            assert_eq!((out.width(), out.height(), out.format()), (4, 2, target));
            assert_eq!(
                Some(out.pixels().len()),
                target.buffer_len(out.width(), out.height())
            );
        }
        Ok(())
    }

    #[test]
    fn rejects_empty_dimensions() {
        assert!(Frame::new(Vec::new(), 0, 4, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn bgr_to_rgb_swaps_outer_channels() -> Result<()> {
        let frame = Frame::new(vec![10, 20, 30, 40, 50, 60], 2, 1, PixelFormat::Bgr24)?
            .with_index(7);
        let rgb = frame.to_format(PixelFormat::Rgb24)?;
        assert_eq!(rgb.format(), PixelFormat::Rgb24);
        assert_eq!(rgb.pixels(), &[30, 20, 10, 60, 50, 40]);
        assert_eq!(rgb.index(), 7);
        Ok(())
    }

    #[test]
    fn same_format_is_a_copy() -> Result<()> {
        let frame = Frame::new(vec![1, 2, 3], 1, 1, PixelFormat::Rgb24)?;
        assert_eq!(frame.to_format(PixelFormat::Rgb24)?, frame);
        Ok(())
    }
}

//! Synthetic frame source (`stub://`).
//!
//! Produces BGR frames whose content shifts every few frames, so a digest-driven
//! detector sees a changing scene. Useful for demos and tests without a camera.

use anyhow::{anyhow, Result};

use super::FrameSource;
use crate::frame::{Frame, PixelFormat};

const SCENE_PERIOD: u64 = 10;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// End the stream after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            width: 640,
            height: 480,
            max_frames: None,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    open: bool,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            open: false,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width as usize) * (self.config.height as usize) * 3;
        if self.frame_count % SCENE_PERIOD == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / 3 + self.scene_state as u64 * 37) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        self.config.name.clone()
    }

    fn open(&mut self) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!("synthetic source needs non-zero dimensions"));
        }
        self.open = true;
        self.frame_count = 0;
        log::info!(
            "SyntheticSource: opened {} ({}x{})",
            self.config.name,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Err(anyhow!("synthetic source {} is not open", self.config.name));
        }
        if let Some(max) = self.config.max_frames {
            if self.frame_count >= max {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        let frame = Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            PixelFormat::Bgr24,
        )?
        .with_index(self.frame_count);
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.open {
            log::info!("SyntheticSource: released {}", self.config.name);
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SyntheticConfig {
        SyntheticConfig {
            name: "stub://test".to_string(),
            width: 8,
            height: 6,
            max_frames: Some(2),
        }
    }

    #[test]
    fn produces_indexed_bgr_frames_until_limit() -> Result<()> {
        let mut source = SyntheticSource::new(small());
        source.open()?;

        let first = source.read_frame()?.expect("first frame");
        assert_eq!(first.format(), PixelFormat::Bgr24);
        assert_eq!((first.width(), first.height(), first.index()), (8, 6, 1));
        assert_eq!(source.read_frame()?.map(|f| f.index()), Some(2));
        assert!(source.read_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn reading_requires_open() {
        let mut source = SyntheticSource::new(small());
        assert!(source.read_frame().is_err());
    }

    #[test]
    fn release_is_idempotent() -> Result<()> {
        let mut source = SyntheticSource::new(small());
        source.open()?;
        source.release();
        source.release();
        assert!(!source.is_open());
        Ok(())
    }
}

//! Local still-image source.
//!
//! Treats a directory of JPEG/PNG files as a video, one file per frame in name order.
//! Only local paths are accepted; nothing is written back to disk.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::FrameSource;
use crate::frame::{Frame, PixelFormat};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Clone, Debug)]
pub struct ImageDirConfig {
    pub path: PathBuf,
    /// Start over from the first file instead of ending the stream.
    pub repeat: bool,
}

pub struct ImageDirSource {
    config: ImageDirConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    open: bool,
}

impl ImageDirSource {
    pub fn new(config: ImageDirConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
            open: false,
        }
    }
}

impl FrameSource for ImageDirSource {
    fn describe(&self) -> String {
        self.config.path.display().to_string()
    }

    fn open(&mut self) -> Result<()> {
        let files = list_images(&self.config.path)?;
        if files.is_empty() {
            return Err(anyhow!(
                "no JPEG or PNG files in {}",
                self.config.path.display()
            ));
        }
        log::info!(
            "ImageDirSource: opened {} ({} frames)",
            self.config.path.display(),
            files.len()
        );
        self.files = files;
        self.cursor = 0;
        self.frame_count = 0;
        self.open = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Err(anyhow!("image source {} is not open", self.describe()));
        }
        if self.cursor >= self.files.len() {
            if !self.config.repeat {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let path = &self.files[self.cursor];
        self.cursor += 1;

        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        self.frame_count += 1;
        let frame = Frame::new(image.into_raw(), width, height, PixelFormat::Rgb24)?
            .with_index(self.frame_count);
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.files.clear();
        self.cursor = 0;
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read image directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, color: [u8; 3]) {
        let img = RgbImage::from_pixel(4, 3, Rgb(color));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn reads_images_in_name_order_then_ends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_png(dir.path(), "b.png", [0, 0, 255]);
        write_png(dir.path(), "a.png", [255, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let mut source = ImageDirSource::new(ImageDirConfig {
            path: dir.path().to_path_buf(),
            repeat: false,
        });
        source.open()?;

        let first = source.read_frame()?.expect("first frame");
        assert_eq!(first.format(), PixelFormat::Rgb24);
        assert_eq!(&first.pixels()[..3], &[255, 0, 0]);
        let second = source.read_frame()?.expect("second frame");
        assert_eq!(&second.pixels()[..3], &[0, 0, 255]);
        assert!(source.read_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn repeat_wraps_around() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_png(dir.path(), "only.png", [1, 2, 3]);
        let mut source = ImageDirSource::new(ImageDirConfig {
            path: dir.path().to_path_buf(),
            repeat: true,
        });
        source.open()?;
        for expected in 1..=3 {
            assert_eq!(source.read_frame()?.map(|f| f.index()), Some(expected));
        }
        Ok(())
    }

    #[test]
    fn empty_or_missing_directory_cannot_open() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut empty = ImageDirSource::new(ImageDirConfig {
            path: dir.path().to_path_buf(),
            repeat: false,
        });
        assert!(empty.open().is_err());

        let mut missing = ImageDirSource::new(ImageDirConfig {
            path: dir.path().join("nope"),
            repeat: false,
        });
        assert!(missing.open().is_err());
        assert!(!missing.is_open());
        Ok(())
    }
}

//! V4L2 webcam source.
//!
//! Captures frames from a local device node (e.g. /dev/video0) via memory-mapped buffers.
//! The format is picked from what the device offers: packed RGB/BGR, YUYV, NV12, or MJPG
//! (decoded to RGB). The device is held only between `open` and `release`.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::FrameSource;
use crate::frame::{Frame, PixelFormat};

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate. Zero keeps the driver default.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// How buffers from the negotiated fourcc become frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Encoding {
    Raw(PixelFormat),
    Mjpeg,
}

// Most preferred first: layouts the loop uses as-is, then converted, then compressed.
const PREFERRED_FOURCCS: [&[u8; 4]; 5] = [b"BGR3", b"RGB3", b"YUYV", b"NV12", b"MJPG"];

// Requested when the device cannot list its formats; nearly every UVC camera offers it.
const FALLBACK_FOURCC: &[u8; 4] = b"YUYV";

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<DeviceState>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
    active_encoding: Encoding,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            active_encoding: Encoding::Raw(PixelFormat::Bgr24),
            config,
            state: None,
            frame_count: 0,
        }
    }
}

fn encoding_for(fourcc: v4l::FourCC) -> Option<Encoding> {
    match &fourcc.repr {
        b"RGB3" => Some(Encoding::Raw(PixelFormat::Rgb24)),
        b"BGR3" => Some(Encoding::Raw(PixelFormat::Bgr24)),
        b"NV12" => Some(Encoding::Raw(PixelFormat::Nv12)),
        b"YUYV" => Some(Encoding::Raw(PixelFormat::Yuyv)),
        b"MJPG" | b"JPEG" => Some(Encoding::Mjpeg),
        _ => None,
    }
}

fn preferred_fourcc(offered: &[v4l::FourCC]) -> Option<v4l::FourCC> {
    PREFERRED_FOURCCS
        .iter()
        .map(|repr| v4l::FourCC::new(repr))
        .find(|fourcc| offered.contains(fourcc))
}

/// Raw buffer to frame. Drivers may pad the buffer past the image size.
fn raw_frame(
    mut data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    index: u64,
) -> Result<Frame> {
    let expected = format
        .buffer_len(width, height)
        .ok_or_else(|| anyhow!("v4l2 frame dimensions overflow"))?;
    data.truncate(expected);
    Ok(Frame::new(data, width, height, format)?.with_index(index))
}

/// Decode one MJPG buffer. The image's own dimensions win over the negotiated ones.
fn mjpeg_frame(data: &[u8], index: u64) -> Result<Frame> {
    let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .context("decode MJPG frame")?
        .to_rgb8();
    let (width, height) = image.dimensions();
    Ok(Frame::new(image.into_raw(), width, height, PixelFormat::Rgb24)?.with_index(index))
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        self.config.device.clone()
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let requested = match device.enum_formats() {
            Ok(descriptions) => {
                let offered: Vec<v4l::FourCC> = descriptions.iter().map(|d| d.fourcc).collect();
                preferred_fourcc(&offered).ok_or_else(|| {
                    let names: Vec<String> = offered.iter().map(|f| f.to_string()).collect();
                    anyhow!(
                        "v4l2 device {} offers no supported pixel format ({})",
                        self.config.device,
                        names.join(", ")
                    )
                })?
            }
            Err(err) => {
                log::warn!(
                    "V4l2Source: cannot list formats on {}: {}",
                    self.config.device,
                    err
                );
                v4l::FourCC::new(FALLBACK_FOURCC)
            }
        };

        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = requested;

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let encoding = encoding_for(format.fourcc).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported pixel format {}",
                self.config.device,
                format.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        self.active_width = format.width;
        self.active_height = format.height;
        self.active_encoding = encoding;
        self.frame_count = 0;
        self.state = Some(state);

        log::info!(
            "V4l2Source: opened {} ({}x{} {})",
            self.config.device,
            self.active_width,
            self.active_height,
            format.fourcc
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        let data = state
            .with_mut(|fields| {
                fields.stream.next().map(|(buf, meta)| {
                    let used = meta.bytesused as usize;
                    if used > 0 && used < buf.len() {
                        buf[..used].to_vec()
                    } else {
                        buf.to_vec()
                    }
                })
            })
            .context("capture v4l2 frame")?;
        if data.is_empty() {
            return Ok(None);
        }

        self.frame_count += 1;
        let frame = match self.active_encoding {
            Encoding::Raw(format) => raw_frame(
                data,
                self.active_width,
                self.active_height,
                format,
                self.frame_count,
            )?,
            Encoding::Mjpeg => mjpeg_frame(&data, self.frame_count)?,
        };
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.config.device);
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::codecs::jpeg::JpegEncoder;
    use image::ExtendedColorType;

    fn fourcc(repr: &[u8; 4]) -> v4l::FourCC {
        v4l::FourCC::new(repr)
    }

    #[test]
    fn maps_supported_fourccs() {
        assert_eq!(
            encoding_for(fourcc(b"RGB3")),
            Some(Encoding::Raw(PixelFormat::Rgb24))
        );
        assert_eq!(
            encoding_for(fourcc(b"BGR3")),
            Some(Encoding::Raw(PixelFormat::Bgr24))
        );
        assert_eq!(
            encoding_for(fourcc(b"YUYV")),
            Some(Encoding::Raw(PixelFormat::Yuyv))
        );
        assert_eq!(encoding_for(fourcc(b"MJPG")), Some(Encoding::Mjpeg));
        assert_eq!(encoding_for(fourcc(b"H264")), None);
    }

    #[test]
    fn prefers_uncompressed_formats_the_device_offers() {
        let uvc = [fourcc(b"MJPG"), fourcc(b"YUYV")];
        assert_eq!(preferred_fourcc(&uvc), Some(fourcc(b"YUYV")));
        assert_eq!(
            preferred_fourcc(&[fourcc(b"H264"), fourcc(b"MJPG")]),
            Some(fourcc(b"MJPG"))
        );
        assert_eq!(preferred_fourcc(&[fourcc(b"H264")]), None);
    }

    #[test]
    fn yuyv_buffers_are_trimmed_and_convert_to_rgb() -> Result<()> {
        let mut data = vec![128u8; 4 * 2 * 2];
        data.extend_from_slice(&[0u8; 16]);
        let frame = raw_frame(data, 4, 2, PixelFormat::Yuyv, 3)?;
        assert_eq!(frame.format(), PixelFormat::Yuyv);
        assert_eq!(frame.index(), 3);
        let rgb = frame.to_format(PixelFormat::Rgb24)?;
        assert_eq!(rgb.pixels(), &[128u8; 4 * 2 * 3][..]);
        Ok(())
    }

    #[test]
    fn mjpeg_buffers_decode_to_rgb() -> Result<()> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 90).encode(
            &[200u8; 16 * 8 * 3],
            16,
            8,
            ExtendedColorType::Rgb8,
        )?;
        let frame = mjpeg_frame(&jpeg, 5)?;
        assert_eq!(frame.format(), PixelFormat::Rgb24);
        assert_eq!((frame.width(), frame.height(), frame.index()), (16, 8, 5));

        assert!(mjpeg_frame(&[0xFF, 0xD8, 0x00], 6).is_err());
        Ok(())
    }

    #[test]
    fn missing_device_cannot_open() {
        let mut source = V4l2Source::new(V4l2Config {
            device: "/dev/video-does-not-exist".to_string(),
            ..V4l2Config::default()
        });
        assert!(source.open().is_err());
        assert!(!source.is_open());
    }
}

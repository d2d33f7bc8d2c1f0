//! Pixel layout conversion between source, detector and sink formats.

use anyhow::{anyhow, Result};

use crate::frame::PixelFormat;

pub(crate) fn convert(
    pixels: &[u8],
    width: u32,
    height: u32,
    from: PixelFormat,
    to: PixelFormat,
) -> Result<Vec<u8>> {
    let expected = from
        .buffer_len(width, height)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            from,
            expected,
            pixels.len()
        ));
    }

    match (from, to) {
        (a, b) if a == b => Ok(pixels.to_vec()),
        (PixelFormat::Rgb24, PixelFormat::Bgr24) | (PixelFormat::Bgr24, PixelFormat::Rgb24) => {
            Ok(swap_red_blue(pixels))
        }
        (PixelFormat::Nv12, PixelFormat::Rgb24) => nv12_to_rgb(pixels, width, height),
        (PixelFormat::Nv12, PixelFormat::Bgr24) => {
            Ok(swap_red_blue(&nv12_to_rgb(pixels, width, height)?))
        }
        (PixelFormat::Yuyv, PixelFormat::Rgb24) => yuyv_to_rgb(pixels, width),
        (PixelFormat::Yuyv, PixelFormat::Bgr24) => {
            Ok(swap_red_blue(&yuyv_to_rgb(pixels, width)?))
        }
        (from, to) => Err(anyhow!("unsupported conversion {:?} -> {:?}", from, to)),
    }
}

fn swap_red_blue(pixels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len());
    for px in pixels.chunks_exact(3) {
        out.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    out
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    if w % 2 != 0 || h % 2 != 0 {
        return Err(anyhow!("NV12 frames need even dimensions, got {}x{}", w, h));
    }
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
        }
    }

    Ok(rgb)
}

/// Y0 U Y1 V: each four-byte group carries two pixels sharing one chroma pair.
fn yuyv_to_rgb(pixels: &[u8], width: u32) -> Result<Vec<u8>> {
    if width % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even width, got {}", width));
    }
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    for group in pixels.chunks_exact(4) {
        let u = group[1] as f32 - 128.0;
        let v = group[3] as f32 - 128.0;
        rgb.extend_from_slice(&yuv_to_rgb(group[0] as f32, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(group[2] as f32, u, v));
    }
    Ok(rgb)
}

// BT.601 full range; `u` and `v` are already centred on zero.
fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let rgb = convert(&nv12, 2, 2, PixelFormat::Nv12, PixelFormat::Rgb24)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn yuyv_conversion_shares_chroma_across_pixel_pairs() -> Result<()> {
        // two gray pixels, then a pair whose chroma pushes red up and blue down
        let yuyv = vec![128, 128, 64, 128, 100, 100, 100, 200];
        let rgb = convert(&yuyv, 2, 2, PixelFormat::Yuyv, PixelFormat::Rgb24)?;
        assert_eq!(&rgb[..6], &[128, 128, 128, 64, 64, 64]);
        assert!(rgb[6] > rgb[8]);
        assert_eq!(&rgb[6..9], &rgb[9..12]);

        let bgr = convert(&yuyv, 2, 2, PixelFormat::Yuyv, PixelFormat::Bgr24)?;
        assert_eq!(&bgr[6..9], &[rgb[8], rgb[7], rgb[6]]);
        Ok(())
    }

    #[test]
    fn yuyv_needs_even_width() {
        let yuyv = vec![128u8; 3 * 2];
        assert!(convert(&yuyv, 3, 1, PixelFormat::Yuyv, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn packed_formats_cannot_become_nv12() {
        let pixels = vec![0u8; 12];
        assert!(convert(&pixels, 2, 2, PixelFormat::Rgb24, PixelFormat::Nv12).is_err());
    }

    #[test]
    fn length_is_validated_before_converting() {
        let pixels = vec![1u8; 8];
        assert!(convert(&pixels, 1, 3, PixelFormat::Bgr24, PixelFormat::Rgb24).is_err());
    }
}

//! Box and caption drawing for annotated frames.
//!
//! Captions need a TrueType font. `TALLY_LABEL_FONT` names one explicitly; otherwise a few
//! common system paths are tried. Without a font, boxes are drawn without captions.

use std::path::PathBuf;
use std::sync::OnceLock;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use sha2::{Digest, Sha256};

use crate::detect::result::{BoundingBox, Detection};
use crate::frame::{Frame, PixelFormat};

const BOX_THICKNESS: u32 = 2;
const CAPTION_SCALE: f32 = 14.0;
const CAPTION_PADDING: u32 = 2;
const CAPTION_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

const LABEL_FONT_ENV: &str = "TALLY_LABEL_FONT";
const FONT_CANDIDATES: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

// RGB order.
const PALETTE: [[u8; 3]; 6] = [
    [0, 200, 255],
    [255, 120, 0],
    [60, 220, 60],
    [230, 40, 160],
    [250, 220, 0],
    [150, 90, 255],
];

/// Draw a box and a "label confidence" caption per detection on a copy of `frame`.
///
/// The copy keeps the frame's channel order; non-packed input is drawn on as BGR.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Result<Frame> {
    let base = if frame.format().is_packed() {
        frame.clone()
    } else {
        frame.to_format(PixelFormat::Bgr24)?
    };
    let (width, height) = (base.width(), base.height());
    let (format, index) = (base.format(), base.index());
    // channel order lives in the colors, so a BGR buffer is drawn on as if it were RGB
    let mut canvas = RgbImage::from_raw(width, height, base.into_pixels())
        .ok_or_else(|| anyhow!("{}x{} canvas does not match its buffer", width, height))?;

    let font = label_font();
    for detection in detections {
        let Some(rect) = clamp_rect(&detection.bounding_box, width, height) else {
            continue;
        };
        let color = Rgb(label_color(&detection.label, format));
        draw_box(&mut canvas, rect, color);
        if let Some(font) = font {
            draw_caption(&mut canvas, rect, &caption(detection), color, font);
        }
    }

    Ok(Frame::new(canvas.into_raw(), width, height, format)?.with_index(index))
}

/// Stable color for a label, expressed in the given packed layout.
pub fn label_color(label: &str, format: PixelFormat) -> [u8; 3] {
    let digest = Sha256::digest(label.as_bytes());
    let [r, g, b] = PALETTE[digest[0] as usize % PALETTE.len()];
    match format {
        PixelFormat::Bgr24 => [b, g, r],
        _ => [r, g, b],
    }
}

fn caption(detection: &Detection) -> String {
    format!("{} {:.2}", detection.label, detection.confidence)
}

/// Box corners rounded and clamped to the frame, inclusive of the right and bottom edge.
fn clamp_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;
    let left = (bbox.x.round() as i32).clamp(0, max_x);
    let top = (bbox.y.round() as i32).clamp(0, max_y);
    let right = ((bbox.x + bbox.w).round() as i32).clamp(0, max_x);
    let bottom = ((bbox.y + bbox.h).round() as i32).clamp(0, max_y);
    if right < left || bottom < top {
        return None;
    }
    Some(Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32))
}

fn draw_box(canvas: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    for inset in 0..BOX_THICKNESS {
        if rect.width() <= 2 * inset || rect.height() <= 2 * inset {
            break;
        }
        let ring = Rect::at(rect.left() + inset as i32, rect.top() + inset as i32)
            .of_size(rect.width() - 2 * inset, rect.height() - 2 * inset);
        draw_hollow_rect_mut(canvas, ring, color);
    }
}

/// Filled tab above the box (inside it when the box touches the top edge) with white text.
fn draw_caption(canvas: &mut RgbImage, rect: Rect, text: &str, color: Rgb<u8>, font: &FontVec) {
    let scale = PxScale::from(CAPTION_SCALE);
    let (text_w, text_h) = text_size(scale, font, text);
    let tab_w = text_w + 2 * CAPTION_PADDING;
    let tab_h = text_h.max(1) + 2 * CAPTION_PADDING;
    let tab_top = if rect.top() >= tab_h as i32 {
        rect.top() - tab_h as i32
    } else {
        rect.top()
    };

    draw_filled_rect_mut(
        canvas,
        Rect::at(rect.left(), tab_top).of_size(tab_w, tab_h),
        color,
    );
    draw_text_mut(
        canvas,
        CAPTION_TEXT,
        rect.left() + CAPTION_PADDING as i32,
        tab_top + CAPTION_PADDING as i32,
        scale,
        font,
        text,
    );
}

fn label_font() -> Option<&'static FontVec> {
    static FONT: OnceLock<Option<FontVec>> = OnceLock::new();
    FONT.get_or_init(load_label_font).as_ref()
}

fn load_label_font() -> Option<FontVec> {
    let configured = std::env::var_os(LABEL_FONT_ENV).map(PathBuf::from);
    let candidates = configured
        .into_iter()
        .chain(FONT_CANDIDATES.iter().map(PathBuf::from));
    for path in candidates {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                log::debug!("annotation font: {}", path.display());
                return Some(font);
            }
            Err(err) => log::warn!("ignoring annotation font {}: {}", path.display(), err),
        }
    }
    log::warn!(
        "no annotation font found (set {}); boxes are drawn without captions",
        LABEL_FONT_ENV
    );
    None
}

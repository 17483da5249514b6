//! Face cropping and annotated-image rendering.

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

use crate::models::job::FaceRegion;

const MATCHED: Rgb<u8> = Rgb([0, 200, 0]);
const UNMATCHED: Rgb<u8> = Rgb([220, 0, 0]);
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

const BOX_THICKNESS: u32 = 3;
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_SCALE: u32 = 2;
const LABEL_PADDING: u32 = 4;

/// A face box to draw on the annotated image.
#[derive(Debug, Clone)]
pub struct FaceLabel {
    pub region: FaceRegion,
    pub text: String,
    pub matched: bool,
}

pub fn decode(raw: &[u8]) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory(raw)
}

/// Cut a face out of the image with `padding` pixels around it, clamped to
/// the image bounds, and encode it as JPEG.
pub fn crop_face(image: &DynamicImage, region: &FaceRegion, padding: u32) -> Result<Bytes, CropError> {
    let (width, height) = (image.width(), image.height());
    if region.left >= width || region.top >= height {
        return Err(CropError::OutOfBounds(*region));
    }

    let left = region.left.saturating_sub(padding);
    let top = region.top.saturating_sub(padding);
    let right = region.right.saturating_add(padding).min(width);
    let bottom = region.bottom.saturating_add(padding).min(height);
    if right <= left || bottom <= top {
        return Err(CropError::Empty(*region));
    }

    let face = image.crop_imm(left, top, right - left, bottom - top);
    encode_jpeg(&face).map_err(CropError::Encode)
}

/// Draw every face box with its label band. Matched faces are green, the rest red.
pub fn render_annotated(image: &DynamicImage, labels: &[FaceLabel]) -> Result<Bytes, image::ImageError> {
    let mut canvas = image.to_rgb8();
    for label in labels {
        let color = if label.matched { MATCHED } else { UNMATCHED };
        draw_box(&mut canvas, &label.region, color);
        draw_label(&mut canvas, &label.region, &label.text, color);
    }
    encode_jpeg(&DynamicImage::ImageRgb8(canvas))
}

pub fn encode_jpeg(image: &DynamicImage) -> Result<Bytes, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)?;
    Ok(Bytes::from(buf))
}

fn fill_rect(canvas: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let x1 = x1.min(canvas.width());
    let y1 = y1.min(canvas.height());
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

fn draw_box(canvas: &mut RgbImage, region: &FaceRegion, color: Rgb<u8>) {
    let FaceRegion { top, right, bottom, left } = *region;
    let t = BOX_THICKNESS;
    fill_rect(canvas, left, top, right, top.saturating_add(t), color);
    fill_rect(canvas, left, bottom.saturating_sub(t), right, bottom, color);
    fill_rect(canvas, left, top, left.saturating_add(t), bottom, color);
    fill_rect(canvas, right.saturating_sub(t), top, right, bottom, color);
}

fn draw_label(canvas: &mut RgbImage, region: &FaceRegion, text: &str, color: Rgb<u8>) {
    let advance = (GLYPH_WIDTH + 1) * GLYPH_SCALE;
    let band_height = GLYPH_HEIGHT * GLYPH_SCALE + 2 * LABEL_PADDING;
    let band_width = text.chars().count() as u32 * advance + 2 * LABEL_PADDING;

    // Below the box when it fits, otherwise inside its bottom edge.
    let band_top = if region.bottom + band_height <= canvas.height() {
        region.bottom
    } else {
        region.bottom.saturating_sub(band_height)
    };
    let band_right = region.left.saturating_add(band_width.max(region.width()));
    fill_rect(canvas, region.left, band_top, band_right, band_top + band_height, color);

    let mut x = region.left + LABEL_PADDING;
    let y = band_top + LABEL_PADDING;
    for c in text.chars() {
        draw_glyph(canvas, x, y, glyph(c));
        x += advance;
    }
}

fn draw_glyph(canvas: &mut RgbImage, x: u32, y: u32, rows: [u8; 7]) {
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                continue;
            }
            let px = x + col * GLYPH_SCALE;
            let py = y + row as u32 * GLYPH_SCALE;
            fill_rect(canvas, px, py, px + GLYPH_SCALE, py + GLYPH_SCALE, LABEL_TEXT);
        }
    }
}

/// 5x7 bitmap glyphs, one byte per row with the leftmost pixel in bit 4.
/// Lowercase letters render as uppercase; anything unsupported as `?`.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0x00; 7],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CropError {
    #[error("face region {0:?} lies outside the image")]
    OutOfBounds(FaceRegion),

    #[error("face region {0:?} is empty")]
    Empty(FaceRegion),

    #[error("failed to encode cropped face: {0}")]
    Encode(#[source] image::ImageError),
}

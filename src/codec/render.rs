//! Draw detection boxes onto a JPEG frame

use bytes::Bytes;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use super::jpeg::encode_rgb;
use super::CodecError;
use crate::detect::Detection;

const PALETTE: [[u8; 3]; 6] = [
    [0, 220, 0],
    [255, 140, 0],
    [0, 160, 255],
    [230, 30, 30],
    [200, 0, 200],
    [240, 220, 0],
];

const STROKE: i32 = 2;
const TAB_HEIGHT: u32 = 6;

fn class_color(class: &str) -> Rgb<u8> {
    let hash = class
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    Rgb(PALETTE[hash % PALETTE.len()])
}

fn draw_detection(image: &mut RgbImage, detection: &Detection, labels: bool) {
    let (img_w, img_h) = image.dimensions();
    let bbox = &detection.bbox;

    let x0 = bbox.x.max(0.0).min(img_w as f64) as i32;
    let y0 = bbox.y.max(0.0).min(img_h as f64) as i32;
    let x1 = bbox.right().max(0.0).min(img_w as f64) as i32;
    let y1 = bbox.bottom().max(0.0).min(img_h as f64) as i32;
    if x1 <= x0 || y1 <= y0 {
        return;
    }

    let color = class_color(&detection.class);
    for inset in 0..STROKE {
        let w = x1 - x0 - 2 * inset;
        let h = y1 - y0 - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x0 + inset, y0 + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, color);
    }

    // No text is rasterized; class and confidence go out in the frame's detections
    if labels {
        // Confidence tab above the box; its width is proportional to confidence
        let tab_w = (((x1 - x0) as f32) * detection.confidence.clamp(0.0, 1.0)).max(4.0) as u32;
        let tab_y = (y0 - TAB_HEIGHT as i32).max(0);
        draw_filled_rect_mut(image, Rect::at(x0, tab_y).of_size(tab_w, TAB_HEIGHT), color);
    }
}

/// Decode `data`, draw every detection and re-encode at `quality`
pub fn render_detections(
    data: &[u8],
    detections: &[Detection],
    labels: bool,
    quality: u8,
) -> Result<Bytes, CodecError> {
    let mut image = image::load_from_memory(data)
        .map_err(CodecError::Decode)?
        .into_rgb8();

    for detection in detections {
        draw_detection(&mut image, detection, labels);
    }

    encode_rgb(&image, quality)
}

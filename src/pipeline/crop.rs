//! Region cropping: PDF rectangle → padded, full-width strip of the page image.
//!
//! PDF user space has its origin at the bottom-left with y growing upward;
//! images have it at the top-left with y growing downward. A y value maps to
//! `page_height - y`. The strip spans the whole page width so the reviewer's
//! comment keeps its surrounding context.

use crate::output::Rect;
use image::DynamicImage;

/// Pixel bounds of a crop, already clamped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Image-space vertical span of `rect` before padding: `(H - y0, H - y1)`.
pub fn flip_vertical(page_height: f64, rect: Rect) -> (f64, f64) {
    (page_height - rect.y0, page_height - rect.y1)
}

/// Compute the crop for `rect` on an image of `image_width × image_height`.
///
/// The flipped span is widened by `padding` on both sides and clamped to
/// `[0, image_height]`. A span that ends up empty (rectangle far outside the
/// page) still yields one pixel row so the record gets an image.
pub fn crop_bounds(
    image_width: u32,
    image_height: u32,
    page_height: f64,
    rect: Rect,
    padding: u32,
) -> CropBounds {
    let (a, b) = flip_vertical(page_height, rect);
    let pad = f64::from(padding);
    let max_y = f64::from(image_height);

    let top = (a.min(b) - pad).clamp(0.0, max_y);
    let bottom = (a.max(b) + pad).clamp(0.0, max_y);

    let mut y = top.floor() as u32;
    let mut height = (bottom.ceil() as u32).saturating_sub(y);
    if height == 0 {
        y = y.min(image_height.saturating_sub(1));
        height = 1;
    }

    CropBounds {
        x: 0,
        y,
        width: image_width.max(1),
        height,
    }
}

/// Cut the padded strip for `rect` out of `page_image`.
pub fn crop_region(page_image: &DynamicImage, page_height: f64, rect: Rect, padding: u32) -> DynamicImage {
    let b = crop_bounds(page_image.width(), page_image.height(), page_height, rect, padding);
    page_image.crop_imm(b.x, b.y, b.width, b.height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn flip_uses_page_height_minus_y() {
        let (a, b) = flip_vertical(792.0, Rect::new(100.0, 200.0, 300.0, 250.0));
        assert_eq!(a, 592.0);
        assert_eq!(b, 542.0);
    }

    #[test]
    fn bounds_pad_both_sides() {
        let b = crop_bounds(612, 792, 792.0, Rect::new(100.0, 200.0, 300.0, 250.0), 100);
        assert_eq!(b, CropBounds { x: 0, y: 442, width: 612, height: 250 });
    }

    #[test]
    fn bounds_clamp_at_page_edges() {
        // Near the top of the page: H - y1 = 12, minus padding goes negative.
        let top = crop_bounds(612, 792, 792.0, Rect::new(0.0, 760.0, 50.0, 780.0), 100);
        assert_eq!(top.y, 0);
        assert_eq!(top.height, 132);

        // Near the bottom: H - y0 + padding exceeds the image height.
        let bottom = crop_bounds(612, 792, 792.0, Rect::new(0.0, 10.0, 50.0, 30.0), 100);
        assert_eq!(bottom.y, 662);
        assert_eq!(bottom.y + bottom.height, 792);
    }

    #[test]
    fn inverted_rect_gives_same_strip() {
        let a = crop_bounds(612, 792, 792.0, Rect::new(100.0, 200.0, 300.0, 250.0), 100);
        let b = crop_bounds(612, 792, 792.0, Rect::new(300.0, 250.0, 100.0, 200.0), 100);
        assert_eq!(a, b);
    }

    #[test]
    fn rect_outside_page_still_yields_a_row() {
        let b = crop_bounds(612, 792, 792.0, Rect::new(0.0, 5000.0, 10.0, 5100.0), 0);
        assert_eq!(b.height, 1);
        assert_eq!(b.y, 0);
    }

    #[test]
    fn crop_region_has_expected_size() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(612, 792, Rgba([255, 255, 255, 255])));
        let out = crop_region(&img, 792.0, Rect::new(100.0, 200.0, 300.0, 250.0), 100);
        assert_eq!(out.width(), 612);
        assert_eq!(out.height(), 250);
    }
}

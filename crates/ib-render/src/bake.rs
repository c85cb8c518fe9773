//! Annotation baking: burn numbered markers into an image's pixels.
//!
//! The generation service only sees raw pixels, so markers the user placed
//! on an image source are drawn into a copy of the image before it is sent.
//! Drawing goes through the [`ImageCompositor`] capability so the same
//! pipeline can run on any raster backend; [`RasterCompositor`] is the
//! `image`/`imageproc` implementation.

use font8x8::{BASIC_FONTS, UnicodeFonts};
use ib_core::{Annotation, EncodedImage};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_circle_mut;
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum BakeError {
    #[error("failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode baked image: {0}")]
    Encode(#[source] image::ImageError),
}

/// Marker appearance. Sizes scale with the image so markers stay legible
/// on large photos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    pub fill: [u8; 4],
    pub outline: [u8; 4],
    pub text: [u8; 4],
    /// Smallest marker radius in pixels.
    pub min_radius: f64,
    /// Marker radius as a fraction of the image's shorter side.
    pub radius_ratio: f64,
    /// Outline width as a fraction of the radius (at least 2px).
    pub outline_ratio: f64,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            fill: [239, 68, 68, 255],
            outline: [255, 255, 255, 255],
            text: [255, 255, 255, 255],
            min_radius: 10.0,
            radius_ratio: 0.04,
            outline_ratio: 0.15,
        }
    }
}

/// Pixel-space placement of one marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerGeometry {
    pub center: Point,
    pub radius: f64,
    pub outline: f64,
}

impl MarkerGeometry {
    pub fn new(annotation: &Annotation, width: u32, height: u32, style: &MarkerStyle) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        let radius = (w.min(h) * style.radius_ratio).max(style.min_radius);
        Self {
            center: Point::new(annotation.x / 100.0 * w, annotation.y / 100.0 * h),
            radius,
            outline: (radius * style.outline_ratio).max(2.0).round(),
        }
    }
}

/// Raster backend used by the baker: decode → draw primitives → encode.
pub trait ImageCompositor {
    type Surface;

    fn decode(&self, image: &EncodedImage) -> Result<Self::Surface, BakeError>;

    fn dimensions(&self, surface: &Self::Surface) -> (u32, u32);

    fn fill_circle(&self, surface: &mut Self::Surface, center: Point, radius: f64, color: [u8; 4]);

    /// Draw `text` centered on `center`, roughly `height` pixels tall.
    fn draw_label(
        &self,
        surface: &mut Self::Surface,
        center: Point,
        text: &str,
        height: f64,
        color: [u8; 4],
    );

    fn encode(&self, surface: Self::Surface) -> Result<EncodedImage, BakeError>;
}

/// Draw every annotation onto a copy of `image`.
///
/// The result has the source's pixel dimensions and is PNG-encoded.
/// Pixels outside the markers are left untouched.
pub fn bake_annotations<C: ImageCompositor>(
    compositor: &C,
    image: &EncodedImage,
    annotations: &[Annotation],
    style: &MarkerStyle,
) -> Result<EncodedImage, BakeError> {
    let mut surface = compositor.decode(image)?;
    let (width, height) = compositor.dimensions(&surface);
    log::debug!(
        "baking {} marker(s) onto {width}x{height} image",
        annotations.len()
    );

    for ann in annotations {
        let marker = MarkerGeometry::new(ann, width, height, style);
        compositor.fill_circle(&mut surface, marker.center, marker.radius, style.outline);
        compositor.fill_circle(
            &mut surface,
            marker.center,
            marker.radius - marker.outline,
            style.fill,
        );
        compositor.draw_label(
            &mut surface,
            marker.center,
            &ann.id.to_string(),
            marker.radius,
            style.text,
        );
    }

    compositor.encode(surface)
}

// ─── image/imageproc backend ─────────────────────────────────────────────

/// [`ImageCompositor`] over an in-memory RGBA buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCompositor;

const GLYPH_SIZE: i32 = 8;

impl ImageCompositor for RasterCompositor {
    type Surface = RgbaImage;

    fn decode(&self, image: &EncodedImage) -> Result<RgbaImage, BakeError> {
        let decoded = image::load_from_memory(&image.bytes).map_err(BakeError::Decode)?;
        Ok(decoded.to_rgba8())
    }

    fn dimensions(&self, surface: &RgbaImage) -> (u32, u32) {
        surface.dimensions()
    }

    fn fill_circle(&self, surface: &mut RgbaImage, center: Point, radius: f64, color: [u8; 4]) {
        if radius <= 0.0 {
            return;
        }
        draw_filled_circle_mut(
            surface,
            (center.x.round() as i32, center.y.round() as i32),
            radius.round() as i32,
            Rgba(color),
        );
    }

    fn draw_label(
        &self,
        surface: &mut RgbaImage,
        center: Point,
        text: &str,
        height: f64,
        color: [u8; 4],
    ) {
        let scale = ((height / f64::from(GLYPH_SIZE)).round() as i32).max(1);
        let glyph_px = GLYPH_SIZE * scale;
        let chars = text.chars().count() as i32;
        let left = center.x.round() as i32 - chars * glyph_px / 2;
        let top = center.y.round() as i32 - glyph_px / 2;
        let (w, h) = (surface.width() as i32, surface.height() as i32);

        for (i, ch) in text.chars().enumerate() {
            let Some(glyph) = BASIC_FONTS.get(ch) else {
                continue;
            };
            let x0 = left + i as i32 * glyph_px;
            for (row, &bits) in glyph.iter().enumerate() {
                for col in 0..GLYPH_SIZE {
                    if (bits >> col) & 1 == 0 {
                        continue;
                    }
                    let px = x0 + col * scale;
                    let py = top + row as i32 * scale;
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let (x, y) = (px + dx, py + dy);
                            if x >= 0 && y >= 0 && x < w && y < h {
                                surface.put_pixel(x as u32, y as u32, Rgba(color));
                            }
                        }
                    }
                }
            }
        }
    }

    fn encode(&self, surface: RgbaImage) -> Result<EncodedImage, BakeError> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(surface)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(BakeError::Encode)?;
        Ok(EncodedImage::png(buf))
    }
}

//! Creative Renderer - One Source, Exact Buckets
//!
//! center-crop -> resize to canonical bucket -> overlay band + message -> JPEG.
//! Output dimensions always equal the bucket for the requested ratio.

pub mod text;

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::brief::BrandGuidelines;
use crate::color::Rgb;
use crate::formats::{center_crop, AspectRatio, CanonicalSize, FormatRegistry};
pub use text::{fit_message, TextLayout, Typeface};

pub const MIN_FONT_PX: f32 = 18.0;
pub const FONT_STEP_PX: f32 = 4.0;
/// Starting font size as a fraction of frame height.
const START_FONT_FRACTION: f32 = 0.06;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Source image could not be decoded: {0}")]
    DecodeFailed(String),

    #[error("Creative could not be encoded: {0}")]
    EncodeFailed(String),
}

/// Overlay colors resolved from the brand guidelines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrandStyle {
    pub band_color: Rgb,
    pub text_color: Rgb,
}

impl Default for BrandStyle {
    fn default() -> Self {
        Self { band_color: Rgb::BLACK, text_color: Rgb::WHITE }
    }
}

impl BrandStyle {
    /// Band uses the primary color, text the secondary. Unparseable entries
    /// fall back to the defaults.
    pub fn from_guidelines(guidelines: &BrandGuidelines) -> Self {
        let default = Self::default();
        let pick = |c: &Option<String>, fallback: Rgb| {
            c.as_deref().and_then(|hex| Rgb::from_hex(hex).ok()).unwrap_or(fallback)
        };
        Self {
            band_color: pick(&guidelines.primary_color, default.band_color),
            text_color: pick(&guidelines.secondary_color, default.text_color),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OverlaySettings {
    /// Band alpha, 0.0 ..= 1.0.
    pub opacity: f32,
    /// Fraction of the frame height the band covers, measured from the bottom.
    pub band_fraction: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self { opacity: 0.7, band_fraction: 1.0 / 3.0 }
    }
}

/// A finished creative, still in memory.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub aspect_ratio: AspectRatio,
    pub size: CanonicalSize,
    pub font_px: f32,
    /// Message did not fit the band even at `MIN_FONT_PX`.
    pub message_overflow: bool,
}

pub struct CreativeRenderer {
    registry: FormatRegistry,
    typeface: Arc<Typeface>,
    overlay: OverlaySettings,
    jpeg_quality: u8,
}

impl CreativeRenderer {
    pub fn new(registry: FormatRegistry, typeface: Arc<Typeface>) -> Self {
        Self {
            registry,
            typeface,
            overlay: OverlaySettings::default(),
            jpeg_quality: 95,
        }
    }

    pub fn with_overlay(mut self, overlay: OverlaySettings) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn bucket(&self, ratio: AspectRatio) -> CanonicalSize {
        self.registry.bucket(ratio)
    }

    /// Decode, render and encode in one step.
    pub fn render(
        &self,
        source: &[u8],
        ratio: AspectRatio,
        message: &str,
        style: &BrandStyle,
    ) -> Result<RenderedImage, RenderError> {
        let decoded = decode(source)?;
        self.render_decoded(&decoded, ratio, message, style)
    }

    pub fn render_decoded(
        &self,
        source: &DynamicImage,
        ratio: AspectRatio,
        message: &str,
        style: &BrandStyle,
    ) -> Result<RenderedImage, RenderError> {
        let size = self.registry.bucket(ratio);
        let mut canvas = crop_and_resize(source, ratio, size);

        let layout = self.draw_overlay(&mut canvas, message, style);
        let bytes = encode_jpeg(&canvas, self.jpeg_quality)?;

        debug!(
            aspect_ratio = %ratio,
            size = %size,
            font_px = layout.font_px,
            overflow = layout.overflow,
            "Rendered creative"
        );

        Ok(RenderedImage {
            bytes,
            aspect_ratio: ratio,
            size,
            font_px: layout.font_px,
            message_overflow: layout.overflow,
        })
    }

    fn draw_overlay(&self, canvas: &mut RgbaImage, message: &str, style: &BrandStyle) -> TextLayout {
        let (w, h) = canvas.dimensions();
        let band_h = ((h as f32 * self.overlay.band_fraction).round() as u32).clamp(1, h);
        let band_top = h - band_h;

        let alpha = (self.overlay.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
        fill_rect(canvas, 0, band_top, w, band_h, style.band_color.to_rgba(alpha));

        let pad_x = (w as f32 * 0.05).round();
        let pad_y = (band_h as f32 * 0.1).round();
        let max_width = (w as f32 - 2.0 * pad_x).max(1.0);
        let max_height = (band_h as f32 - 2.0 * pad_y).max(1.0);
        let start_px = (h as f32 * START_FONT_FRACTION).max(MIN_FONT_PX);

        let layout = fit_message(
            &self.typeface,
            message,
            max_width,
            max_height,
            start_px,
            MIN_FONT_PX,
            FONT_STEP_PX,
        );

        // Vertically centered in the band; an overflowing block starts at the
        // band's top padding and runs past the frame edge.
        let block_h = layout.block_height();
        let mut y = if layout.overflow {
            band_top as f32 + pad_y
        } else {
            band_top as f32 + (band_h as f32 - block_h) / 2.0
        };
        let color = style.text_color.to_rgba(255);
        for line in &layout.lines {
            let line_w = self.typeface.text_width(layout.font_px, line);
            let x = ((w as f32 - line_w) / 2.0).round() as i32;
            self.typeface.draw_line(canvas, layout.font_px, x, y.round() as i32, color, line);
            y += layout.line_height;
        }

        layout
    }
}

pub fn decode(source: &[u8]) -> Result<DynamicImage, RenderError> {
    image::load_from_memory(source).map_err(|e| RenderError::DecodeFailed(e.to_string()))
}

/// Center-crop to `ratio`, then resize to exactly `size`.
pub fn crop_and_resize(source: &DynamicImage, ratio: AspectRatio, size: CanonicalSize) -> RgbaImage {
    let rgba = source.to_rgba8();
    let rect = center_crop(rgba.width(), rgba.height(), ratio);
    let cropped = imageops::crop_imm(&rgba, rect.x, rect.y, rect.width, rect.height).to_image();
    if cropped.dimensions() == (size.width, size.height) {
        return cropped;
    }
    imageops::resize(&cropped, size.width, size.height, FilterType::Lanczos3)
}

fn fill_rect(canvas: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    let a = color.0[3] as f32 / 255.0;
    let x_end = (x + w).min(canvas.width());
    let y_end = (y + h).min(canvas.height());
    for py in y..y_end {
        for px in x..x_end {
            let dst = canvas.get_pixel_mut(px, py);
            for c in 0..3 {
                dst.0[c] = (color.0[c] as f32 * a + dst.0[c] as f32 * (1.0 - a)).round() as u8;
            }
            dst.0[3] = 255;
        }
    }
}

/// JPEG has no alpha; the canvas is flattened to RGB first.
pub fn encode_jpeg(canvas: &RgbaImage, quality: u8) -> Result<Vec<u8>, RenderError> {
    let rgb = DynamicImage::ImageRgba8(canvas.clone()).to_rgb8();
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| RenderError::EncodeFailed(e.to_string()))?;
    Ok(out)
}

pub fn encode_png(canvas: &RgbaImage) -> Result<Vec<u8>, RenderError> {
    let mut out = Cursor::new(Vec::new());
    canvas
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| RenderError::EncodeFailed(e.to_string()))?;
    Ok(out.into_inner())
}

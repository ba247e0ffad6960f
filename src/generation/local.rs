//! Placeholder backend.
//!
//! Deterministic, offline, and infallible: a neutral fill, hazard stripes
//! along the top and bottom edges, and the product identifier in the middle so
//! a placeholder creative is never mistaken for real output.

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{Backend, GeneratedImage, GenerationError, GenerationRequest, ImageGenerator};
use crate::render::{encode_png, Typeface};

const FILL: Rgba<u8> = Rgba([0xE8, 0xE8, 0xE8, 255]);
const INK: Rgba<u8> = Rgba([0x33, 0x33, 0x33, 255]);
const STRIPE: Rgba<u8> = Rgba([0xFF, 0x00, 0xFF, 255]);

/// Largest edge the placeholder will render at.
const MAX_EDGE: u32 = 2048;

/// 1x1 transparent PNG, used when the rendering path itself fails.
pub const MINIMAL_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A,
    0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
    0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41,
    0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00,
    0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

pub struct PlaceholderGenerator {
    typeface: Arc<Typeface>,
}

impl PlaceholderGenerator {
    pub fn new(typeface: Arc<Typeface>) -> Self {
        Self { typeface }
    }

    /// Never fails; degrades to `MINIMAL_PNG`.
    pub fn placeholder_bytes(&self, request: &GenerationRequest) -> Vec<u8> {
        match self.render(request) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(product_id = %request.product_id, error = %e, "Placeholder render failed, using minimal PNG");
                MINIMAL_PNG.to_vec()
            }
        }
    }

    fn render(&self, request: &GenerationRequest) -> Result<Vec<u8>, crate::render::RenderError> {
        let w = request.size.0.clamp(1, MAX_EDGE);
        let h = request.size.1.clamp(1, MAX_EDGE);
        let mut img = RgbaImage::from_pixel(w, h, FILL);

        let stripe_h = (h / 16).max(1);
        let period = (stripe_h * 2).max(2);
        for y in (0..stripe_h).chain(h.saturating_sub(stripe_h)..h) {
            for x in 0..w {
                if (x + y) % period < period / 2 {
                    img.put_pixel(x, y, STRIPE);
                }
            }
        }

        let px = (h as f32 * 0.05).max(12.0);
        let line_h = self.typeface.line_height(px);
        let lines = [request.product_id.as_str(), "[PLACEHOLDER]"];
        let mut y = (h as f32 - line_h * lines.len() as f32) / 2.0;
        for line in lines {
            let line_w = self.typeface.text_width(px, line);
            let x = ((w as f32 - line_w) / 2.0).round() as i32;
            self.typeface.draw_line(&mut img, px, x, y.round() as i32, INK, line);
            y += line_h;
        }

        encode_png(&img)
    }
}

#[async_trait]
impl ImageGenerator for PlaceholderGenerator {
    fn describe(&self) -> String {
        "placeholder".to_string()
    }

    fn backend(&self) -> Backend {
        Backend::Placeholder
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        _timeout: Duration,
    ) -> Result<GeneratedImage, GenerationError> {
        info!(product_id = %request.product_id, "Generating placeholder image");
        Ok(GeneratedImage::new(self.placeholder_bytes(request), Backend::Placeholder))
    }

    async fn check_connection(&self) -> bool {
        true
    }
}

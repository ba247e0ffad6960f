//! Text measurement, wrapping and drawing.
//!
//! A TrueType face when one can be found, otherwise fixed block glyphs with
//! monospace metrics. Both paths measure deterministically so overflow
//! detection does not depend on the host's fonts.

use image::{Rgba, RgbaImage};
use rusttype::{point, Font, Scale};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Advance of a block glyph, in ems.
const BLOCK_ADVANCE_EM: f32 = 0.6;
const LINE_HEIGHT_EM: f32 = 1.2;

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub enum Typeface {
    TrueType(Font<'static>),
    Blocks,
}

impl std::fmt::Debug for Typeface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Typeface::TrueType(_) => f.write_str("Typeface::TrueType"),
            Typeface::Blocks => f.write_str("Typeface::Blocks"),
        }
    }
}

impl Typeface {
    /// First parsable font among `preferred`, then well-known system paths.
    pub fn discover(preferred: &[PathBuf]) -> Self {
        let system = SYSTEM_FONT_CANDIDATES.iter().map(PathBuf::from);
        for path in preferred.iter().cloned().chain(system) {
            if let Some(face) = Self::from_file(&path) {
                debug!(font = %path.display(), "Loaded overlay font");
                return face;
            }
        }
        warn!("No TrueType font found, overlay text falls back to block glyphs");
        Typeface::Blocks
    }

    pub fn from_file(path: &Path) -> Option<Self> {
        let bytes = fs::read(path).ok()?;
        Font::try_from_vec(bytes).map(Typeface::TrueType)
    }

    pub fn is_truetype(&self) -> bool {
        matches!(self, Typeface::TrueType(_))
    }

    pub fn line_height(&self, px: f32) -> f32 {
        match self {
            Typeface::TrueType(font) => {
                let vm = font.v_metrics(Scale::uniform(px));
                (vm.ascent - vm.descent + vm.line_gap).max(px)
            }
            Typeface::Blocks => px * LINE_HEIGHT_EM,
        }
    }

    pub fn text_width(&self, px: f32, text: &str) -> f32 {
        if text.is_empty() {
            return 0.0;
        }
        match self {
            Typeface::TrueType(font) => {
                let scale = Scale::uniform(px);
                font.layout(text, scale, point(0.0, 0.0))
                    .last()
                    .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
                    .unwrap_or(0.0)
            }
            Typeface::Blocks => text.chars().count() as f32 * px * BLOCK_ADVANCE_EM,
        }
    }

    /// Draw one line with its top-left corner at (x, y). Pixels outside the
    /// image are clipped.
    pub fn draw_line(&self, img: &mut RgbaImage, px: f32, x: i32, y: i32, color: Rgba<u8>, text: &str) {
        match self {
            Typeface::TrueType(font) => {
                let scale = Scale::uniform(px);
                let ascent = font.v_metrics(scale).ascent;
                let origin = point(x as f32, y as f32 + ascent);
                for glyph in font.layout(text, scale, origin) {
                    let Some(bb) = glyph.pixel_bounding_box() else { continue };
                    glyph.draw(|gx, gy, coverage| {
                        blend(img, gx as i32 + bb.min.x, gy as i32 + bb.min.y, color, coverage);
                    });
                }
            }
            Typeface::Blocks => {
                let advance = px * BLOCK_ADVANCE_EM;
                let glyph_w = (advance * 0.8).max(1.0) as i32;
                let glyph_h = (px * 0.75).max(1.0) as i32;
                let top = y + (px * 0.15) as i32;
                for (i, ch) in text.chars().enumerate() {
                    if ch.is_whitespace() {
                        continue;
                    }
                    let left = x + (i as f32 * advance) as i32;
                    for py in top..top + glyph_h {
                        for px_ in left..left + glyph_w {
                            blend(img, px_, py, color, 1.0);
                        }
                    }
                }
            }
        }
    }
}

fn blend(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>, coverage: f32) {
    if x < 0 || y < 0 || x as u32 >= img.width() || y as u32 >= img.height() {
        return;
    }
    let a = (coverage.clamp(0.0, 1.0) * color.0[3] as f32 / 255.0).clamp(0.0, 1.0);
    if a <= 0.0 {
        return;
    }
    let dst = img.get_pixel_mut(x as u32, y as u32);
    for c in 0..3 {
        dst.0[c] = (color.0[c] as f32 * a + dst.0[c] as f32 * (1.0 - a)).round() as u8;
    }
    dst.0[3] = 255;
}

/// Result of fitting a message into a box.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub lines: Vec<String>,
    pub font_px: f32,
    pub line_height: f32,
    /// Still too large at the minimum size.
    pub overflow: bool,
}

impl TextLayout {
    pub fn block_height(&self) -> f32 {
        self.lines.len() as f32 * self.line_height
    }
}

/// Absorbs f32 accumulation so text that exactly fills a box still fits.
const FIT_EPSILON: f32 = 1e-3;

fn fits(measured: f32, limit: f32) -> bool {
    measured <= limit + FIT_EPSILON
}

/// Greedy word wrap. A single word wider than `max_width` keeps its own line.
pub fn wrap(face: &Typeface, px: f32, text: &str, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{} {}", current, word);
        if fits(face.text_width(px, &candidate), max_width) {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Shrink from `start_px` in `step_px` decrements until the wrapped message
/// fits `max_width` x `max_height`, stopping at `min_px`. Text is never
/// truncated; an unfittable message comes back at `min_px` with `overflow` set.
pub fn fit_message(
    face: &Typeface,
    text: &str,
    max_width: f32,
    max_height: f32,
    start_px: f32,
    min_px: f32,
    step_px: f32,
) -> TextLayout {
    let mut px = start_px.max(min_px);
    loop {
        let lines = wrap(face, px, text, max_width);
        let line_height = face.line_height(px);
        let too_wide = lines.iter().any(|l| !fits(face.text_width(px, l), max_width));
        let too_tall = !fits(lines.len() as f32 * line_height, max_height);

        if !too_wide && !too_tall {
            return TextLayout { lines, font_px: px, line_height, overflow: false };
        }
        if px <= min_px {
            return TextLayout { lines, font_px: px, line_height, overflow: true };
        }
        px = (px - step_px).max(min_px);
    }
}

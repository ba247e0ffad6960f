//! Logo presence - best-effort template matching.
//!
//! Zero-mean normalized cross-correlation of the reference logo against the
//! creative, both in grayscale at a reduced working resolution, at the logo's
//! native scale and a few smaller ones. Rotated or heavily restyled logos will
//! not match; treat a failure as a hint, not a verdict.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use std::path::Path;
use tracing::debug;

use super::{CheckResult, ComplianceCheck, Subject};

/// Scales tried relative to the logo's native size.
pub const LOGO_SCALES: &[f64] = &[1.0, 0.75, 0.5, 0.35];

/// Long edge of the creative during matching.
const WORKING_EDGE: u32 = 160;

/// Templates smaller than this on either side carry too little signal.
const MIN_TEMPLATE_EDGE: u32 = 4;

/// A logo bigger than this share of the creative is first shrunk to fit.
const MAX_LOGO_SHARE: f64 = 0.5;
const OVERSIZE_SHRINK: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct LogoTemplate {
    gray: GrayImage,
}

impl LogoTemplate {
    pub fn load(path: &Path) -> Result<Self, image::ImageError> {
        Ok(Self::from_image(&image::open(path)?.to_rgb8()))
    }

    pub fn from_image(img: &RgbImage) -> Self {
        Self { gray: to_gray(img) }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.gray.dimensions()
    }
}

pub struct LogoPresenceCheck {
    template: LogoTemplate,
    threshold: f64,
}

impl LogoPresenceCheck {
    pub fn new(template: LogoTemplate, threshold: f64) -> Self {
        Self { template, threshold }
    }

    /// Best score over all scales, in [-1, 1].
    pub fn best_score(&self, creative: &RgbImage) -> f64 {
        let (cw, ch) = creative.dimensions();
        if cw == 0 || ch == 0 {
            return 0.0;
        }
        let factor = (WORKING_EDGE as f64 / cw.max(ch) as f64).min(1.0);
        let work_w = ((cw as f64 * factor).round() as u32).max(1);
        let work_h = ((ch as f64 * factor).round() as u32).max(1);
        let haystack = imageops::resize(&to_gray(creative), work_w, work_h, FilterType::Triangle);
        let integrals = Integrals::new(&haystack);

        let (lw, lh) = self.template.dimensions();
        let mut base = factor;
        if lw as f64 > cw as f64 * MAX_LOGO_SHARE || lh as f64 > ch as f64 * MAX_LOGO_SHARE {
            base *= (cw as f64 / lw as f64).min(ch as f64 / lh as f64) * OVERSIZE_SHRINK;
        }

        let mut best = 0.0f64;
        for scale in LOGO_SCALES {
            let tw = (lw as f64 * base * scale).round() as u32;
            let th = (lh as f64 * base * scale).round() as u32;
            if tw < MIN_TEMPLATE_EDGE || th < MIN_TEMPLATE_EDGE || tw > work_w || th > work_h {
                continue;
            }
            let needle = imageops::resize(&self.template.gray, tw, th, FilterType::Triangle);
            let score = match_template(&haystack, &integrals, &needle);
            debug!(scale, width = tw, height = th, score, "Logo match at scale");
            best = best.max(score);
        }
        best
    }
}

impl ComplianceCheck for LogoPresenceCheck {
    fn name(&self) -> &'static str {
        "logo_presence"
    }

    fn evaluate(&self, subject: &Subject<'_>) -> CheckResult {
        let Some(img) = subject.image else {
            return CheckResult::fail(self.name(), "creative could not be decoded");
        };
        let score = self.best_score(img);
        if score > self.threshold {
            CheckResult::pass(self.name(), format!("logo detected (score {:.2})", score)).with_metric(score)
        } else {
            CheckResult::fail(
                self.name(),
                format!("logo not detected (score {:.2}, threshold {:.2})", score, self.threshold),
            )
            .with_metric(score)
        }
    }
}

fn to_gray(img: &RgbImage) -> GrayImage {
    imageops::grayscale(img)
}

/// Summed-area tables of pixel values and squared values.
struct Integrals {
    width: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integrals {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = img.get_pixel(x as u32, y as u32).0[0] as f64;
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }
        Self { width: w, sum, sq }
    }

    fn window(&self, table: &[f64], x: usize, y: usize, w: usize, h: usize) -> f64 {
        let s = self.width + 1;
        table[(y + h) * s + x + w] - table[y * s + x + w] - table[(y + h) * s + x] + table[y * s + x]
    }
}

/// Maximum zero-mean normalized cross-correlation over all placements.
/// Flat windows or a flat template score 0.
fn match_template(haystack: &GrayImage, integrals: &Integrals, needle: &GrayImage) -> f64 {
    let (hw, hh) = (haystack.width() as usize, haystack.height() as usize);
    let (nw, nh) = (needle.width() as usize, needle.height() as usize);
    let n = (nw * nh) as f64;

    let values: Vec<f64> = needle.pixels().map(|p| p.0[0] as f64).collect();
    let mean = values.iter().sum::<f64>() / n;
    let centered: Vec<f64> = values.iter().map(|v| v - mean).collect();
    let needle_energy: f64 = centered.iter().map(|v| v * v).sum();
    if needle_energy <= f64::EPSILON {
        return 0.0;
    }

    let raw = haystack.as_raw();
    let mut best = 0.0f64;
    for y in 0..=(hh - nh) {
        for x in 0..=(hw - nw) {
            let s = integrals.window(&integrals.sum, x, y, nw, nh);
            let sq = integrals.window(&integrals.sq, x, y, nw, nh);
            let window_energy = sq - s * s / n;
            if window_energy <= 1e-6 {
                continue;
            }
            let mut cross = 0.0;
            for ty in 0..nh {
                let row = (y + ty) * hw + x;
                let trow = ty * nw;
                for tx in 0..nw {
                    cross += raw[row + tx] as f64 * centered[trow + tx];
                }
            }
            let score = cross / (window_energy * needle_energy).sqrt();
            if score > best {
                best = score;
            }
        }
    }
    best.min(1.0)
}

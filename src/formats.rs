//! Format System - Aspect Ratios and Canonical Buckets
//!
//! Every aspect ratio maps to exactly one canonical output size. The renderer
//! produces it, the compliance engine checks for it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Short side of every canonical bucket.
pub const BASE_RESOLUTION: u32 = 1024;

/// Ratios more elongated than this (long:short) are rejected.
pub const MAX_ELONGATION: u32 = 8;

pub const DEFAULT_ASPECT_RATIOS: &[&str] = &["1:1", "9:16", "16:9"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Malformed aspect ratio '{0}' (expected W:H)")]
    Malformed(String),

    #[error("Aspect ratio '{0}' has a zero component")]
    ZeroComponent(String),

    #[error("Aspect ratio '{0}' exceeds {MAX_ELONGATION}:1 elongation")]
    TooElongated(String),
}

/// A width:height ratio stored as a reduced fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AspectRatio {
    width: u32,
    height: u32,
}

impl AspectRatio {
    pub fn new(width: u32, height: u32) -> Result<Self, FormatError> {
        let label = format!("{}:{}", width, height);
        if width == 0 || height == 0 {
            return Err(FormatError::ZeroComponent(label));
        }
        let g = gcd(width, height);
        let (w, h) = (width / g, height / g);
        if w.max(h) > w.min(h).saturating_mul(MAX_ELONGATION) {
            return Err(FormatError::TooElongated(label));
        }
        Ok(Self { width: w, height: h })
    }

    pub fn parse(input: &str) -> Result<Self, FormatError> {
        let malformed = || FormatError::Malformed(input.to_string());
        let (w, h) = input.trim().split_once(':').ok_or_else(malformed)?;
        let w: u32 = w.trim().parse().map_err(|_| malformed())?;
        let h: u32 = h.trim().parse().map_err(|_| malformed())?;
        Self::new(w, h)
    }

    /// Parse a list, failing on the first bad entry. Duplicates are dropped,
    /// first occurrence keeps its position.
    pub fn parse_list<S: AsRef<str>>(entries: &[S]) -> Result<Vec<Self>, FormatError> {
        let mut out: Vec<Self> = Vec::with_capacity(entries.len());
        for entry in entries {
            let ratio = Self::parse(entry.as_ref())?;
            if !out.contains(&ratio) {
                out.push(ratio);
            }
        }
        Ok(out)
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }

    pub fn as_f64(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Directory-safe form: `9:16` -> `9x16`.
    pub fn slug(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for AspectRatio {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AspectRatio {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSize {
    pub width: u32,
    pub height: u32,
}

impl CanonicalSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bucket rule: short side is `BASE_RESOLUTION`, long side scales and floors.
    pub fn derive(ratio: AspectRatio) -> Self {
        let (w, h) = (ratio.width() as u64, ratio.height() as u64);
        let base = BASE_RESOLUTION as u64;
        if w >= h {
            Self::new((base * w / h) as u32, BASE_RESOLUTION)
        } else {
            Self::new(BASE_RESOLUTION, (base * h / w) as u32)
        }
    }
}

impl fmt::Display for CanonicalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Format registry - fixed canonical buckets per ratio
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    buckets: HashMap<AspectRatio, CanonicalSize>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self { buckets: HashMap::new() }
    }

    /// Registry preloaded with the standard social buckets.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for (w, h, size) in [
            (1, 1, CanonicalSize::new(1024, 1024)),
            (9, 16, CanonicalSize::new(1024, 1820)),
            (16, 9, CanonicalSize::new(1820, 1024)),
            (4, 5, CanonicalSize::new(1024, 1280)),
        ] {
            if let Ok(ratio) = AspectRatio::new(w, h) {
                registry.register(ratio, size);
            }
        }
        registry
    }

    pub fn register(&mut self, ratio: AspectRatio, size: CanonicalSize) {
        self.buckets.insert(ratio, size);
    }

    /// Registered bucket, or the derived one for unregistered ratios.
    pub fn bucket(&self, ratio: AspectRatio) -> CanonicalSize {
        self.buckets
            .get(&ratio)
            .copied()
            .unwrap_or_else(|| CanonicalSize::derive(ratio))
    }

    pub fn list(&self) -> Vec<(AspectRatio, CanonicalSize)> {
        let mut all: Vec<_> = self.buckets.iter().map(|(r, s)| (*r, *s)).collect();
        all.sort_by_key(|(r, _)| *r);
        all
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Crop window in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest centered window of `ratio` inside a `src_w` x `src_h` image.
///
/// Wider sources keep full height, otherwise full width is kept. Offsets are
/// floored.
pub fn center_crop(src_w: u32, src_h: u32, ratio: AspectRatio) -> CropRect {
    let (w, h) = (src_w as u64, src_h as u64);
    let (rw, rh) = (ratio.width() as u64, ratio.height() as u64);

    let (crop_w, crop_h) = if w * rh > h * rw {
        ((h * rw / rh).max(1), h)
    } else {
        (w, (w * rh / rw).max(1))
    };

    CropRect {
        x: ((w - crop_w) / 2) as u32,
        y: ((h - crop_h) / 2) as u32,
        width: crop_w as u32,
        height: crop_h as u32,
    }
}

//! Color Utilities - Brand Palette Math
//!
//! Pure functions only. No state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid hex color: {0}")]
pub struct ColorParseError(pub String);

/// 8-bit RGB triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);

    /// Parse `#RRGGBB`, `RRGGBB` or the short `#RGB` form.
    pub fn from_hex(input: &str) -> Result<Self, ColorParseError> {
        let trimmed = input.trim();
        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);

        let expanded: String = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect(),
            6 => hex.to_string(),
            _ => return Err(ColorParseError(input.to_string())),
        };

        if !expanded.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColorParseError(input.to_string()));
        }

        let channel = |i: usize| {
            u8::from_str_radix(&expanded[i..i + 2], 16)
                .map_err(|_| ColorParseError(input.to_string()))
        };

        Ok(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }

    /// Euclidean distance in RGB space. Range is 0.0 ..= ~441.67.
    pub fn distance(self, other: Rgb) -> f64 {
        let dr = self.0 as f64 - other.0 as f64;
        let dg = self.1 as f64 - other.1 as f64;
        let db = self.2 as f64 - other.2 as f64;
        (dr * dr + dg * dg + db * db).sqrt()
    }

    pub fn to_rgba(self, alpha: u8) -> image::Rgba<u8> {
        image::Rgba([self.0, self.1, self.2, alpha])
    }
}

impl From<image::Rgb<u8>> for Rgb {
    fn from(p: image::Rgb<u8>) -> Self {
        Rgb(p.0[0], p.0[1], p.0[2])
    }
}

impl FromStr for Rgb {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rgb::from_hex(s)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Smallest distance from `color` to any palette entry, with the winning entry.
pub fn nearest(color: Rgb, palette: &[Rgb]) -> Option<(Rgb, f64)> {
    palette
        .iter()
        .map(|p| (*p, color.distance(*p)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Parse a list of hex strings, failing on the first bad entry.
pub fn parse_palette<S: AsRef<str>>(entries: &[S]) -> Result<Vec<Rgb>, ColorParseError> {
    entries
        .iter()
        .map(|e| e.as_ref())
        .filter(|e| !e.trim().is_empty())
        .map(Rgb::from_hex)
        .collect()
}

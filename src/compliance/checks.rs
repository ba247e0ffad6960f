//! Concrete checks.

use super::{CheckResult, ComplianceCheck, Subject};
use crate::color::{nearest, Rgb};

/// Sample grid edge for the brand-color check (GRID x GRID points).
pub const COLOR_SAMPLE_GRID: u32 = 16;

pub struct ResolutionCheck;

impl ComplianceCheck for ResolutionCheck {
    fn name(&self) -> &'static str {
        "resolution"
    }

    fn evaluate(&self, subject: &Subject<'_>) -> CheckResult {
        let expected = subject.expected_size;
        let Some(img) = subject.image else {
            return CheckResult::fail(self.name(), "creative could not be decoded");
        };
        let (w, h) = img.dimensions();
        if (w, h) == (expected.width, expected.height) {
            CheckResult::pass(self.name(), format!("{}x{} matches {} bucket", w, h, subject.aspect_ratio))
        } else {
            CheckResult::fail(
                self.name(),
                format!("{}x{} does not match {} bucket {}", w, h, subject.aspect_ratio, expected),
            )
        }
    }
}

pub struct BrandColorCheck {
    palette: Vec<Rgb>,
    tolerance: f64,
}

impl BrandColorCheck {
    pub fn new(palette: Vec<Rgb>, tolerance: f64) -> Self {
        Self { palette, tolerance }
    }
}

impl ComplianceCheck for BrandColorCheck {
    fn name(&self) -> &'static str {
        "brand_colors"
    }

    /// Metric: smallest distance from any sampled pixel to any palette color.
    fn evaluate(&self, subject: &Subject<'_>) -> CheckResult {
        let Some(img) = subject.image else {
            return CheckResult::fail(self.name(), "creative could not be decoded");
        };
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return CheckResult::fail(self.name(), "creative is empty");
        }

        let mut best: Option<(Rgb, f64)> = None;
        for gy in 0..COLOR_SAMPLE_GRID {
            let y = ((2 * gy + 1) as u64 * h as u64 / (2 * COLOR_SAMPLE_GRID) as u64) as u32;
            for gx in 0..COLOR_SAMPLE_GRID {
                let x = ((2 * gx + 1) as u64 * w as u64 / (2 * COLOR_SAMPLE_GRID) as u64) as u32;
                let sample = Rgb::from(*img.get_pixel(x, y));
                if let Some((brand, d)) = nearest(sample, &self.palette) {
                    if best.map_or(true, |(_, b)| d < b) {
                        best = Some((brand, d));
                    }
                }
            }
        }

        match best {
            Some((brand, d)) if d <= self.tolerance => CheckResult::pass(
                self.name(),
                format!("found {} within distance {:.1} (tolerance {:.1})", brand, d, self.tolerance),
            )
            .with_metric(d),
            Some((brand, d)) => CheckResult::fail(
                self.name(),
                format!("closest brand color {} at distance {:.1} exceeds tolerance {:.1}", brand, d, self.tolerance),
            )
            .with_metric(d),
            None => CheckResult::fail(self.name(), "no brand palette configured"),
        }
    }
}

pub struct ProhibitedWordCheck {
    words: Vec<String>,
}

impl ProhibitedWordCheck {
    pub fn new<S: AsRef<str>>(words: &[S]) -> Self {
        Self {
            words: words
                .iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }
}

impl ComplianceCheck for ProhibitedWordCheck {
    fn name(&self) -> &'static str {
        "prohibited_words"
    }

    fn evaluate(&self, subject: &Subject<'_>) -> CheckResult {
        let haystack = subject.message.to_lowercase();
        let found: Vec<&str> = self
            .words
            .iter()
            .filter(|w| haystack.contains(w.as_str()))
            .map(String::as_str)
            .collect();

        if found.is_empty() {
            CheckResult::pass(self.name(), "no prohibited words found")
        } else {
            CheckResult::fail(self.name(), format!("found prohibited words: {}", found.join(", ")))
                .with_metric(found.len() as f64)
        }
    }
}

pub struct MessageLengthCheck {
    max_chars: usize,
}

impl MessageLengthCheck {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl ComplianceCheck for MessageLengthCheck {
    fn name(&self) -> &'static str {
        "message_length"
    }

    fn evaluate(&self, subject: &Subject<'_>) -> CheckResult {
        let len = subject.message.chars().count();
        let result = if len >= self.max_chars {
            CheckResult::fail(self.name(), format!("{} chars, limit is below {}", len, self.max_chars))
        } else if subject.message_overflow {
            CheckResult::fail(self.name(), format!("{} chars do not fit the overlay at minimum font size", len))
        } else {
            CheckResult::pass(self.name(), format!("{} chars", len))
        };
        result.with_metric(len as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{AspectRatio, CanonicalSize};
    use image::{Rgb as Px, RgbImage};

    fn subject<'a>(image: Option<&'a RgbImage>, message: &'a str, overflow: bool) -> Subject<'a> {
        Subject {
            image,
            aspect_ratio: AspectRatio::parse("16:9").unwrap(),
            expected_size: CanonicalSize::new(32, 18),
            message,
            message_overflow: overflow,
        }
    }

    #[test]
    fn test_resolution_exact_match_only() {
        let ok = RgbImage::new(32, 18);
        let off_by_one = RgbImage::new(32, 17);
        assert!(ResolutionCheck.evaluate(&subject(Some(&ok), "", false)).passed);
        assert!(!ResolutionCheck.evaluate(&subject(Some(&off_by_one), "", false)).passed);
    }

    #[test]
    fn test_brand_color_metric_is_min_distance() {
        let mut img = RgbImage::from_pixel(32, 18, Px([0, 0, 200]));
        // one grid sample point is near red
        img.put_pixel(1, 0, Px([250, 0, 0]));
        let check = BrandColorCheck::new(vec![Rgb(255, 0, 0)], 30.0);
        let result = check.evaluate(&subject(Some(&img), "", false));
        assert!(result.passed);
        assert_eq!(result.metric, Some(5.0));
    }

    #[test]
    fn test_brand_color_fails_beyond_tolerance() {
        let img = RgbImage::from_pixel(32, 18, Px([0, 0, 200]));
        let check = BrandColorCheck::new(vec![Rgb(255, 0, 0)], 30.0);
        let result = check.evaluate(&subject(Some(&img), "", false));
        assert!(!result.passed);
        assert!(result.metric.unwrap() > 30.0);
    }

    #[test]
    fn test_prohibited_words_case_insensitive() {
        let check = ProhibitedWordCheck::new(&["guarantee", "cure"]);
        let result = check.evaluate(&subject(None, "This is a GUARANTEE", false));
        assert!(!result.passed);
        assert!(result.reason.contains("guarantee"));
        assert!(check.evaluate(&subject(None, "Summer sale", false)).passed);
    }

    #[test]
    fn test_prohibited_words_substring() {
        let check = ProhibitedWordCheck::new(&["free"]);
        assert!(!check.evaluate(&subject(None, "Carefree days", false)).passed);
    }

    #[test]
    fn test_message_length_limit_and_overflow() {
        let check = MessageLengthCheck::new(10);
        assert!(check.evaluate(&subject(None, "short", false)).passed);
        assert!(!check.evaluate(&subject(None, "exactly 10", false)).passed);
        assert!(!check.evaluate(&subject(None, "short", true)).passed);
    }
}

//! Compliance Engine - Checks Advise, Never Block
//!
//! Each check produces a named pass/fail result with a reason.
//! The engine runs every enabled check on every creative; nothing short-circuits
//! and nothing here can fail the pipeline.

pub mod checks;
pub mod logo;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::brief::BrandGuidelines;
use crate::color::{parse_palette, Rgb};
use crate::config::PipelineConfig;
use crate::formats::{AspectRatio, CanonicalSize};

pub use checks::{BrandColorCheck, MessageLengthCheck, ProhibitedWordCheck, ResolutionCheck};
pub use logo::{LogoPresenceCheck, LogoTemplate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
}

impl CheckResult {
    pub fn pass(name: &str, reason: impl Into<String>) -> Self {
        Self { name: name.to_string(), passed: true, reason: reason.into(), metric: None }
    }

    pub fn fail(name: &str, reason: impl Into<String>) -> Self {
        Self { name: name.to_string(), passed: false, reason: reason.into(), metric: None }
    }

    pub fn with_metric(mut self, metric: f64) -> Self {
        self.metric = Some(metric);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub product_id: String,
    pub aspect_ratio: AspectRatio,
    pub passed: bool,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub checks: Vec<CheckResult>,
}

impl ComplianceReport {
    pub fn new(product_id: &str, aspect_ratio: AspectRatio, checks: Vec<CheckResult>) -> Self {
        let passed_checks = checks.iter().filter(|c| c.passed).count();
        let total_checks = checks.len();
        Self {
            product_id: product_id.to_string(),
            aspect_ratio,
            passed: passed_checks == total_checks,
            total_checks,
            passed_checks,
            failed_checks: total_checks - passed_checks,
            checks,
        }
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Everything a check may look at for one creative.
pub struct Subject<'a> {
    /// `None` when the creative bytes could not be decoded.
    pub image: Option<&'a RgbImage>,
    pub aspect_ratio: AspectRatio,
    pub expected_size: CanonicalSize,
    pub message: &'a str,
    /// The renderer hit its minimum font size and the message still did not fit.
    pub message_overflow: bool,
}

pub trait ComplianceCheck: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, subject: &Subject<'_>) -> CheckResult;
}

/// Thresholds and lists the checks are built from.
#[derive(Debug, Clone)]
pub struct ComplianceRules {
    pub brand_palette: Vec<Rgb>,
    pub color_tolerance: f64,
    pub prohibited_words: Vec<String>,
    pub max_message_length: usize,
    pub logo_path: Option<PathBuf>,
    pub logo_match_threshold: f64,
}

impl ComplianceRules {
    /// Palette is the configured brand colors plus any valid colors the
    /// brief's guidelines name. Unparsable entries are logged and skipped.
    pub fn from_config(config: &PipelineConfig, guidelines: &BrandGuidelines) -> Self {
        let mut palette = Vec::new();
        let extra = [guidelines.primary_color.as_deref(), guidelines.secondary_color.as_deref()];
        for entry in config.brand_colors.iter().map(String::as_str).chain(extra.into_iter().flatten()) {
            match parse_palette(&[entry]) {
                Ok(colors) => {
                    for c in colors {
                        if !palette.contains(&c) {
                            palette.push(c);
                        }
                    }
                }
                Err(e) => warn!(color = entry, error = %e, "Ignoring invalid brand color"),
            }
        }

        Self {
            brand_palette: palette,
            color_tolerance: config.color_tolerance,
            prohibited_words: config.prohibited_words.clone(),
            max_message_length: config.max_message_length,
            logo_path: config.brand_logo_path.clone(),
            logo_match_threshold: config.logo_match_threshold,
        }
    }
}

/// What the pipeline knows about a creative besides its bytes.
#[derive(Debug, Clone)]
pub struct CreativeContext<'a> {
    pub product_id: &'a str,
    pub aspect_ratio: AspectRatio,
    pub expected_size: CanonicalSize,
    pub message: &'a str,
    pub message_overflow: bool,
}

pub struct ComplianceEngine {
    checks: Vec<Box<dyn ComplianceCheck>>,
}

impl ComplianceEngine {
    pub fn empty() -> Self {
        Self { checks: Vec::new() }
    }

    /// Standard check set. Brand color runs only with a non-empty palette;
    /// logo presence only when a reference logo is configured and loads.
    pub fn new(rules: &ComplianceRules) -> Self {
        let mut engine = Self::empty();
        engine.add_check(Box::new(ResolutionCheck));

        if !rules.brand_palette.is_empty() {
            engine.add_check(Box::new(BrandColorCheck::new(rules.brand_palette.clone(), rules.color_tolerance)));
        }

        if let Some(path) = &rules.logo_path {
            match LogoTemplate::load(path) {
                Ok(template) => engine.add_check(Box::new(LogoPresenceCheck::new(template, rules.logo_match_threshold))),
                Err(e) => warn!(path = %path.display(), error = %e, "Reference logo unavailable, logo check skipped"),
            }
        }

        engine.add_check(Box::new(ProhibitedWordCheck::new(&rules.prohibited_words)));
        engine.add_check(Box::new(MessageLengthCheck::new(rules.max_message_length)));
        engine
    }

    pub fn add_check(&mut self, check: Box<dyn ComplianceCheck>) {
        self.checks.push(check);
    }

    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn evaluate(&self, creative: &[u8], ctx: &CreativeContext<'_>) -> ComplianceReport {
        let decoded = match image::load_from_memory(creative) {
            Ok(img) => Some(img.to_rgb8()),
            Err(e) => {
                warn!(product_id = ctx.product_id, aspect_ratio = %ctx.aspect_ratio, error = %e, "Creative could not be decoded for compliance");
                None
            }
        };
        self.evaluate_image(decoded.as_ref(), ctx)
    }

    pub fn evaluate_image(&self, image: Option<&RgbImage>, ctx: &CreativeContext<'_>) -> ComplianceReport {
        let subject = Subject {
            image,
            aspect_ratio: ctx.aspect_ratio,
            expected_size: ctx.expected_size,
            message: ctx.message,
            message_overflow: ctx.message_overflow,
        };

        let results: Vec<CheckResult> = self.checks.iter().map(|c| c.evaluate(&subject)).collect();
        let report = ComplianceReport::new(ctx.product_id, ctx.aspect_ratio, results);
        debug!(
            product_id = ctx.product_id,
            aspect_ratio = %ctx.aspect_ratio,
            passed = report.passed_checks,
            failed = ?report.failures().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Compliance evaluated"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb as Px;

    fn ctx<'a>(message: &'a str, size: CanonicalSize) -> CreativeContext<'a> {
        CreativeContext {
            product_id: "p1",
            aspect_ratio: AspectRatio::parse("1:1").unwrap(),
            expected_size: size,
            message,
            message_overflow: false,
        }
    }

    fn rules() -> ComplianceRules {
        ComplianceRules {
            brand_palette: vec![Rgb(255, 0, 0)],
            color_tolerance: 30.0,
            prohibited_words: vec!["guarantee".into()],
            max_message_length: 200,
            logo_path: None,
            logo_match_threshold: 0.4,
        }
    }

    #[test]
    fn test_counts_add_up() {
        let engine = ComplianceEngine::new(&rules());
        let img = RgbImage::from_pixel(8, 8, Px([0, 0, 255]));
        let report = engine.evaluate_image(Some(&img), &ctx("This is a GUARANTEE", CanonicalSize::new(8, 8)));

        assert_eq!(report.total_checks, 4);
        assert_eq!(report.passed_checks + report.failed_checks, report.total_checks);
        assert!(!report.passed);
        assert!(!report.check("prohibited_words").unwrap().passed);
        assert!(!report.check("brand_colors").unwrap().passed);
        assert!(report.check("resolution").unwrap().passed);
    }

    #[test]
    fn test_all_checks_run_on_undecodable_creative() {
        let engine = ComplianceEngine::new(&rules());
        let report = engine.evaluate(b"garbage", &ctx("Fresh deals", CanonicalSize::new(8, 8)));
        assert_eq!(report.total_checks, 4);
        assert!(!report.check("resolution").unwrap().passed);
        assert!(report.check("prohibited_words").unwrap().passed);
        assert!(report.check("message_length").unwrap().passed);
    }

    #[test]
    fn test_missing_logo_is_skipped_not_failed() {
        let mut r = rules();
        r.logo_path = Some(PathBuf::from("/definitely/not/here/logo.png"));
        let engine = ComplianceEngine::new(&r);
        assert!(!engine.check_names().contains(&"logo_presence"));
    }

    #[test]
    fn test_loaded_logo_adds_fifth_check() {
        let dir = tempfile::tempdir().unwrap();
        let logo_path = dir.path().join("logo.png");
        RgbImage::from_fn(16, 16, |x, y| if (x / 4 + y / 4) % 2 == 0 { Px([0, 0, 0]) } else { Px([255, 255, 255]) })
            .save(&logo_path)
            .unwrap();

        let mut r = rules();
        r.logo_path = Some(logo_path);
        let engine = ComplianceEngine::new(&r);
        assert_eq!(
            engine.check_names(),
            vec!["resolution", "brand_colors", "logo_presence", "prohibited_words", "message_length"]
        );

        let img = RgbImage::from_pixel(64, 64, Px([0, 0, 255]));
        let report = engine.evaluate_image(Some(&img), &ctx("Fresh deals", CanonicalSize::new(64, 64)));
        assert_eq!(report.total_checks, 5);
        assert_eq!(report.passed_checks + report.failed_checks, 5);
        assert!(!report.check("logo_presence").unwrap().passed);
        let failed: Vec<_> = report.failures().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["brand_colors", "logo_presence"]);
    }

    #[test]
    fn test_empty_palette_disables_color_check() {
        let mut r = rules();
        r.brand_palette.clear();
        let engine = ComplianceEngine::new(&r);
        assert_eq!(engine.check_names(), vec!["resolution", "prohibited_words", "message_length"]);
    }

    #[test]
    fn test_rules_merge_brief_colors() {
        let mut config = PipelineConfig::for_output("/tmp/out");
        config.brand_colors = vec!["#FF0000".into(), "nonsense".into()];
        let guidelines = BrandGuidelines {
            primary_color: Some("#00FF00".into()),
            secondary_color: Some("#FF0000".into()),
            ..Default::default()
        };
        let rules = ComplianceRules::from_config(&config, &guidelines);
        assert_eq!(rules.brand_palette, vec![Rgb(255, 0, 0), Rgb(0, 255, 0)]);
    }
}

//! Pipeline Configuration
//!
//! One explicit struct handed to the pipeline at construction. Nothing here is
//! global; `from_env` is a convenience for the CLI.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::formats::DEFAULT_ASPECT_RATIOS;

/// Sizes the remote image service accepts.
pub const SUPPORTED_IMAGE_SIZES: &[&str] =
    &["256x256", "512x512", "1024x1024", "1024x1792", "1792x1024"];

pub const DEFAULT_BRAND_COLORS: &[&str] = &["#FF0000", "#FFFFFF", "#000000"];
pub const DEFAULT_PROHIBITED_WORDS: &[&str] = &["guarantee", "cure", "miracle", "free"];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },

    #[error("Unsupported image size '{0}' (expected one of {SUPPORTED_IMAGE_SIZES:?})")]
    UnsupportedImageSize(String),

    #[error("GENERATION_MODE=remote requires OPENAI_API_KEY")]
    MissingApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Paid remote service only.
    Remote,
    /// Local placeholder only.
    Mock,
    /// Remote when credentials and connectivity check out, else placeholder.
    Auto,
}

impl FromStr for GenerationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "mock" | "local" => Ok(Self::Mock),
            "auto" => Ok(Self::Auto),
            other => Err(ConfigError::Invalid {
                key: "GENERATION_MODE".into(),
                value: other.into(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub asset_root: PathBuf,
    pub output_root: PathBuf,

    pub api_key: Option<String>,
    pub api_base_url: String,
    pub image_model: String,
    pub image_size: String,
    pub image_quality: String,
    pub generation_mode: GenerationMode,
    pub generation_timeout: Duration,

    pub aspect_ratios: Vec<String>,
    pub brand_colors: Vec<String>,
    pub brand_logo_path: Option<PathBuf>,
    pub prohibited_words: Vec<String>,
    pub max_message_length: usize,
    pub color_tolerance: f64,
    pub logo_match_threshold: f64,

    pub jpeg_quality: u8,
    pub overlay_opacity: f32,
    pub font_path: Option<PathBuf>,

    pub workers: usize,
    /// Translation key used for the overlay message.
    pub language: Option<String>,
    pub log_level: String,
}

impl PipelineConfig {
    /// Defaults rooted at the given output directory; assets live beside it.
    pub fn for_output(output_root: impl Into<PathBuf>) -> Self {
        let output_root = output_root.into();
        let asset_root = output_root
            .parent()
            .map(|p| p.join("assets"))
            .unwrap_or_else(|| PathBuf::from("assets"));

        Self {
            asset_root,
            output_root,
            api_key: None,
            api_base_url: "https://api.openai.com/v1".into(),
            image_model: "dall-e-3".into(),
            image_size: "1024x1024".into(),
            image_quality: "standard".into(),
            generation_mode: GenerationMode::Auto,
            generation_timeout: Duration::from_secs(60),
            aspect_ratios: to_strings(DEFAULT_ASPECT_RATIOS),
            brand_colors: to_strings(DEFAULT_BRAND_COLORS),
            brand_logo_path: None,
            prohibited_words: to_strings(DEFAULT_PROHIBITED_WORDS),
            max_message_length: 200,
            color_tolerance: 30.0,
            logo_match_threshold: 0.4,
            jpeg_quality: 95,
            overlay_opacity: 0.7,
            font_path: None,
            workers: 4,
            language: None,
            log_level: "info".into(),
        }
    }

    /// Load from the process environment (after reading `.env` if present).
    ///
    /// | Env Var                   | Default                          |
    /// |---------------------------|----------------------------------|
    /// | `ASSET_STORAGE_PATH`      | `assets`                         |
    /// | `OUTPUT_PATH`             | `output`                         |
    /// | `OPENAI_API_KEY`          | unset                            |
    /// | `OPENAI_BASE_URL`         | `https://api.openai.com/v1`      |
    /// | `IMAGE_MODEL`             | `dall-e-3`                       |
    /// | `IMAGE_SIZE`              | `1024x1024`                      |
    /// | `IMAGE_QUALITY`           | `standard`                       |
    /// | `GENERATION_MODE`         | `auto`                           |
    /// | `GENERATION_TIMEOUT_SECS` | `60`                             |
    /// | `ASPECT_RATIOS`           | `1:1,9:16,16:9`                  |
    /// | `BRAND_COLORS`            | `#FF0000,#FFFFFF,#000000`        |
    /// | `BRAND_LOGO_PATH`         | `{assets}/brand/logo.png` if present |
    /// | `PROHIBITED_WORDS`        | `guarantee,cure,miracle,free`    |
    /// | `MAX_MESSAGE_LENGTH`      | `200`                            |
    /// | `COLOR_TOLERANCE`         | `30.0`                           |
    /// | `LOGO_MATCH_THRESHOLD`    | `0.4`                            |
    /// | `JPEG_QUALITY`            | `95`                             |
    /// | `OVERLAY_OPACITY`         | `0.7`                            |
    /// | `FONT_PATH`               | unset                            |
    /// | `WORKERS`                 | `4`                              |
    /// | `LANGUAGE`                | unset                            |
    /// | `LOG_LEVEL`               | `info`                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let asset_root = PathBuf::from(get("ASSET_STORAGE_PATH").unwrap_or_else(|| "assets".into()));
        let output_root = PathBuf::from(get("OUTPUT_PATH").unwrap_or_else(|| "output".into()));

        let mut config = Self::for_output(output_root);
        config.asset_root = asset_root;

        config.api_key = get("OPENAI_API_KEY");
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = get("IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Some(size) = get("IMAGE_SIZE") {
            config.image_size = size;
        }
        if let Some(quality) = get("IMAGE_QUALITY") {
            config.image_quality = quality;
        }
        if let Some(mode) = get("GENERATION_MODE") {
            config.generation_mode = mode.parse()?;
        }
        if let Some(secs) = get("GENERATION_TIMEOUT_SECS") {
            config.generation_timeout = Duration::from_secs(parse_value("GENERATION_TIMEOUT_SECS", &secs)?);
        }

        if let Some(list) = get("ASPECT_RATIOS") {
            config.aspect_ratios = split_list(&list);
        }
        if let Some(list) = get("BRAND_COLORS") {
            config.brand_colors = split_list(&list);
        }
        if let Some(list) = get("PROHIBITED_WORDS") {
            config.prohibited_words = split_list(&list);
        }

        config.brand_logo_path = match get("BRAND_LOGO_PATH") {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let conventional = config.asset_root.join("brand").join("logo.png");
                conventional.exists().then_some(conventional)
            }
        };

        if let Some(v) = get("MAX_MESSAGE_LENGTH") {
            config.max_message_length = parse_value("MAX_MESSAGE_LENGTH", &v)?;
        }
        if let Some(v) = get("COLOR_TOLERANCE") {
            config.color_tolerance = parse_value("COLOR_TOLERANCE", &v)?;
        }
        if let Some(v) = get("LOGO_MATCH_THRESHOLD") {
            config.logo_match_threshold = parse_value("LOGO_MATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = get("JPEG_QUALITY") {
            config.jpeg_quality = parse_value("JPEG_QUALITY", &v)?;
        }
        if let Some(v) = get("OVERLAY_OPACITY") {
            config.overlay_opacity = parse_value("OVERLAY_OPACITY", &v)?;
        }
        config.font_path = get("FONT_PATH").map(PathBuf::from);
        if let Some(v) = get("WORKERS") {
            config.workers = parse_value("WORKERS", &v)?;
        }
        config.language = get("LANGUAGE");
        if let Some(level) = get("LOG_LEVEL") {
            config.log_level = level.to_ascii_lowercase();
        }

        config.validate()?;
        Ok(config)
    }

    /// Range checks that do not depend on the brief.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_IMAGE_SIZES.contains(&self.image_size.as_str()) {
            return Err(ConfigError::UnsupportedImageSize(self.image_size.clone()));
        }
        if self.workers == 0 {
            return Err(invalid("WORKERS", "0"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(invalid("JPEG_QUALITY", &self.jpeg_quality.to_string()));
        }
        if !(0.0..=1.0).contains(&self.overlay_opacity) {
            return Err(invalid("OVERLAY_OPACITY", &self.overlay_opacity.to_string()));
        }
        if !(0.0..=1.0).contains(&self.logo_match_threshold) {
            return Err(invalid("LOGO_MATCH_THRESHOLD", &self.logo_match_threshold.to_string()));
        }
        if self.color_tolerance < 0.0 {
            return Err(invalid("COLOR_TOLERANCE", &self.color_tolerance.to_string()));
        }
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// `(width, height)` parsed from `image_size`.
    pub fn image_dimensions(&self) -> Result<(u32, u32), ConfigError> {
        parse_size(&self.image_size).ok_or_else(|| ConfigError::UnsupportedImageSize(self.image_size.clone()))
    }
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.trim().split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

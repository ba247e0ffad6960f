//! Generation Gateway - One Capability, Two Backends
//!
//! `ImageGenerator::generate` is the only way product imagery gets created.
//! The backend is picked once per run (`select`), never per call; the single
//! exception is `FallbackGenerator` in auto mode, which records every switch.

pub mod local;
pub mod remote;
pub mod select;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::brief::{BrandGuidelines, CampaignBrief, Product};

pub use local::PlaceholderGenerator;
pub use remote::RemoteGenerator;
pub use select::{select_generator, FallbackGenerator, GeneratorSelection};

const MAX_PROMPT_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    Auth,
    Quota,
    Timeout,
    Transport,
    InvalidRequest,
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::Quota => "quota",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::InvalidRequest => "invalid_request",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Image generation failed ({kind}): {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(GenerationErrorKind::Timeout, format!("no response after {:?}", after))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Remote,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub product_id: String,
    pub product_name: String,
    pub prompt: String,
    /// Requested pixel size (width, height).
    pub size: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub backend: Backend,
    /// Set when an auto-mode fallback replaced a failed remote call.
    pub fallback_reason: Option<String>,
}

impl GeneratedImage {
    pub fn new(bytes: Vec<u8>, backend: Backend) -> Self {
        Self { bytes, backend, fallback_reason: None }
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Label for logs and the campaign report.
    fn describe(&self) -> String;

    fn backend(&self) -> Backend;

    /// Produce image bytes for `request`. Implementations must give up after
    /// `timeout` with a `Timeout` error rather than block.
    async fn generate(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<GeneratedImage, GenerationError>;

    /// Cheap reachability probe, used at startup in auto mode.
    async fn check_connection(&self) -> bool;
}

/// Campaign-wide context folded into every prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub target_audience: String,
    pub campaign_message: String,
    pub target_region: String,
    pub brand: BrandGuidelines,
}

impl PromptContext {
    pub fn from_brief(brief: &CampaignBrief) -> Self {
        Self {
            target_audience: brief.target_audience.clone(),
            campaign_message: brief.campaign_message.clone(),
            target_region: brief.target_region.clone(),
            brand: brief.brand(),
        }
    }

    pub fn request_for(&self, product: &Product, size: (u32, u32)) -> GenerationRequest {
        GenerationRequest {
            product_id: product.product_id.clone(),
            product_name: product.product_name.clone(),
            prompt: build_prompt(product, self),
            size,
        }
    }
}

pub fn build_prompt(product: &Product, ctx: &PromptContext) -> String {
    let mut parts = Vec::new();

    match product.product_description.as_deref().map(str::trim) {
        Some(desc) if !desc.is_empty() => parts.push(format!(
            "A professional marketing photo of {}: {}.",
            product.product_name, desc
        )),
        _ => parts.push(format!("A professional marketing photo of {}.", product.product_name)),
    }

    if !ctx.target_audience.trim().is_empty() {
        parts.push(format!("Designed to appeal to {}.", ctx.target_audience));
    }
    if !ctx.campaign_message.trim().is_empty() {
        parts.push(format!("The image should convey: {}.", ctx.campaign_message));
    }
    if !ctx.target_region.trim().is_empty() {
        parts.push(format!("Culturally appropriate for the {} market.", ctx.target_region));
    }
    if let Some(color) = &ctx.brand.primary_color {
        parts.push(format!("Use {} as a dominant color theme.", color));
    }
    if let Some(style) = &ctx.brand.style {
        parts.push(format!("Style: {}.", style));
    }
    parts.push(
        "High-quality, professional photography, clean composition, commercial advertising style."
            .to_string(),
    );

    let prompt = parts.join(" ");
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        let head: String = prompt.chars().take(MAX_PROMPT_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(desc: Option<&str>) -> Product {
        Product {
            product_id: "p1".into(),
            product_name: "Sun Cream".into(),
            product_description: desc.map(String::from),
            product_image: None,
        }
    }

    #[test]
    fn test_prompt_includes_context() {
        let ctx = PromptContext {
            target_audience: "surfers".into(),
            campaign_message: "Stay bright".into(),
            target_region: "LATAM".into(),
            brand: BrandGuidelines {
                primary_color: Some("#FF6600".into()),
                style: Some("minimal".into()),
                ..Default::default()
            },
        };
        let prompt = build_prompt(&product(Some("SPF 50, reef safe")), &ctx);
        assert!(prompt.starts_with("A professional marketing photo of Sun Cream: SPF 50, reef safe."));
        assert!(prompt.contains("appeal to surfers"));
        assert!(prompt.contains("LATAM market"));
        assert!(prompt.contains("#FF6600"));
        assert!(prompt.contains("Style: minimal."));
    }

    #[test]
    fn test_prompt_without_description() {
        let prompt = build_prompt(&product(None), &PromptContext::default());
        assert!(prompt.starts_with("A professional marketing photo of Sun Cream."));
    }

    #[test]
    fn test_prompt_is_capped() {
        let ctx = PromptContext {
            campaign_message: "x".repeat(5000),
            ..Default::default()
        };
        let prompt = build_prompt(&product(None), &ctx);
        assert_eq!(prompt.chars().count(), MAX_PROMPT_CHARS);
        assert!(prompt.ends_with("..."));
    }

    #[test]
    fn test_error_display() {
        let err = GenerationError::new(GenerationErrorKind::Quota, "insufficient_quota");
        assert_eq!(err.to_string(), "Image generation failed (quota): insufficient_quota");
    }
}

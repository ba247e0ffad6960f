//! Campaign Brief - Declarative Input
//!
//! A brief is parsed once and treated as immutable afterwards. Everything
//! downstream trusts `validate()` to have run.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

use crate::formats::{AspectRatio, DEFAULT_ASPECT_RATIOS};

static SAFE_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static identifier pattern")
});

#[derive(Debug, Error)]
pub enum BriefError {
    #[error("Campaign brief file not found: {0}")]
    NotFound(String),

    #[error("Unsupported brief format '{0}'. Use .json, .yaml or .yml")]
    UnsupportedFormat(String),

    #[error("Failed to read brief: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON brief: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML brief: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Campaign brief validation failed: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignBrief {
    pub campaign_name: String,
    pub products: Vec<Product>,
    pub target_region: String,
    pub target_audience: String,
    pub campaign_message: String,
    #[serde(default)]
    pub brand_guidelines: Option<BrandGuidelines>,
    #[serde(default)]
    pub localization: Option<Localization>,
    #[serde(default)]
    pub aspect_ratios: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub product_name: String,
    #[serde(default)]
    pub product_description: Option<String>,
    /// Explicit source image; bypasses the asset cache when readable.
    #[serde(default)]
    pub product_image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrandGuidelines {
    #[serde(default)]
    pub primary_color: Option<String>,
    #[serde(default)]
    pub secondary_color: Option<String>,
    #[serde(default)]
    pub font_family: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Localization {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
}

impl CampaignBrief {
    /// Load and validate a brief from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: &Path) -> Result<Self, BriefError> {
        if !path.exists() {
            return Err(BriefError::NotFound(path.display().to_string()));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let content = fs::read_to_string(path)?;
        let brief: CampaignBrief = match ext.as_str() {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            other => return Err(BriefError::UnsupportedFormat(other.to_string())),
        };

        brief.validate()?;
        Ok(brief)
    }

    pub fn from_json(content: &str) -> Result<Self, BriefError> {
        let brief: CampaignBrief = serde_json::from_str(content)?;
        brief.validate()?;
        Ok(brief)
    }

    pub fn validate(&self) -> Result<(), BriefError> {
        let invalid = |msg: String| Err(BriefError::Invalid(msg));

        if !SAFE_IDENTIFIER.is_match(&self.campaign_name) {
            return invalid(format!(
                "campaign_name '{}' is not a filesystem-safe identifier",
                self.campaign_name
            ));
        }
        if self.products.is_empty() {
            return invalid("at least one product is required".into());
        }
        for (field, value) in [
            ("target_region", &self.target_region),
            ("target_audience", &self.target_audience),
            ("campaign_message", &self.campaign_message),
        ] {
            if value.trim().is_empty() {
                return invalid(format!("{} must not be empty", field));
            }
        }

        let mut seen = HashSet::new();
        for product in &self.products {
            if !SAFE_IDENTIFIER.is_match(&product.product_id) {
                return invalid(format!(
                    "product_id '{}' is not a filesystem-safe identifier",
                    product.product_id
                ));
            }
            if product.product_name.trim().is_empty() {
                return invalid(format!("product '{}' has an empty product_name", product.product_id));
            }
            if !seen.insert(product.product_id.as_str()) {
                return invalid(format!("duplicate product_id '{}'", product.product_id));
            }
        }

        if let Some(ratios) = &self.aspect_ratios {
            if ratios.is_empty() {
                return invalid("aspect_ratios must not be empty when given".into());
            }
            if let Err(e) = AspectRatio::parse_list(ratios) {
                return invalid(format!("aspect_ratios: {}", e));
            }
        }

        Ok(())
    }

    /// Aspect ratio strings from the brief, or the default set when absent.
    pub fn aspect_ratio_strings(&self) -> Vec<String> {
        self.aspect_ratios
            .clone()
            .unwrap_or_else(|| DEFAULT_ASPECT_RATIOS.iter().map(|s| s.to_string()).collect())
    }

    /// Translated message for `language`, falling back to the base message.
    pub fn localized_message(&self, language: Option<&str>) -> &str {
        language
            .and_then(|lang| self.localization.as_ref()?.translations.get(lang))
            .map(String::as_str)
            .unwrap_or(self.campaign_message.as_str())
    }

    pub fn brand(&self) -> BrandGuidelines {
        self.brand_guidelines.clone().unwrap_or_default()
    }
}

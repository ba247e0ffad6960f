//! ForgeCampaign Core - Creative Campaign Compiler
//!
//! # The Five Laws (Non-Negotiable)
//! 1. Reuse Before Generate
//! 2. One Backend Per Run
//! 3. Buckets Are Exact
//! 4. Compliance Advises, Never Blocks
//! 5. A Run Always Reports

pub mod assets;
pub mod brief;
pub mod color;
pub mod compliance;
pub mod config;
pub mod formats;
pub mod generation;
pub mod hashing;
pub mod logging;
pub mod pipeline;
pub mod render;
pub mod report;

pub use assets::{AssetError, AssetResolver, AssetStore, DiskAssetStore, MemoryAssetStore, Provenance, SourceAsset};
pub use brief::{BrandGuidelines, BriefError, CampaignBrief, Localization, Product};
pub use compliance::{CheckResult, ComplianceCheck, ComplianceEngine, ComplianceReport, ComplianceRules};
pub use config::{ConfigError, GenerationMode, PipelineConfig};
pub use formats::{AspectRatio, CanonicalSize, FormatError, FormatRegistry};
pub use generation::{
    GeneratedImage, GenerationError, GenerationErrorKind, GenerationRequest, ImageGenerator, PromptContext,
};
pub use hashing::{brief_fingerprint, canonical_json, sha256_hex};
pub use pipeline::{CampaignPipeline, PipelineError};
pub use render::{CreativeRenderer, RenderError, RenderedImage};
pub use report::{CampaignReport, ErrorRecord, ErrorStage, OutputLayout, ProductStatus};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

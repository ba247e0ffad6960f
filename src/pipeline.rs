//! Campaign Pipeline - Single Entry Point
//!
//! Brief in, creatives and a report out. Per-product and per-creative failures
//! are recorded, never raised; only configuration problems abort a run.

use chrono::Utc;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::assets::{AssetResolver, AssetStore, DiskAssetStore};
use crate::brief::{BrandGuidelines, CampaignBrief, Product};
use crate::compliance::{ComplianceEngine, ComplianceReport, ComplianceRules, CreativeContext};
use crate::config::{ConfigError, PipelineConfig};
use crate::formats::{AspectRatio, CanonicalSize, FormatRegistry};
use crate::generation::{select_generator, ImageGenerator, PromptContext};
use crate::hashing::brief_fingerprint;
use crate::render::{decode, BrandStyle, CreativeRenderer, OverlaySettings, RenderError, Typeface};
use crate::report::{
    CampaignReport, ComplianceSummary, ErrorRecord, ErrorStage, OutputLayout, ProductStatus, ProductSummary,
};
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Output directory {path} is not writable: {message}")]
    OutputUnwritable { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared, read-only state for one run.
struct RunContext {
    resolver: Arc<AssetResolver>,
    renderer: CreativeRenderer,
    engine: ComplianceEngine,
    layout: OutputLayout,
    prompt: PromptContext,
    message: String,
    style: BrandStyle,
    ratios: Vec<AspectRatio>,
}

/// What one product contributed to the report.
struct ProductOutcome {
    summary: ProductSummary,
    creatives: Vec<(String, ComplianceReport)>,
    errors: Vec<ErrorRecord>,
    warnings: Vec<String>,
}

impl ProductOutcome {
    fn new(product_id: &str) -> Self {
        Self {
            summary: ProductSummary {
                product_id: product_id.to_string(),
                status: ProductStatus::Failed,
                provenance: None,
                content_hash: None,
                creatives: 0,
            },
            creatives: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn skipped(product_id: &str) -> Self {
        let mut outcome = Self::new(product_id);
        outcome.summary.status = ProductStatus::Skipped;
        outcome
    }

    fn error(&mut self, stage: ErrorStage, ratio: Option<AspectRatio>, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            product_id: self.summary.product_id.clone(),
            aspect_ratio: ratio,
            stage,
            message: message.into(),
        });
    }
}

/// The campaign pipeline - single entry point for all creative production
pub struct CampaignPipeline {
    config: PipelineConfig,
    registry: FormatRegistry,
    typeface: Arc<Typeface>,
    resolver: Arc<AssetResolver>,
}

impl CampaignPipeline {
    /// Disk-backed store and the generator `config.generation_mode` selects.
    pub async fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let typeface = Arc::new(discover_typeface(&config));
        let selection = select_generator(&config, typeface.clone()).await?;
        let store: Arc<dyn AssetStore> = Arc::new(DiskAssetStore::new(config.asset_root.clone()));
        Self::assemble(config, store, selection.generator, typeface)
    }

    /// Caller-supplied store and generator.
    pub fn with_components(
        config: PipelineConfig,
        store: Arc<dyn AssetStore>,
        generator: Arc<dyn ImageGenerator>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let typeface = Arc::new(discover_typeface(&config));
        Self::assemble(config, store, generator, typeface)
    }

    fn assemble(
        config: PipelineConfig,
        store: Arc<dyn AssetStore>,
        generator: Arc<dyn ImageGenerator>,
        typeface: Arc<Typeface>,
    ) -> Result<Self, PipelineError> {
        let size = config.image_dimensions()?;
        let resolver = Arc::new(AssetResolver::new(store, generator, config.generation_timeout, size));
        Ok(Self {
            config,
            registry: FormatRegistry::standard(),
            typeface,
            resolver,
        })
    }

    pub fn with_typeface(mut self, typeface: Arc<Typeface>) -> Self {
        self.typeface = typeface;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &AssetResolver {
        &self.resolver
    }

    pub fn generation_backend(&self) -> String {
        self.resolver.generator().describe()
    }

    /// Known ratio buckets.
    pub fn formats(&self) -> Vec<(AspectRatio, CanonicalSize)> {
        self.registry.list()
    }

    pub async fn run(&self, brief: &CampaignBrief) -> Result<CampaignReport, PipelineError> {
        self.run_with_cancel(brief, CancellationToken::new()).await
    }

    /// Run the campaign. Once `cancel` fires no further product is started;
    /// products already running finish and the rest are reported as skipped.
    pub async fn run_with_cancel(
        &self,
        brief: &CampaignBrief,
        cancel: CancellationToken,
    ) -> Result<CampaignReport, PipelineError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();

        brief.validate().map_err(|e| PipelineError::Validation(e.to_string()))?;
        let ratios = self.aspect_ratios(brief)?;
        let layout = OutputLayout::new(&self.config.output_root, &brief.campaign_name);
        ensure_writable(&layout.campaign_dir()).await?;

        let brand = brief.brand();
        let message = brief.localized_message(self.config.language.as_deref()).to_string();
        let renderer = CreativeRenderer::new(self.registry.clone(), self.typeface_for(&brand))
            .with_overlay(OverlaySettings {
                opacity: self.config.overlay_opacity,
                ..OverlaySettings::default()
            })
            .with_jpeg_quality(self.config.jpeg_quality);
        let engine = ComplianceEngine::new(&ComplianceRules::from_config(&self.config, &brand));

        info!(
            run_id = %run_id,
            campaign = %brief.campaign_name,
            products = brief.products.len(),
            ratios = ratios.len(),
            checks = ?engine.check_names(),
            backend = %self.generation_backend(),
            "Starting campaign run"
        );

        let ctx = Arc::new(RunContext {
            resolver: self.resolver.clone(),
            renderer,
            engine,
            layout: layout.clone(),
            prompt: PromptContext::from_brief(brief),
            message,
            style: BrandStyle::from_guidelines(&brand),
            ratios,
        });

        let outcomes = self.process_products(ctx, &brief.products, &cancel).await;
        let report = self.aggregate(run_id, brief, outcomes)?;

        let report_path = layout.report_path();
        report.write(&report_path)?;

        info!(
            campaign = %report.campaign_name,
            products_processed = report.products_processed,
            products_failed = report.products_failed,
            products_skipped = report.products_skipped,
            creatives = report.creatives_generated,
            checks_failed = report.compliance_summary.failed,
            coalesced_resolves = self.resolver.flight_stats().joined,
            elapsed_ms = started.elapsed().as_millis() as u64,
            report = %report_path.display(),
            "Campaign run complete"
        );
        Ok(report)
    }

    fn aspect_ratios(&self, brief: &CampaignBrief) -> Result<Vec<AspectRatio>, PipelineError> {
        let requested = brief.aspect_ratios.clone().unwrap_or_else(|| self.config.aspect_ratios.clone());
        if requested.is_empty() {
            return Err(PipelineError::Validation("no aspect ratios configured".into()));
        }
        AspectRatio::parse_list(&requested).map_err(|e| PipelineError::Validation(e.to_string()))
    }

    /// FONT_PATH wins; otherwise a brand font given as a file path; otherwise
    /// whatever was discovered at construction.
    fn typeface_for(&self, brand: &BrandGuidelines) -> Arc<Typeface> {
        if self.config.font_path.is_none() {
            if let Some(face) = brand.font_family.as_deref().map(Path::new).and_then(Typeface::from_file) {
                debug!("Using brand font for overlay text");
                return Arc::new(face);
            }
        }
        self.typeface.clone()
    }

    async fn process_products(
        &self,
        ctx: Arc<RunContext>,
        products: &[Product],
        cancel: &CancellationToken,
    ) -> Vec<ProductOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut launched = 0usize;

        for (idx, product) in products.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let ctx = ctx.clone();
            let product = product.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (idx, process_product(ctx, &product).await)
            });
            launched += 1;
        }

        if launched < products.len() {
            warn!(skipped = products.len() - launched, "Run cancelled, remaining products skipped");
        }

        let mut slots: Vec<Option<ProductOutcome>> = products.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) => error!(error = %e, "Product task aborted"),
            }
        }

        slots
            .into_iter()
            .zip(products)
            .enumerate()
            .map(|(idx, (slot, product))| match slot {
                Some(outcome) => outcome,
                None if idx >= launched => ProductOutcome::skipped(&product.product_id),
                None => {
                    let mut outcome = ProductOutcome::new(&product.product_id);
                    outcome.error(ErrorStage::Resolve, None, "product task aborted before completing");
                    outcome
                }
            })
            .collect()
    }

    fn aggregate(
        &self,
        run_id: String,
        brief: &CampaignBrief,
        outcomes: Vec<ProductOutcome>,
    ) -> Result<CampaignReport, PipelineError> {
        let mut products = Vec::with_capacity(outcomes.len());
        let mut details = Vec::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for outcome in outcomes {
            products.push(outcome.summary);
            details.extend(outcome.creatives);
            errors.extend(outcome.errors);
            warnings.extend(outcome.warnings);
        }

        let count = |status: ProductStatus| products.iter().filter(|p| p.status == status).count();
        let skipped = count(ProductStatus::Skipped);
        if skipped > 0 {
            warnings.push(format!("run cancelled: {} product(s) skipped", skipped));
        }

        Ok(CampaignReport {
            run_id,
            campaign_name: brief.campaign_name.clone(),
            generated_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
            generation_backend: self.generation_backend(),
            brief_fingerprint: brief_fingerprint(brief, ENGINE_VERSION)?,
            products_processed: count(ProductStatus::Completed) + count(ProductStatus::Partial),
            products_failed: count(ProductStatus::Failed),
            products_skipped: skipped,
            creatives_generated: details.len(),
            creatives: details.iter().map(|(path, _)| path.clone()).collect(),
            compliance_summary: ComplianceSummary::from_reports(details.iter().map(|(_, r)| r)),
            compliance_details: details,
            products,
            errors,
            warnings,
        })
    }
}

async fn process_product(ctx: Arc<RunContext>, product: &Product) -> ProductOutcome {
    let product_id = product.product_id.as_str();
    let mut outcome = ProductOutcome::new(product_id);

    let asset = match ctx.resolver.resolve(product, &ctx.prompt).await {
        Ok(asset) => asset,
        Err(e) => {
            warn!(product_id, error = %e, "Source asset unavailable, skipping product");
            outcome.error(ErrorStage::Resolve, None, e.to_string());
            return outcome;
        }
    };
    outcome.summary.provenance = Some(asset.provenance);
    outcome.summary.content_hash = Some(asset.content_hash.clone());
    if let Some(reason) = &asset.fallback_reason {
        outcome
            .warnings
            .push(format!("{}: placeholder used after remote generation failed: {}", product_id, reason));
    }

    let bytes = asset.bytes.clone();
    let decoded = match tokio::task::spawn_blocking(move || decode(&bytes)).await {
        Ok(Ok(img)) => Arc::new(img),
        Ok(Err(e)) => {
            fail_all_ratios(&ctx, &mut outcome, &e);
            return outcome;
        }
        Err(e) => {
            fail_all_ratios(&ctx, &mut outcome, &RenderError::DecodeFailed(e.to_string()));
            return outcome;
        }
    };

    for &ratio in &ctx.ratios {
        if let Some(entry) = produce_creative(&ctx, product_id, &decoded, ratio, &mut outcome).await {
            outcome.creatives.push(entry);
        }
    }

    outcome.summary.creatives = outcome.creatives.len();
    outcome.summary.status = match outcome.creatives.len() {
        0 => ProductStatus::Failed,
        n if n == ctx.ratios.len() => ProductStatus::Completed,
        _ => ProductStatus::Partial,
    };
    info!(product_id, creatives = outcome.summary.creatives, provenance = %asset.provenance, "Product finished");
    outcome
}

fn fail_all_ratios(ctx: &RunContext, outcome: &mut ProductOutcome, err: &RenderError) {
    warn!(product_id = %outcome.summary.product_id, error = %err, "Source image unusable");
    for &ratio in &ctx.ratios {
        outcome.error(ErrorStage::Render, Some(ratio), err.to_string());
    }
}

/// Render, write and evaluate one (product, ratio) pair.
async fn produce_creative(
    ctx: &Arc<RunContext>,
    product_id: &str,
    source: &Arc<DynamicImage>,
    ratio: AspectRatio,
    outcome: &mut ProductOutcome,
) -> Option<(String, ComplianceReport)> {
    let rendered = {
        let ctx = ctx.clone();
        let source = source.clone();
        tokio::task::spawn_blocking(move || ctx.renderer.render_decoded(&source, ratio, &ctx.message, &ctx.style))
            .await
            .unwrap_or_else(|e| Err(RenderError::EncodeFailed(e.to_string())))
    };
    let rendered = match rendered {
        Ok(r) => r,
        Err(e) => {
            warn!(product_id, aspect_ratio = %ratio, error = %e, "Render failed");
            outcome.error(ErrorStage::Render, Some(ratio), e.to_string());
            return None;
        }
    };

    let path = ctx.layout.creative_path(product_id, ratio);
    if let Err(e) = write_creative(&path, &rendered.bytes).await {
        warn!(product_id, aspect_ratio = %ratio, error = %e, "Creative could not be written");
        outcome.error(ErrorStage::Write, Some(ratio), e.to_string());
        return None;
    }

    let evaluated = {
        let ctx = ctx.clone();
        let owner = product_id.to_string();
        let overflow = rendered.message_overflow;
        let bytes = rendered.bytes;
        tokio::task::spawn_blocking(move || {
            let creative = CreativeContext {
                product_id: &owner,
                aspect_ratio: ratio,
                expected_size: ctx.renderer.bucket(ratio),
                message: &ctx.message,
                message_overflow: overflow,
            };
            ctx.engine.evaluate(&bytes, &creative)
        })
        .await
    };
    let report = match evaluated {
        Ok(report) => report,
        Err(e) => {
            error!(product_id, aspect_ratio = %ratio, error = %e, "Compliance evaluation aborted");
            outcome.error(ErrorStage::Evaluate, Some(ratio), e.to_string());
            return None;
        }
    };

    debug!(
        product_id,
        aspect_ratio = %ratio,
        passed = report.passed,
        path = %path.display(),
        "Creative written"
    );
    Some((path.display().to_string(), report))
}

async fn write_creative(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

async fn ensure_writable(dir: &Path) -> Result<(), PipelineError> {
    let unwritable = |e: std::io::Error| PipelineError::OutputUnwritable {
        path: dir.to_path_buf(),
        message: e.to_string(),
    };
    tokio::fs::create_dir_all(dir).await.map_err(unwritable)?;
    let probe = dir.join(format!(".write-probe-{}", Uuid::new_v4()));
    tokio::fs::write(&probe, b"").await.map_err(unwritable)?;
    let _ = tokio::fs::remove_file(&probe).await;
    Ok(())
}

fn discover_typeface(config: &PipelineConfig) -> Typeface {
    let preferred: Vec<PathBuf> = config.font_path.iter().cloned().collect();
    Typeface::discover(&preferred)
}

//! ForgeCampaign CLI - Creative Campaign Compiler
//!
//! Commands: generate, validate, info, test-api
//! Outputs JSON to stdout, logs to stderr and the log file
//! Exit codes: 0 ok, 1 fatal, 2 completed with per-product errors (or invalid brief)

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use forgecampaign_core::{
    assets::DiskAssetStore,
    generation::{ImageGenerator, RemoteGenerator},
    logging::{self, DEFAULT_LOG_DIR, DEFAULT_LOG_FILE},
    CampaignBrief, CampaignPipeline, GenerationMode, PipelineConfig, ENGINE_VERSION,
};

#[derive(Parser)]
#[command(name = "forgecampaign-cli")]
#[command(about = "ForgeCampaign CLI - Creative Campaign Compiler", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory for the log file
    #[arg(long, global = true, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce creatives and a report for a campaign brief
    Generate {
        /// Brief file (.json, .yaml, .yml)
        #[arg(short, long)]
        brief: PathBuf,

        /// Output root (overrides OUTPUT_PATH)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use placeholder generation regardless of GENERATION_MODE
        #[arg(long)]
        mock: bool,

        /// Concurrent products (overrides WORKERS)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Translation key for the overlay message
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Load and validate a brief without producing anything
    Validate {
        #[arg(short, long)]
        brief: PathBuf,
    },

    /// Show effective configuration and asset storage usage
    Info,

    /// Check that the remote image service accepts our credentials
    TestApi,
}

fn emit(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
}

fn fatal(message: impl std::fmt::Display) -> ExitCode {
    emit(&json!({ "success": false, "error": message.to_string() }));
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match PipelineConfig::from_env() {
        Ok(c) => c,
        Err(e) => return fatal(e),
    };

    let _log_guard = match logging::init_logging(&cli.log_dir, DEFAULT_LOG_FILE, &config.log_level) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: file logging disabled: {}", e);
            None
        }
    };

    match cli.command {
        Commands::Generate { brief, output, mock, workers, language } => {
            let mut config = config;
            if let Some(output) = output {
                config.output_root = output;
            }
            if mock {
                config.generation_mode = GenerationMode::Mock;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            if language.is_some() {
                config.language = language;
            }
            generate(config, brief).await
        }

        Commands::Validate { brief } => match CampaignBrief::from_file(&brief) {
            Ok(b) => {
                emit(&json!({
                    "valid": true,
                    "campaign_name": b.campaign_name,
                    "products": b.products.iter().map(|p| &p.product_id).collect::<Vec<_>>(),
                    "aspect_ratios": b.aspect_ratio_strings(),
                    "languages": b.localization.as_ref().map(|l| l.languages.clone()).unwrap_or_default(),
                }));
                ExitCode::SUCCESS
            }
            Err(e) => {
                emit(&json!({ "valid": false, "error": e.to_string() }));
                ExitCode::from(2)
            }
        },

        Commands::Info => {
            let store = DiskAssetStore::new(config.asset_root.clone());
            let storage = match store.storage_info().await {
                Ok(info) => serde_json::to_value(info).unwrap_or(Value::Null),
                Err(e) => json!({ "error": e.to_string() }),
            };
            emit(&json!({
                "engine_version": ENGINE_VERSION,
                "config": {
                    "asset_root": config.asset_root,
                    "output_root": config.output_root,
                    "generation_mode": config.generation_mode,
                    "api_key_configured": config.has_api_key(),
                    "image_model": config.image_model,
                    "image_size": config.image_size,
                    "image_quality": config.image_quality,
                    "aspect_ratios": config.aspect_ratios,
                    "brand_colors": config.brand_colors,
                    "brand_logo_path": config.brand_logo_path,
                    "prohibited_words": config.prohibited_words,
                    "max_message_length": config.max_message_length,
                    "workers": config.workers,
                },
                "storage": storage,
            }));
            ExitCode::SUCCESS
        }

        Commands::TestApi => {
            let Some(remote) = RemoteGenerator::from_config(&config) else {
                emit(&json!({ "configured": false, "reachable": false, "error": "OPENAI_API_KEY is not set" }));
                return ExitCode::FAILURE;
            };
            let reachable = remote.check_connection().await;
            emit(&json!({
                "configured": true,
                "reachable": reachable,
                "base_url": config.api_base_url,
                "model": config.image_model,
            }));
            if reachable {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn generate(config: PipelineConfig, brief_path: PathBuf) -> ExitCode {
    let brief = match CampaignBrief::from_file(&brief_path) {
        Ok(b) => b,
        Err(e) => return fatal(e),
    };

    let pipeline = match CampaignPipeline::from_config(config).await {
        Ok(p) => p,
        Err(e) => return fatal(e),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight products");
            on_signal.cancel();
        }
    });

    match pipeline.run_with_cancel(&brief, cancel).await {
        Ok(report) => {
            emit(&json!({
                "success": true,
                "run_id": report.run_id,
                "campaign_name": report.campaign_name,
                "generation_backend": report.generation_backend,
                "products_processed": report.products_processed,
                "products_failed": report.products_failed,
                "products_skipped": report.products_skipped,
                "creatives_generated": report.creatives_generated,
                "compliance_summary": report.compliance_summary,
                "errors": report.errors,
                "warnings": report.warnings,
            }));
            if report.has_errors() {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => fatal(e),
    }
}

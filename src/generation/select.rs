//! Backend selection, once per run.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{
    Backend, GeneratedImage, GenerationError, GenerationRequest, ImageGenerator, PlaceholderGenerator,
    RemoteGenerator,
};
use crate::config::{ConfigError, GenerationMode, PipelineConfig};
use crate::render::Typeface;

/// The generator chosen for a run and how it was chosen.
#[derive(Clone)]
pub struct GeneratorSelection {
    pub generator: Arc<dyn ImageGenerator>,
    pub mode: GenerationMode,
    pub label: String,
}

impl std::fmt::Debug for GeneratorSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorSelection")
            .field("mode", &self.mode)
            .field("label", &self.label)
            .finish()
    }
}

/// Remote first; on a failed call, a placeholder for that call only.
///
/// The result carries `fallback_reason` so the resolver can refuse to cache
/// it and the report can list it.
pub struct FallbackGenerator {
    primary: Arc<dyn ImageGenerator>,
    fallback: Arc<dyn ImageGenerator>,
}

impl FallbackGenerator {
    pub fn new(primary: Arc<dyn ImageGenerator>, fallback: Arc<dyn ImageGenerator>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl ImageGenerator for FallbackGenerator {
    fn describe(&self) -> String {
        format!("{} with {} fallback", self.primary.describe(), self.fallback.describe())
    }

    fn backend(&self) -> Backend {
        self.primary.backend()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<GeneratedImage, GenerationError> {
        match self.primary.generate(request, timeout).await {
            Ok(image) => Ok(image),
            Err(primary_err) => {
                warn!(
                    product_id = %request.product_id,
                    error = %primary_err,
                    "Remote generation failed, substituting placeholder for this product"
                );
                let mut image = self.fallback.generate(request, timeout).await?;
                image.fallback_reason = Some(primary_err.to_string());
                Ok(image)
            }
        }
    }

    async fn check_connection(&self) -> bool {
        self.primary.check_connection().await || self.fallback.check_connection().await
    }
}

/// Resolve `config.generation_mode` into a concrete generator.
///
/// - `mock`: placeholder.
/// - `remote`: remote; a missing key is a configuration error.
/// - `auto`: remote behind a fallback when a key is set and the service
///   answers, otherwise placeholder.
pub async fn select_generator(
    config: &PipelineConfig,
    typeface: Arc<Typeface>,
) -> Result<GeneratorSelection, ConfigError> {
    let placeholder: Arc<dyn ImageGenerator> = Arc::new(PlaceholderGenerator::new(typeface));

    let selection = match config.generation_mode {
        GenerationMode::Mock => GeneratorSelection {
            label: placeholder.describe(),
            generator: placeholder,
            mode: GenerationMode::Mock,
        },
        GenerationMode::Remote => {
            let remote = RemoteGenerator::from_config(config).ok_or(ConfigError::MissingApiKey)?;
            let remote: Arc<dyn ImageGenerator> = Arc::new(remote);
            GeneratorSelection {
                label: remote.describe(),
                generator: remote,
                mode: GenerationMode::Remote,
            }
        }
        GenerationMode::Auto => match RemoteGenerator::from_config(config) {
            Some(remote) if remote.check_connection().await => {
                let fallback: Arc<dyn ImageGenerator> =
                    Arc::new(FallbackGenerator::new(Arc::new(remote), placeholder));
                GeneratorSelection {
                    label: fallback.describe(),
                    generator: fallback,
                    mode: GenerationMode::Auto,
                }
            }
            Some(_) => {
                warn!("Image service did not answer, using placeholder generation for this run");
                GeneratorSelection {
                    label: placeholder.describe(),
                    generator: placeholder,
                    mode: GenerationMode::Auto,
                }
            }
            None => {
                info!("No API key configured, using placeholder generation");
                GeneratorSelection {
                    label: placeholder.describe(),
                    generator: placeholder,
                    mode: GenerationMode::Auto,
                }
            }
        },
    };

    info!(generator = %selection.label, "Generation backend selected");
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationErrorKind;
    use assert_matches::assert_matches;

    struct Failing;

    #[async_trait]
    impl ImageGenerator for Failing {
        fn describe(&self) -> String {
            "failing".into()
        }
        fn backend(&self) -> Backend {
            Backend::Remote
        }
        async fn generate(&self, _: &GenerationRequest, _: Duration) -> Result<GeneratedImage, GenerationError> {
            Err(GenerationError::new(GenerationErrorKind::Quota, "out of credits"))
        }
        async fn check_connection(&self) -> bool {
            false
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            product_id: "p1".into(),
            product_name: "P".into(),
            prompt: "x".into(),
            size: (64, 64),
        }
    }

    #[tokio::test]
    async fn test_fallback_marks_result() {
        let gen = FallbackGenerator::new(
            Arc::new(Failing),
            Arc::new(PlaceholderGenerator::new(Arc::new(Typeface::Blocks))),
        );
        let image = gen.generate(&request(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(image.backend, Backend::Placeholder);
        let reason = image.fallback_reason.unwrap();
        assert!(reason.contains("quota"));
    }

    #[tokio::test]
    async fn test_mock_mode_selects_placeholder() {
        let mut config = PipelineConfig::for_output("/tmp/out");
        config.generation_mode = GenerationMode::Mock;
        config.api_key = Some("sk-test".into());
        let selection = select_generator(&config, Arc::new(Typeface::Blocks)).await.unwrap();
        assert_eq!(selection.generator.backend(), Backend::Placeholder);
    }

    #[tokio::test]
    async fn test_remote_mode_requires_key() {
        let mut config = PipelineConfig::for_output("/tmp/out");
        config.generation_mode = GenerationMode::Remote;
        assert_matches!(
            select_generator(&config, Arc::new(Typeface::Blocks)).await,
            Err(ConfigError::MissingApiKey)
        );
    }

    #[tokio::test]
    async fn test_auto_mode_without_key_uses_placeholder() {
        let config = PipelineConfig::for_output("/tmp/out");
        let selection = select_generator(&config, Arc::new(Typeface::Blocks)).await.unwrap();
        assert_eq!(selection.mode, GenerationMode::Auto);
        assert_eq!(selection.generator.backend(), Backend::Placeholder);
    }
}

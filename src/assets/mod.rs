//! Asset Resolver - Reuse Before Generate
//!
//! Every product image comes from exactly one place: an explicit file named
//! in the brief, the durable store, or the generator. Generation happens at
//! most once per product id across concurrent callers and across runs.

pub mod singleflight;
pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::brief::Product;
use crate::generation::{GenerationError, ImageGenerator, PromptContext};
use crate::hashing::sha256_hex;

pub use singleflight::{FlightStats, SingleFlight};
pub use store::{AssetStore, DiskAssetStore, MemoryAssetStore, StorageInfo};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("No source image for product '{product_id}': {cause}")]
    Unavailable {
        product_id: String,
        cause: GenerationError,
    },

    #[error("Asset storage failed for product '{product_id}': {message}")]
    Storage { product_id: String, message: String },
}

impl AssetError {
    pub fn storage(product_id: &str, err: impl fmt::Display) -> Self {
        Self::Storage {
            product_id: product_id.to_string(),
            message: err.to_string(),
        }
    }

    pub fn product_id(&self) -> &str {
        match self {
            Self::Unavailable { product_id, .. } | Self::Storage { product_id, .. } => product_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Reused,
    Generated,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provenance::Reused => "reused",
            Provenance::Generated => "generated",
        })
    }
}

#[derive(Debug, Clone)]
pub struct SourceAsset {
    pub product_id: String,
    pub bytes: Arc<Vec<u8>>,
    pub provenance: Provenance,
    /// SHA-256 of `bytes`.
    pub content_hash: String,
    /// Why a placeholder stood in for a failed remote call, if one did.
    pub fallback_reason: Option<String>,
}

impl SourceAsset {
    fn new(product_id: &str, bytes: Vec<u8>, provenance: Provenance) -> Self {
        Self {
            product_id: product_id.to_string(),
            content_hash: sha256_hex(&bytes),
            bytes: Arc::new(bytes),
            provenance,
            fallback_reason: None,
        }
    }
}

type Resolution = Result<SourceAsset, AssetError>;

pub struct AssetResolver {
    store: Arc<dyn AssetStore>,
    generator: Arc<dyn ImageGenerator>,
    flights: SingleFlight<Resolution>,
    timeout: Duration,
    size: (u32, u32),
}

impl AssetResolver {
    pub fn new(store: Arc<dyn AssetStore>, generator: Arc<dyn ImageGenerator>, timeout: Duration, size: (u32, u32)) -> Self {
        Self {
            store,
            generator,
            flights: SingleFlight::new(),
            timeout,
            size,
        }
    }

    pub fn generator(&self) -> &Arc<dyn ImageGenerator> {
        &self.generator
    }

    pub fn flight_stats(&self) -> FlightStats {
        self.flights.stats()
    }

    /// Source image for `product`.
    ///
    /// Order: explicit `product_image` file, cached asset, generation. A fresh
    /// image is persisted before being returned so later callers see it as
    /// `reused`; a fallback placeholder is returned but never persisted.
    ///
    /// Callers that arrive while a resolution for the same product is in
    /// flight share the leader's result unchanged, so they also report
    /// `generated` although only one generation call was made.
    pub async fn resolve(&self, product: &Product, ctx: &PromptContext) -> Resolution {
        let product_id = product.product_id.as_str();

        if let Some(path) = product.product_image.as_deref().filter(|p| !p.trim().is_empty()) {
            match tokio::fs::read(Path::new(path)).await {
                Ok(bytes) => {
                    info!(product_id, path, provenance = %Provenance::Reused, "Using explicit product image");
                    return Ok(SourceAsset::new(product_id, bytes, Provenance::Reused));
                }
                Err(e) => warn!(product_id, path, error = %e, "Explicit product image unreadable, resolving from store"),
            }
        }

        self.flights
            .run(product_id, || self.resolve_uncoalesced(product, ctx))
            .await
    }

    async fn resolve_uncoalesced(&self, product: &Product, ctx: &PromptContext) -> Resolution {
        let product_id = product.product_id.as_str();

        if let Some(bytes) = self.store.get(product_id).await? {
            info!(product_id, provenance = %Provenance::Reused, "Reusing cached asset");
            return Ok(SourceAsset::new(product_id, bytes, Provenance::Reused));
        }

        let started = Instant::now();
        let request = ctx.request_for(product, self.size);
        let generated = self
            .generator
            .generate(&request, self.timeout)
            .await
            .map_err(|cause| AssetError::Unavailable {
                product_id: product_id.to_string(),
                cause,
            })?;

        let mut asset = SourceAsset::new(product_id, generated.bytes, Provenance::Generated);
        asset.fallback_reason = generated.fallback_reason;

        if asset.fallback_reason.is_none() {
            if let Err(e) = self.store.put(product_id, &asset.bytes).await {
                warn!(product_id, error = %e, "Generated asset could not be cached");
            }
        }

        info!(
            product_id,
            provenance = %asset.provenance,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generated source asset"
        );
        Ok(asset)
    }

    /// Drop the cached asset so the next resolution regenerates it.
    pub async fn invalidate(&self, product_id: &str) -> Result<bool, AssetError> {
        let removed = self.store.remove(product_id).await?;
        if removed {
            info!(product_id, "Cached asset invalidated");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{
        Backend, GeneratedImage, GenerationErrorKind, GenerationRequest, PlaceholderGenerator,
    };
    use crate::render::Typeface;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls; optionally slow, optionally failing.
    struct Counting {
        inner: PlaceholderGenerator,
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl Counting {
        fn new(delay: Duration, fail: bool) -> Self {
            Self {
                inner: PlaceholderGenerator::new(Arc::new(Typeface::Blocks)),
                calls: AtomicUsize::new(0),
                delay,
                fail,
            }
        }
    }

    #[async_trait]
    impl ImageGenerator for Counting {
        fn describe(&self) -> String {
            "counting".into()
        }
        fn backend(&self) -> Backend {
            Backend::Placeholder
        }
        async fn generate(&self, request: &GenerationRequest, timeout: Duration) -> Result<GeneratedImage, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(GenerationError::new(GenerationErrorKind::Transport, "connection reset"));
            }
            self.inner.generate(request, timeout).await
        }
        async fn check_connection(&self) -> bool {
            true
        }
    }

    fn product(id: &str) -> Product {
        Product {
            product_id: id.into(),
            product_name: "Thing".into(),
            product_description: None,
            product_image: None,
        }
    }

    fn resolver(store: Arc<dyn AssetStore>, gen: Arc<Counting>) -> AssetResolver {
        AssetResolver::new(store, gen, Duration::from_secs(5), (64, 64))
    }

    #[tokio::test]
    async fn test_generate_once_then_reuse() {
        let gen = Arc::new(Counting::new(Duration::ZERO, false));
        let resolver = resolver(Arc::new(MemoryAssetStore::new()), gen.clone());
        let ctx = PromptContext::default();

        let first = resolver.resolve(&product("p1"), &ctx).await.unwrap();
        let second = resolver.resolve(&product("p1"), &ctx).await.unwrap();

        assert_eq!(first.provenance, Provenance::Generated);
        assert_eq!(second.provenance, Provenance::Reused);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_generates_once() {
        let gen = Arc::new(Counting::new(Duration::from_millis(50), false));
        let resolver = Arc::new(resolver(Arc::new(MemoryAssetStore::new()), gen.clone()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move {
                resolver.resolve(&product("shared"), &PromptContext::default()).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(gen.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_is_unavailable() {
        let gen = Arc::new(Counting::new(Duration::ZERO, true));
        let store = Arc::new(MemoryAssetStore::new());
        let resolver = resolver(store.clone(), gen);

        let err = resolver.resolve(&product("p1"), &PromptContext::default()).await.unwrap_err();
        assert_matches!(
            err,
            AssetError::Unavailable { ref product_id, cause: GenerationError { kind: GenerationErrorKind::Transport, .. } }
                if product_id == "p1"
        );
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_forces_regeneration() {
        let gen = Arc::new(Counting::new(Duration::ZERO, false));
        let resolver = resolver(Arc::new(MemoryAssetStore::new()), gen.clone());
        let ctx = PromptContext::default();

        resolver.resolve(&product("p1"), &ctx).await.unwrap();
        assert!(resolver.invalidate("p1").await.unwrap());
        let again = resolver.resolve(&product("p1"), &ctx).await.unwrap();

        assert_eq!(again.provenance, Provenance::Generated);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_explicit_image_skips_store_and_generator() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("hero.png");
        std::fs::write(&path, crate::generation::local::MINIMAL_PNG).unwrap();

        let gen = Arc::new(Counting::new(Duration::ZERO, false));
        let store = Arc::new(MemoryAssetStore::new());
        let resolver = resolver(store.clone(), gen.clone());

        let mut p = product("p1");
        p.product_image = Some(path.to_string_lossy().into_owned());
        let asset = resolver.resolve(&p, &PromptContext::default()).await.unwrap();

        assert_eq!(asset.provenance, Provenance::Reused);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_fallback_image_is_not_cached() {
        struct Fallback;

        #[async_trait]
        impl ImageGenerator for Fallback {
            fn describe(&self) -> String {
                "fallback".into()
            }
            fn backend(&self) -> Backend {
                Backend::Remote
            }
            async fn generate(&self, _: &GenerationRequest, _: Duration) -> Result<GeneratedImage, GenerationError> {
                let mut image = GeneratedImage::new(crate::generation::local::MINIMAL_PNG.to_vec(), Backend::Placeholder);
                image.fallback_reason = Some("quota".into());
                Ok(image)
            }
            async fn check_connection(&self) -> bool {
                true
            }
        }

        let store = Arc::new(MemoryAssetStore::new());
        let resolver = AssetResolver::new(store.clone(), Arc::new(Fallback), Duration::from_secs(1), (64, 64));
        let asset = resolver.resolve(&product("p1"), &PromptContext::default()).await.unwrap();

        assert_eq!(asset.fallback_reason.as_deref(), Some("quota"));
        assert!(store.is_empty().await);
    }
}

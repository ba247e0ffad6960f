//! Durable product-image storage.

use async_trait::async_trait;
use image::ImageFormat;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::AssetError;

/// Recognised cached-image extensions, in lookup priority order.
pub const CACHE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "webp"];

/// Boundary to whatever holds reusable product images.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn get(&self, product_id: &str) -> Result<Option<Vec<u8>>, AssetError>;

    async fn put(&self, product_id: &str, bytes: &[u8]) -> Result<(), AssetError>;

    /// Returns whether anything was removed.
    async fn remove(&self, product_id: &str) -> Result<bool, AssetError>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StorageInfo {
    pub root: PathBuf,
    pub products: usize,
    pub files: usize,
    pub total_bytes: u64,
}

/// `{root}/products/{product_id}/product.{ext}`
#[derive(Debug, Clone)]
pub struct DiskAssetStore {
    root: PathBuf,
}

impl DiskAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn product_dir(&self, product_id: &str) -> PathBuf {
        self.root.join("products").join(product_id)
    }

    /// Cached image files for a product, in lookup order.
    pub async fn candidates(&self, product_id: &str) -> Result<Vec<PathBuf>, AssetError> {
        let dir = self.product_dir(product_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AssetError::storage(product_id, e)),
        };

        let mut found: Vec<(usize, String, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| AssetError::storage(product_id, e))? {
            let path = entry.path();
            let Some(rank) = extension_rank(&path) else { continue };
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            found.push((rank, name, path));
        }
        found.sort();
        Ok(found.into_iter().map(|(_, _, p)| p).collect())
    }

    pub async fn storage_info(&self) -> Result<StorageInfo, AssetError> {
        let mut info = StorageInfo {
            root: self.root.clone(),
            products: 0,
            files: 0,
            total_bytes: 0,
        };
        let products_dir = self.root.join("products");
        let mut dirs = match fs::read_dir(&products_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(info),
            Err(e) => return Err(AssetError::storage("*", e)),
        };

        while let Some(dir) = dirs.next_entry().await.map_err(|e| AssetError::storage("*", e))? {
            let product_id = dir.file_name().to_string_lossy().into_owned();
            if !dir.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let files = self.candidates(&product_id).await?;
            if files.is_empty() {
                continue;
            }
            info.products += 1;
            for file in files {
                info.files += 1;
                info.total_bytes += fs::metadata(&file).await.map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(info)
    }
}

#[async_trait]
impl AssetStore for DiskAssetStore {
    async fn get(&self, product_id: &str) -> Result<Option<Vec<u8>>, AssetError> {
        let Some(path) = self.candidates(product_id).await?.into_iter().next() else {
            return Ok(None);
        };
        debug!(product_id, path = %path.display(), "Cached asset found");
        let bytes = fs::read(&path).await.map_err(|e| AssetError::storage(product_id, e))?;
        Ok(Some(bytes))
    }

    async fn put(&self, product_id: &str, bytes: &[u8]) -> Result<(), AssetError> {
        let ext = sniff_extension(bytes).ok_or_else(|| AssetError::Storage {
            product_id: product_id.to_string(),
            message: "refusing to store bytes that are not PNG, JPEG or WebP".to_string(),
        })?;

        let dir = self.product_dir(product_id);
        fs::create_dir_all(&dir).await.map_err(|e| AssetError::storage(product_id, e))?;

        // Only one cached image per product.
        for stale in self.candidates(product_id).await? {
            fs::remove_file(&stale).await.map_err(|e| AssetError::storage(product_id, e))?;
        }

        let target = dir.join(format!("product.{}", ext));
        let tmp = dir.join(format!(".product.{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, bytes).await.map_err(|e| AssetError::storage(product_id, e))?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(AssetError::storage(product_id, e));
        }

        info!(product_id, path = %target.display(), bytes = bytes.len(), "Stored product asset");
        Ok(())
    }

    async fn remove(&self, product_id: &str) -> Result<bool, AssetError> {
        let files = self.candidates(product_id).await?;
        let removed = !files.is_empty();
        for file in files {
            fs::remove_file(&file).await.map_err(|e| AssetError::storage(product_id, e))?;
        }
        Ok(removed)
    }
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn get(&self, product_id: &str) -> Result<Option<Vec<u8>>, AssetError> {
        Ok(self.entries.read().await.get(product_id).cloned())
    }

    async fn put(&self, product_id: &str, bytes: &[u8]) -> Result<(), AssetError> {
        self.entries.write().await.insert(product_id.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn remove(&self, product_id: &str) -> Result<bool, AssetError> {
        Ok(self.entries.write().await.remove(product_id).is_some())
    }
}

fn extension_rank(path: &Path) -> Option<usize> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    CACHE_EXTENSIONS.iter().position(|e| *e == ext)
}

fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpg"),
        ImageFormat::WebP => Some("webp"),
        _ => None,
    }
}

//! Fallback images for memories created without a user-provided picture.
//!
//! A reference is either an `http(s)` URL, which is downloaded, or the name
//! of a bundled asset, which is loaded from the configured assets folder.

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use image::DynamicImage;
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use url::Url;

const ASSET_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Trait for fallback image providers
#[async_trait]
pub trait FallbackImageSource: Send + Sync {
    /// Resolve a reference to a decoded image
    async fn fetch(&self, reference: &str) -> Result<DynamicImage>;
}

/// Downloads URLs with reqwest and reads named assets from disk
pub struct DefaultFallbackSource {
    client: Client,
    assets_dir: PathBuf,
}

impl DefaultFallbackSource {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.fallback.user_agent)
            .timeout(config.fallback.timeout())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Fallback(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            assets_dir: config.paths.assets_dir.clone(),
        })
    }

    async fn download(&self, url: Url) -> Result<DynamicImage> {
        debug!("Downloading fallback image {}", url);
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fallback(format!("HTTP {}: {}", status, url)));
        }

        let bytes = response.bytes().await?;
        image::load_from_memory(&bytes)
            .map_err(|e| Error::Fallback(format!("{} is not a readable image: {}", url, e)))
    }

    async fn load_asset(&self, name: &str) -> Result<DynamicImage> {
        if !is_relative_asset_name(name) {
            return Err(Error::Fallback(format!("Invalid asset name: {}", name)));
        }

        for candidate in asset_candidates(&self.assets_dir, name) {
            match tokio::fs::read(&candidate).await {
                Ok(bytes) => {
                    debug!("Loading fallback asset {:?}", candidate);
                    return image::load_from_memory(&bytes).map_err(|e| {
                        Error::Fallback(format!("{} is not a readable image: {}", name, e))
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Fallback(format!("Asset not found: {}", name)))
    }
}

#[async_trait]
impl FallbackImageSource for DefaultFallbackSource {
    async fn fetch(&self, reference: &str) -> Result<DynamicImage> {
        let reference = reference.trim();
        match Url::parse(reference) {
            Ok(url) if url.scheme().starts_with("http") => self.download(url).await,
            _ => self.load_asset(reference).await,
        }
    }
}

fn is_relative_asset_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// The name as given, then with each known image extension when it has none
fn asset_candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let base = dir.join(name);
    let mut candidates = vec![base.clone()];
    if base.extension().is_none() {
        candidates.extend(ASSET_EXTENSIONS.iter().map(|ext| base.with_extension(ext)));
    }
    candidates
}
